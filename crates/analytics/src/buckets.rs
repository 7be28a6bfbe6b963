//! Expected time-bucket enumeration
//!
//! Gap-filling needs the complete set of buckets for `[from, to)` at a
//! granularity, computed independently of whatever the database returned.
//! Stepping happens in civil (wall-clock) time in the query's timezone so
//! bucket boundaries stay stable across DST transitions.

use chrono::{DateTime, Datelike, Duration, LocalResult, Months, NaiveDateTime, TimeZone, Timelike};
use chrono_tz::Tz;

use crate::error::{AnalyticsError, Result};
use crate::query::Granularity;

/// Canonical bucket key format, matching ClickHouse DateTime text output
const BUCKET_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse an IANA timezone name
pub fn parse_tz(timezone: &str) -> Result<Tz> {
    timezone
        .parse::<Tz>()
        .map_err(|_| AnalyticsError::Timezone(format!("unknown timezone: {}", timezone)))
}

/// Truncate a local wall-clock time down to the start of its bucket
fn truncate_local(naive: NaiveDateTime, granularity: Granularity) -> NaiveDateTime {
    let date = naive.date();
    let midnight = date.and_hms_opt(0, 0, 0).unwrap_or(naive);
    match granularity {
        Granularity::Hour => naive
            .with_minute(0)
            .and_then(|n| n.with_second(0))
            .and_then(|n| n.with_nanosecond(0))
            .unwrap_or(naive),
        Granularity::Day => midnight,
        // Weeks anchor to Monday
        Granularity::Week => {
            midnight - Duration::days(date.weekday().num_days_from_monday() as i64)
        }
        Granularity::Month => date
            .with_day(1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap_or(midnight),
        Granularity::Quarter => {
            let quarter_month = ((date.month0() / 3) * 3) + 1;
            date.with_day(1)
                .and_then(|d| d.with_month(quarter_month))
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap_or(midnight)
        }
    }
}

/// Advance a bucket start by one granularity step in civil time
fn advance_local(naive: NaiveDateTime, granularity: Granularity) -> Option<NaiveDateTime> {
    match granularity {
        Granularity::Hour => naive.checked_add_signed(Duration::hours(1)),
        Granularity::Day => naive.checked_add_signed(Duration::days(1)),
        Granularity::Week => naive.checked_add_signed(Duration::days(7)),
        Granularity::Month => naive.checked_add_months(Months::new(1)),
        Granularity::Quarter => naive.checked_add_months(Months::new(3)),
    }
}

/// Resolve a local wall-clock time to an instant.
///
/// Ambiguous times (DST fall-back) take the earlier offset; nonexistent times
/// (DST spring-forward gap) roll forward to the first valid hour.
fn resolve_local(tz: Tz, mut naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    for _ in 0..4 {
        match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => return Some(dt),
            LocalResult::Ambiguous(earliest, _) => return Some(earliest),
            LocalResult::None => {
                naive = naive.checked_add_signed(Duration::hours(1))?;
            }
        }
    }
    None
}

/// Render a bucket start as its canonical key
pub fn bucket_key(dt: &DateTime<Tz>) -> String {
    dt.format(BUCKET_FORMAT).to_string()
}

/// Normalize a raw datetime cell from the database into the canonical key.
///
/// The database already truncated into the query timezone, so this only
/// canonicalizes formatting differences.
pub fn normalize_datetime_key(raw: &str) -> Option<String> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, BUCKET_FORMAT) {
        return Some(naive.format(BUCKET_FORMAT).to_string());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.format(BUCKET_FORMAT).to_string());
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.format(BUCKET_FORMAT).to_string());
    }
    None
}

/// Every bucket key expected in `[from, to)` at the requested granularity.
///
/// The first bucket is the one containing `from` (its start may precede
/// `from`); enumeration stops at the first bucket starting at or after `to`.
pub fn expected_buckets(
    from: i64,
    to: i64,
    granularity: Granularity,
    tz: Tz,
) -> Result<Vec<String>> {
    let start_instant = DateTime::from_timestamp(from, 0)
        .ok_or_else(|| AnalyticsError::InvalidQuery(format!("invalid from timestamp: {}", from)))?
        .with_timezone(&tz);

    let mut keys = Vec::new();
    let mut naive = truncate_local(start_instant.naive_local(), granularity);

    loop {
        let resolved = resolve_local(tz, naive).ok_or_else(|| {
            AnalyticsError::Timezone(format!("unresolvable local time {} in {}", naive, tz))
        })?;
        if resolved.timestamp() >= to {
            break;
        }
        // A bucket start inside a DST gap resolves to the same instant as the
        // following bucket; keep one key
        let key = bucket_key(&resolved);
        if keys.last() != Some(&key) {
            keys.push(key);
        }
        naive = advance_local(naive, granularity).ok_or_else(|| {
            AnalyticsError::InvalidQuery("time range overflows bucket arithmetic".to_string())
        })?;
    }

    Ok(keys)
}
