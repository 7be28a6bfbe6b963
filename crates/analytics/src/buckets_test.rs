//! Tests for expected time-bucket enumeration

use chrono::TimeZone;

use crate::buckets::{expected_buckets, normalize_datetime_key, parse_tz};
use crate::query::Granularity;

fn utc_ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> i64 {
    chrono::Utc
        .with_ymd_and_hms(y, mo, d, h, mi, s)
        .unwrap()
        .timestamp()
}

#[test]
fn test_daily_buckets_utc() {
    let tz = parse_tz("UTC").unwrap();
    let from = utc_ts(2024, 1, 15, 0, 0, 0);
    let to = utc_ts(2024, 1, 18, 0, 0, 0);
    let buckets = expected_buckets(from, to, Granularity::Day, tz).unwrap();
    assert_eq!(
        buckets,
        vec![
            "2024-01-15 00:00:00",
            "2024-01-16 00:00:00",
            "2024-01-17 00:00:00",
        ]
    );
}

#[test]
fn test_first_bucket_contains_from() {
    let tz = parse_tz("UTC").unwrap();
    // Mid-day start: the containing bucket's start precedes `from`
    let from = utc_ts(2024, 1, 15, 13, 45, 0);
    let to = utc_ts(2024, 1, 16, 0, 0, 0);
    let buckets = expected_buckets(from, to, Granularity::Day, tz).unwrap();
    assert_eq!(buckets, vec!["2024-01-15 00:00:00"]);
}

#[test]
fn test_end_exclusive() {
    let tz = parse_tz("UTC").unwrap();
    let from = utc_ts(2024, 1, 15, 0, 0, 0);
    // A bucket starting exactly at `to` is excluded
    let to = utc_ts(2024, 1, 16, 0, 0, 0);
    let buckets = expected_buckets(from, to, Granularity::Day, tz).unwrap();
    assert_eq!(buckets, vec!["2024-01-15 00:00:00"]);
}

#[test]
fn test_hourly_buckets_spring_forward_gap() {
    // America/New_York 2024-03-10: 02:00 local does not exist
    let tz = parse_tz("America/New_York").unwrap();
    let from = utc_ts(2024, 3, 10, 5, 0, 0); // 00:00 EST
    let to = utc_ts(2024, 3, 10, 9, 0, 0); // 05:00 EDT
    let buckets = expected_buckets(from, to, Granularity::Hour, tz).unwrap();
    assert_eq!(
        buckets,
        vec![
            "2024-03-10 00:00:00",
            "2024-03-10 01:00:00",
            "2024-03-10 03:00:00",
            "2024-03-10 04:00:00",
        ]
    );
}

#[test]
fn test_daily_buckets_across_spring_forward() {
    // The 23-hour day still yields exactly one bucket
    let tz = parse_tz("America/New_York").unwrap();
    let from = utc_ts(2024, 3, 9, 5, 0, 0);
    let to = utc_ts(2024, 3, 12, 4, 0, 0);
    let buckets = expected_buckets(from, to, Granularity::Day, tz).unwrap();
    assert_eq!(
        buckets,
        vec![
            "2024-03-09 00:00:00",
            "2024-03-10 00:00:00",
            "2024-03-11 00:00:00",
        ]
    );
}

#[test]
fn test_hourly_buckets_fall_back() {
    // America/New_York 2024-11-03: 01:00 local happens twice; one bucket
    let tz = parse_tz("America/New_York").unwrap();
    let from = utc_ts(2024, 11, 3, 4, 0, 0); // 00:00 EDT
    let to = utc_ts(2024, 11, 3, 8, 0, 0); // 03:00 EST
    let buckets = expected_buckets(from, to, Granularity::Hour, tz).unwrap();
    assert_eq!(
        buckets,
        vec![
            "2024-11-03 00:00:00",
            "2024-11-03 01:00:00",
            "2024-11-03 02:00:00",
        ]
    );
}

#[test]
fn test_weekly_buckets_anchor_monday() {
    let tz = parse_tz("UTC").unwrap();
    // 2024-01-17 is a Wednesday; its week starts Monday 2024-01-15
    let from = utc_ts(2024, 1, 17, 0, 0, 0);
    let to = utc_ts(2024, 1, 30, 0, 0, 0);
    let buckets = expected_buckets(from, to, Granularity::Week, tz).unwrap();
    assert_eq!(
        buckets,
        vec![
            "2024-01-15 00:00:00",
            "2024-01-22 00:00:00",
            "2024-01-29 00:00:00",
        ]
    );
}

#[test]
fn test_monthly_buckets() {
    let tz = parse_tz("UTC").unwrap();
    let from = utc_ts(2024, 1, 20, 0, 0, 0);
    let to = utc_ts(2024, 4, 1, 0, 0, 0);
    let buckets = expected_buckets(from, to, Granularity::Month, tz).unwrap();
    assert_eq!(
        buckets,
        vec![
            "2024-01-01 00:00:00",
            "2024-02-01 00:00:00",
            "2024-03-01 00:00:00",
        ]
    );
}

#[test]
fn test_quarterly_buckets() {
    let tz = parse_tz("UTC").unwrap();
    let from = utc_ts(2024, 2, 10, 0, 0, 0);
    let to = utc_ts(2024, 10, 1, 0, 0, 0);
    let buckets = expected_buckets(from, to, Granularity::Quarter, tz).unwrap();
    assert_eq!(
        buckets,
        vec![
            "2024-01-01 00:00:00",
            "2024-04-01 00:00:00",
            "2024-07-01 00:00:00",
        ]
    );
}

#[test]
fn test_parse_tz_invalid() {
    assert!(parse_tz("Mars/Olympus").is_err());
    assert!(parse_tz("").is_err());
}

#[test]
fn test_normalize_datetime_key_formats() {
    assert_eq!(
        normalize_datetime_key("2024-01-15 00:00:00").as_deref(),
        Some("2024-01-15 00:00:00")
    );
    assert_eq!(
        normalize_datetime_key("2024-01-15T07:30:00").as_deref(),
        Some("2024-01-15 07:30:00")
    );
    assert_eq!(
        normalize_datetime_key("2024-01-15").as_deref(),
        Some("2024-01-15 00:00:00")
    );
    assert_eq!(normalize_datetime_key("not a date"), None);
}
