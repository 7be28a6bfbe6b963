//! Result post-processing
//!
//! A fixed pipeline from raw executed rows to a presentation-ready report:
//! column canonicalization, gap-filling of missing time buckets, stable
//! re-sort, cardinality limiting, header relabeling, and the EACH pivot.
//! Every stage is a total function over the report; anything it cannot
//! complete becomes a descriptive error that the caller converts into an
//! error-marked report.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::buckets::{expected_buckets, normalize_datetime_key, parse_tz};
use crate::error::{AnalyticsError, Result};
use crate::query::{AnalyticsQuery, Combination, EngineConfig, LimitMode};
use crate::report::{
    group_key_alias, HeaderMetric, Report, GROUP_KEY_PREFIX, HEADER_COUNT, HEADER_DATETIME,
    HEADER_EVENT_INDEX, HEADER_EVENT_NAME, METRIC_EACH_EVENT_TOTAL, NONE_TOKEN,
};

/// Combo-key separator; never appears in property values that matter here
const KEY_SEPARATOR: char = '\u{1}';

/// Run the full post-processing pipeline over an executed result
pub fn sanitize_report(
    report: Report,
    query: &AnalyticsQuery,
    config: &EngineConfig,
) -> Result<Report> {
    let tz = parse_tz(&query.timezone)?;
    let mut report = canonicalize(report, query)?;

    let mut bucket_keys = Vec::new();
    if let Some(granularity) = query.time_bucket {
        bucket_keys = expected_buckets(query.from, query.to, granularity, tz)?;
        report = gap_fill(report, &bucket_keys)?;
        report = sort_by_datetime(report)?;
        if query.limit == LimitMode::Default && !query.group_bys.is_empty() {
            report = limit_timestamped(report, config.results_limit)?;
        }
    } else if query.limit == LimitMode::Default && query.group_bys.len() >= 2 {
        report = limit_multi_breakdown(report, config.results_limit);
    }

    report = sanitize_bucket_ranges(report, query);
    report = relabel_headers(report, query);

    if query.combination == Combination::Each {
        if query.time_bucket.is_some() && query.group_bys.is_empty() {
            report = pivot_each(report, query, &bucket_keys)?;
        } else {
            report = strip_event_index(report);
        }
    }

    Ok(report)
}

/// Headers the compiled plan produces, in canonical order
fn expected_headers(query: &AnalyticsQuery) -> Vec<String> {
    let mut headers = Vec::new();
    if query.time_bucket.is_some() {
        headers.push(HEADER_DATETIME.to_string());
    }
    if query.combination == Combination::Each {
        headers.push(HEADER_EVENT_NAME.to_string());
        headers.push(HEADER_EVENT_INDEX.to_string());
    }
    for index in 0..query.group_bys.len() {
        headers.push(group_key_alias(index));
    }
    headers.push(HEADER_COUNT.to_string());
    headers
}

/// Reorder columns into canonical order and normalize datetime cells.
///
/// The backend parses JSON objects, so column order off the wire is not
/// guaranteed; everything downstream relies on the canonical layout.
fn canonicalize(report: Report, query: &AnalyticsQuery) -> Result<Report> {
    let expected = expected_headers(query);

    if report.rows.is_empty() {
        return Ok(Report::new(expected, Vec::new()));
    }

    let positions: Vec<usize> = expected
        .iter()
        .map(|header| {
            report.header_index(header).ok_or_else(|| {
                AnalyticsError::MalformedResult(format!("missing expected column '{}'", header))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let datetime_slot = if query.time_bucket.is_some() {
        Some(0)
    } else {
        None
    };

    let mut rows = Vec::with_capacity(report.rows.len());
    for row in &report.rows {
        let mut out = Vec::with_capacity(positions.len());
        for (slot, &position) in positions.iter().enumerate() {
            let value = row.get(position).cloned().unwrap_or(Value::Null);
            if Some(slot) == datetime_slot {
                let raw = value_to_string(&value);
                let normalized = normalize_datetime_key(&raw).ok_or_else(|| {
                    AnalyticsError::MalformedResult(format!("unparseable datetime '{}'", raw))
                })?;
                out.push(Value::String(normalized));
            } else {
                out.push(value);
            }
        }
        rows.push(out);
    }

    Ok(Report::new(expected, rows))
}

/// Insert a zero-valued row for every (combination, bucket) pair missing from
/// the raw result, so each retained combination forms a contiguous series
fn gap_fill(mut report: Report, bucket_keys: &[String]) -> Result<Report> {
    let datetime_idx = required_header(&report, HEADER_DATETIME)?;
    let count_idx = required_header(&report, HEADER_COUNT)?;
    let key_idxs: Vec<usize> = (0..report.headers.len())
        .filter(|&i| i != datetime_idx && i != count_idx)
        .collect();

    // Distinct combinations in first-seen order
    let mut combos: Vec<Vec<Value>> = Vec::new();
    let mut seen_combos = HashSet::new();
    let mut present = HashSet::new();

    for row in &report.rows {
        let combo: Vec<Value> = key_idxs.iter().map(|&i| row[i].clone()).collect();
        let combo_key = encode_values(&combo);
        if seen_combos.insert(combo_key.clone()) {
            combos.push(combo);
        }
        present.insert((combo_key, value_to_string(&row[datetime_idx])));
    }

    // No breakdowns: a single empty combination still gets a complete series
    if key_idxs.is_empty() && combos.is_empty() {
        combos.push(Vec::new());
    }

    for combo in &combos {
        let combo_key = encode_values(combo);
        for bucket in bucket_keys {
            if present.contains(&(combo_key.clone(), bucket.clone())) {
                continue;
            }
            let mut row = vec![Value::Null; report.headers.len()];
            row[datetime_idx] = Value::String(bucket.clone());
            row[count_idx] = Value::from(0);
            for (slot, &i) in key_idxs.iter().enumerate() {
                row[i] = combo[slot].clone();
            }
            report.rows.push(row);
        }
    }

    Ok(report)
}

/// Stable re-sort by bucket ascending; gap-filling appends out of order
fn sort_by_datetime(mut report: Report) -> Result<Report> {
    let datetime_idx = required_header(&report, HEADER_DATETIME)?;
    report
        .rows
        .sort_by_key(|row| value_to_string(&row[datetime_idx]));
    Ok(report)
}

/// Time-bucketed limiting: rank combinations by total magnitude, keep the top
/// K, and retain every bucket row of a kept combination
fn limit_timestamped(mut report: Report, k: usize) -> Result<Report> {
    let datetime_idx = required_header(&report, HEADER_DATETIME)?;
    let count_idx = required_header(&report, HEADER_COUNT)?;
    let key_idxs: Vec<usize> = (0..report.headers.len())
        .filter(|&i| i != datetime_idx && i != count_idx)
        .collect();

    let mut order: Vec<String> = Vec::new();
    let mut totals: HashMap<String, f64> = HashMap::new();
    for row in &report.rows {
        let combo_key = encode_row(row, &key_idxs);
        if !totals.contains_key(&combo_key) {
            order.push(combo_key.clone());
        }
        *totals.entry(combo_key).or_insert(0.0) += value_to_f64(&row[count_idx]);
    }

    if order.len() <= k {
        return Ok(report);
    }

    // Stable sort keeps first-seen order among equal totals
    order.sort_by(|a, b| {
        totals[b]
            .partial_cmp(&totals[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let kept: HashSet<&String> = order.iter().take(k).collect();

    report
        .rows
        .retain(|row| kept.contains(&encode_row(row, &key_idxs)));
    Ok(report)
}

/// Multi-breakdown limiting without a time bucket: cap distinct all-but-last
/// prefixes and, within each, distinct last values, bounding output at K x K.
/// Rows arrive ranked by magnitude, so earlier rows win the caps.
fn limit_multi_breakdown(mut report: Report, k: usize) -> Report {
    let key_idxs: Vec<usize> = report
        .headers
        .iter()
        .enumerate()
        .filter(|(_, h)| h.starts_with(GROUP_KEY_PREFIX))
        .map(|(i, _)| i)
        .collect();
    if key_idxs.len() < 2 {
        return report;
    }
    let (prefix_idxs, last_idx) = (
        &key_idxs[..key_idxs.len() - 1],
        key_idxs[key_idxs.len() - 1],
    );

    let mut prefixes: Vec<String> = Vec::new();
    let mut last_values: HashMap<String, HashSet<String>> = HashMap::new();

    let rows = std::mem::take(&mut report.rows);
    for row in rows {
        let prefix = encode_row(&row, prefix_idxs);
        let last = value_to_string(&row[last_idx]);

        let known_prefix = last_values.contains_key(&prefix);
        if !known_prefix {
            if prefixes.len() >= k {
                continue;
            }
            prefixes.push(prefix.clone());
        }
        let entry = last_values.entry(prefix).or_default();
        if !entry.contains(&last) {
            if entry.len() >= k {
                continue;
            }
            entry.insert(last);
        }
        report.rows.push(row);
    }

    report
}

/// Collapse degenerate bucket ranges and strip trailing `.0` on bucketed
/// breakdown columns
fn sanitize_bucket_ranges(mut report: Report, query: &AnalyticsQuery) -> Report {
    for (index, spec) in query.group_bys.iter().enumerate() {
        if !spec.bucketed {
            continue;
        }
        let Some(column) = report.header_index(&group_key_alias(index)) else {
            continue;
        };
        for row in &mut report.rows {
            if let Value::String(s) = &row[column] {
                row[column] = Value::String(sanitize_bucket_range(s));
            }
        }
    }
    report
}

/// `"5.0 - 5.0"` collapses to `"5"`; `"1.0 - 2.5"` becomes `"1 - 2.5"`
pub fn sanitize_bucket_range(range: &str) -> String {
    if range == NONE_TOKEN {
        return range.to_string();
    }
    let Some((start, end)) = range.split_once(" - ") else {
        return range.to_string();
    };
    let (Ok(start_num), Ok(end_num)) = (start.parse::<f64>(), end.parse::<f64>()) else {
        return range.to_string();
    };
    if start_num == end_num {
        strip_trailing_zero(start)
    } else {
        format!(
            "{} - {}",
            strip_trailing_zero(start),
            strip_trailing_zero(end)
        )
    }
}

fn strip_trailing_zero(s: &str) -> String {
    s.strip_suffix(".0").unwrap_or(s).to_string()
}

/// Replace internal group-key aliases with caller-supplied property names.
/// Must run last so earlier stages can match on stable internal names.
fn relabel_headers(mut report: Report, query: &AnalyticsQuery) -> Report {
    for (index, spec) in query.group_bys.iter().enumerate() {
        let alias = group_key_alias(index);
        if let Some(position) = report.header_index(&alias) {
            report.headers[position] = spec.property.clone();
        }
    }
    report
}

/// EACH reshaping: one row per bucket, one column per event in declared
/// order, with per-event totals recorded in the report metadata
fn pivot_each(report: Report, query: &AnalyticsQuery, bucket_keys: &[String]) -> Result<Report> {
    let datetime_idx = required_header(&report, HEADER_DATETIME)?;
    let event_index_idx = required_header(&report, HEADER_EVENT_INDEX)?;
    let count_idx = required_header(&report, HEADER_COUNT)?;

    let mut cells: HashMap<(String, usize), f64> = HashMap::new();
    for row in &report.rows {
        let bucket = value_to_string(&row[datetime_idx]);
        let event_index = value_to_f64(&row[event_index_idx]) as usize;
        *cells.entry((bucket, event_index)).or_insert(0.0) +=
            value_to_f64(&row[count_idx]);
    }

    let labels: Vec<String> = (0..query.events.len())
        .map(|i| query.event_label(i))
        .collect();

    let mut headers = Vec::with_capacity(labels.len() + 1);
    headers.push(HEADER_DATETIME.to_string());
    headers.extend(labels.iter().cloned());

    let mut rows = Vec::with_capacity(bucket_keys.len());
    for bucket in bucket_keys {
        let mut row = Vec::with_capacity(headers.len());
        row.push(Value::String(bucket.clone()));
        for event_index in 0..labels.len() {
            let value = cells
                .get(&(bucket.clone(), event_index))
                .copied()
                .unwrap_or(0.0);
            row.push(Value::from(value));
        }
        rows.push(row);
    }

    let mut pivoted = Report::new(headers, rows);
    pivoted.meta = report.meta;
    for (event_index, label) in labels.iter().enumerate() {
        let total: f64 = cells
            .iter()
            .filter(|((_, i), _)| *i == event_index)
            .map(|(_, v)| v)
            .sum();
        pivoted.meta.metrics.push(HeaderMetric {
            kind: METRIC_EACH_EVENT_TOTAL.to_string(),
            header: label.clone(),
            value: total,
        });
    }

    Ok(pivoted)
}

/// Drop the internal declared-order annotation from unpivoted EACH output
fn strip_event_index(mut report: Report) -> Report {
    let Some(position) = report.header_index(HEADER_EVENT_INDEX) else {
        return report;
    };
    report.headers.remove(position);
    for row in &mut report.rows {
        if position < row.len() {
            row.remove(position);
        }
    }
    report
}

fn required_header(report: &Report, name: &str) -> Result<usize> {
    report
        .header_index(name)
        .ok_or_else(|| AnalyticsError::MalformedResult(format!("missing column '{}'", name)))
}

fn encode_row(row: &[Value], idxs: &[usize]) -> String {
    let mut out = String::new();
    for (n, &i) in idxs.iter().enumerate() {
        if n > 0 {
            out.push(KEY_SEPARATOR);
        }
        out.push_str(&value_to_string(&row[i]));
    }
    out
}

fn encode_values(values: &[Value]) -> String {
    let mut out = String::new();
    for (n, value) in values.iter().enumerate() {
        if n > 0 {
            out.push(KEY_SEPARATOR);
        }
        out.push_str(&value_to_string(value));
    }
    out
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn value_to_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}
