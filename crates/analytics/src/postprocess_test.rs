//! Tests for report post-processing

use serde_json::json;

use crate::postprocess::{sanitize_bucket_range, sanitize_report};
use crate::query::{
    AnalyticsQuery, Combination, EngineConfig, Entity, EventSpec, Granularity, GroupBySpec,
    QueryClass,
};
use crate::report::Report;

// 2024-01-15 00:00:00 UTC
const FROM: i64 = 1_705_276_800;
// Three days later
const TO_3D: i64 = FROM + 3 * 86_400;

fn day(n: u32) -> String {
    format!("2024-01-{:02} 00:00:00", 14 + n)
}

fn base_query() -> AnalyticsQuery {
    AnalyticsQuery::new(QueryClass::UniqueUsers, Combination::Any, FROM, TO_3D)
        .with_event(EventSpec::new("signup"))
}

fn limited_config(results_limit: usize) -> EngineConfig {
    EngineConfig {
        results_limit,
        ..EngineConfig::default()
    }
}

#[test]
fn test_canonicalize_reorders_columns() {
    let query = base_query().with_time_bucket(Granularity::Day);
    // Column order off the wire is not guaranteed
    let raw = Report::new(
        vec!["count".to_string(), "datetime".to_string()],
        vec![vec![json!(5), json!(day(1))]],
    );
    let report = sanitize_report(raw, &query, &EngineConfig::default()).unwrap();
    assert_eq!(report.headers, vec!["datetime", "count"]);
    assert_eq!(report.rows[0][0], json!(day(1)));
    assert_eq!(report.rows[0][1], json!(5));
}

#[test]
fn test_missing_column_is_malformed() {
    let query = base_query().with_time_bucket(Granularity::Day);
    let raw = Report::new(
        vec!["datetime".to_string(), "unexpected".to_string()],
        vec![vec![json!(day(1)), json!(1)]],
    );
    assert!(sanitize_report(raw, &query, &EngineConfig::default()).is_err());
}

#[test]
fn test_gap_fill_and_sort() {
    let query = base_query().with_time_bucket(Granularity::Day);
    // Day 2 missing, days out of order, ISO formatting from the wire
    let raw = Report::new(
        vec!["datetime".to_string(), "count".to_string()],
        vec![
            vec![json!("2024-01-17T00:00:00"), json!(2)],
            vec![json!(day(1)), json!(5)],
        ],
    );
    let report = sanitize_report(raw, &query, &EngineConfig::default()).unwrap();
    assert_eq!(report.rows.len(), 3);
    assert_eq!(report.rows[0], vec![json!(day(1)), json!(5)]);
    assert_eq!(report.rows[1], vec![json!(day(2)), json!(0)]);
    assert_eq!(report.rows[2], vec![json!(day(3)), json!(2)]);
}

#[test]
fn test_empty_bucketed_result_yields_zero_series() {
    let query = base_query().with_time_bucket(Granularity::Day);
    let raw = Report::new(Vec::new(), Vec::new());
    let report = sanitize_report(raw, &query, &EngineConfig::default()).unwrap();
    assert_eq!(report.headers, vec!["datetime", "count"]);
    assert_eq!(report.rows.len(), 3);
    assert!(report.rows.iter().all(|row| row[1] == json!(0)));
}

#[test]
fn test_gap_fill_per_combination() {
    let query = base_query()
        .with_time_bucket(Granularity::Day)
        .with_group_by(GroupBySpec::categorical("plan", Entity::Event));
    let raw = Report::new(
        vec![
            "datetime".to_string(),
            "_group_key_0".to_string(),
            "count".to_string(),
        ],
        vec![
            vec![json!(day(1)), json!("pro"), json!(5)],
            vec![json!(day(3)), json!("free"), json!(1)],
        ],
    );
    let report = sanitize_report(raw, &query, &EngineConfig::default()).unwrap();
    // Two combinations, three buckets each
    assert_eq!(report.rows.len(), 6);
    let pro_rows: Vec<_> = report
        .rows
        .iter()
        .filter(|row| row[1] == json!("pro"))
        .collect();
    assert_eq!(pro_rows.len(), 3);
    assert_eq!(pro_rows[1][2], json!(0));
}

#[test]
fn test_timestamped_limiting_keeps_top_combinations_whole() {
    let query = base_query()
        .with_time_bucket(Granularity::Day)
        .with_group_by(GroupBySpec::categorical("plan", Entity::Event));
    let raw = Report::new(
        vec![
            "datetime".to_string(),
            "_group_key_0".to_string(),
            "count".to_string(),
        ],
        vec![
            vec![json!(day(1)), json!("pro"), json!(5)],
            vec![json!(day(1)), json!("free"), json!(4)],
            vec![json!(day(3)), json!("pro"), json!(2)],
        ],
    );
    let report = sanitize_report(raw, &query, &limited_config(1)).unwrap();
    // "pro" totals 7 and wins; its whole gap-filled series survives
    assert_eq!(report.rows.len(), 3);
    assert!(report.rows.iter().all(|row| row[1] == json!("pro")));
    assert_eq!(report.rows[1][2], json!(0));
}

#[test]
fn test_timestamped_limiting_not_applied_under_cap() {
    let query = base_query()
        .with_time_bucket(Granularity::Day)
        .with_group_by(GroupBySpec::categorical("plan", Entity::Event));
    let raw = Report::new(
        vec![
            "datetime".to_string(),
            "_group_key_0".to_string(),
            "count".to_string(),
        ],
        vec![
            vec![json!(day(1)), json!("pro"), json!(5)],
            vec![json!(day(1)), json!("free"), json!(4)],
        ],
    );
    let report = sanitize_report(raw, &query, &limited_config(2)).unwrap();
    assert_eq!(report.rows.len(), 6);
}

#[test]
fn test_multi_breakdown_limiting_caps_prefixes_and_last_values() {
    let query = base_query()
        .with_group_by(GroupBySpec::categorical("country", Entity::User))
        .with_group_by(GroupBySpec::categorical("plan", Entity::Event));
    // Rows arrive ranked by count descending
    let raw = Report::new(
        vec![
            "_group_key_0".to_string(),
            "_group_key_1".to_string(),
            "count".to_string(),
        ],
        vec![
            vec![json!("US"), json!("pro"), json!(10)],
            vec![json!("US"), json!("free"), json!(8)],
            vec![json!("DE"), json!("pro"), json!(7)],
            vec![json!("US"), json!("trial"), json!(6)],
            vec![json!("DE"), json!("free"), json!(5)],
            vec![json!("FR"), json!("pro"), json!(4)],
        ],
    );
    let report = sanitize_report(raw, &query, &limited_config(2)).unwrap();
    // Third last-value for US and third prefix FR are dropped
    assert_eq!(report.headers, vec!["country", "plan", "count"]);
    assert_eq!(
        report
            .rows
            .iter()
            .map(|row| (row[0].as_str().unwrap(), row[1].as_str().unwrap()))
            .collect::<Vec<_>>(),
        vec![("US", "pro"), ("US", "free"), ("DE", "pro"), ("DE", "free")]
    );
}

#[test]
fn test_single_breakdown_not_limited_in_postprocessing() {
    let query = base_query().with_group_by(GroupBySpec::categorical("plan", Entity::Event));
    let raw = Report::new(
        vec!["_group_key_0".to_string(), "count".to_string()],
        vec![
            vec![json!("pro"), json!(5)],
            vec![json!("free"), json!(4)],
            vec![json!("trial"), json!(3)],
        ],
    );
    let report = sanitize_report(raw, &query, &limited_config(1)).unwrap();
    // The server already capped single-breakdown results
    assert_eq!(report.rows.len(), 3);
    assert_eq!(report.headers, vec!["plan", "count"]);
}

#[test]
fn test_bucket_range_cells_sanitized() {
    let query = base_query().with_group_by(GroupBySpec::bucketed("amount", Entity::Event));
    let raw = Report::new(
        vec!["_group_key_0".to_string(), "count".to_string()],
        vec![
            vec![json!("$none"), json!(9)],
            vec![json!("5.0 - 5.0"), json!(4)],
            vec![json!("1.0 - 2.5"), json!(3)],
        ],
    );
    let report = sanitize_report(raw, &query, &EngineConfig::default()).unwrap();
    assert_eq!(report.rows[0][0], json!("$none"));
    assert_eq!(report.rows[1][0], json!("5"));
    assert_eq!(report.rows[2][0], json!("1 - 2.5"));
}

#[test]
fn test_sanitize_bucket_range() {
    assert_eq!(sanitize_bucket_range("5.0 - 5.0"), "5");
    assert_eq!(sanitize_bucket_range("1.0 - 2.5"), "1 - 2.5");
    assert_eq!(sanitize_bucket_range("10.5 - 10.5"), "10.5");
    assert_eq!(sanitize_bucket_range("$none"), "$none");
    assert_eq!(sanitize_bucket_range("oddball"), "oddball");
}

#[test]
fn test_each_pivot() {
    let query = AnalyticsQuery::new(QueryClass::Occurrence, Combination::Each, FROM, TO_3D)
        .with_event(EventSpec::new("signup"))
        .with_event(EventSpec::new("login"))
        .with_time_bucket(Granularity::Day);
    let raw = Report::new(
        vec![
            "datetime".to_string(),
            "event_name".to_string(),
            "event_index".to_string(),
            "count".to_string(),
        ],
        vec![
            vec![json!(day(1)), json!("signup"), json!(0), json!(3)],
            vec![json!(day(2)), json!("login"), json!(1), json!(2)],
        ],
    );
    let report = sanitize_report(raw, &query, &EngineConfig::default()).unwrap();
    assert_eq!(report.headers, vec!["datetime", "signup", "login"]);
    assert_eq!(report.rows.len(), 3);
    assert_eq!(report.rows[0], vec![json!(day(1)), json!(3.0), json!(0.0)]);
    assert_eq!(report.rows[1], vec![json!(day(2)), json!(0.0), json!(2.0)]);
    assert_eq!(report.rows[2], vec![json!(day(3)), json!(0.0), json!(0.0)]);

    let totals: Vec<_> = report
        .meta
        .metrics
        .iter()
        .map(|m| (m.header.as_str(), m.value))
        .collect();
    assert_eq!(totals, vec![("signup", 3.0), ("login", 2.0)]);
}

#[test]
fn test_each_pivot_uses_aliases() {
    let query = AnalyticsQuery::new(QueryClass::Occurrence, Combination::Each, FROM, TO_3D)
        .with_event(EventSpec::new("signup").with_alias("New Users"))
        .with_event(EventSpec::new("login"))
        .with_time_bucket(Granularity::Day);
    let raw = Report::new(
        vec![
            "datetime".to_string(),
            "event_name".to_string(),
            "event_index".to_string(),
            "count".to_string(),
        ],
        Vec::new(),
    );
    let report = sanitize_report(raw, &query, &EngineConfig::default()).unwrap();
    assert_eq!(report.headers, vec!["datetime", "New Users", "login"]);
}

#[test]
fn test_each_with_breakdown_not_pivoted() {
    let query = AnalyticsQuery::new(QueryClass::Occurrence, Combination::Each, FROM, TO_3D)
        .with_event(EventSpec::new("signup"))
        .with_event(EventSpec::new("login"))
        .with_group_by(GroupBySpec::categorical("plan", Entity::Event));
    let raw = Report::new(
        vec![
            "event_name".to_string(),
            "event_index".to_string(),
            "_group_key_0".to_string(),
            "count".to_string(),
        ],
        vec![vec![json!("signup"), json!(0), json!("pro"), json!(3)]],
    );
    let report = sanitize_report(raw, &query, &EngineConfig::default()).unwrap();
    // Tabular output keeps the event column, drops the internal index
    assert_eq!(report.headers, vec!["event_name", "plan", "count"]);
    assert_eq!(report.rows[0], vec![json!("signup"), json!("pro"), json!(3)]);
}

#[test]
fn test_unbucketed_empty_result_keeps_headers() {
    let query = base_query().with_group_by(GroupBySpec::categorical("plan", Entity::Event));
    let raw = Report::new(Vec::new(), Vec::new());
    let report = sanitize_report(raw, &query, &EngineConfig::default()).unwrap();
    assert_eq!(report.headers, vec!["plan", "count"]);
    assert!(report.rows.is_empty());
}
