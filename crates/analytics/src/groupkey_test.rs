//! Tests for breakdown column compilation

use beacon_query::SqlParam;

use crate::groupkey::{
    bounds_cte_name, bounds_node, bucket_alias, bucket_display_expr, bucket_expr,
    bucket_value_expr, group_key_select, NUM_BUCKETS,
};
use crate::plan::QueryPlan;
use crate::query::{
    AggregateFunction, AggregateSpec, Entity, Granularity, GroupBySpec,
};

#[test]
fn test_categorical_key_substitutes_none() {
    let spec = GroupBySpec::categorical("plan", Entity::Event);
    let fragment = group_key_select(&spec, 0, "UTC").unwrap();
    assert_eq!(
        fragment.sql,
        "CASE WHEN JSONExtractString(properties, ?) = '' THEN '$none' \
         ELSE JSONExtractString(properties, ?) END AS _group_key_0"
    );
    // Property bound once per occurrence in the expression
    assert_eq!(
        fragment.params,
        vec![SqlParam::from("plan"), SqlParam::from("plan")]
    );
}

#[test]
fn test_user_scoped_key_reads_user_properties() {
    let spec = GroupBySpec::categorical("country", Entity::User);
    let fragment = group_key_select(&spec, 2, "UTC").unwrap();
    assert!(fragment.sql.contains("JSONExtractString(user_properties, ?)"));
    assert!(fragment.sql.ends_with("AS _group_key_2"));
}

#[test]
fn test_datetime_key_truncates_in_timezone() {
    let spec = GroupBySpec::datetime("signup_date", Entity::User, Granularity::Month);
    let fragment = group_key_select(&spec, 1, "America/New_York").unwrap();
    assert_eq!(
        fragment.sql,
        "toString(toStartOfMonth(toTimeZone(toDateTime(toInt64OrZero(\
         JSONExtractString(user_properties, ?))), 'America/New_York'))) AS _group_key_1"
    );
    assert_eq!(fragment.params, vec![SqlParam::from("signup_date")]);
}

#[test]
fn test_datetime_key_week_anchors_monday() {
    let spec = GroupBySpec::datetime("signup_date", Entity::User, Granularity::Week);
    let fragment = group_key_select(&spec, 0, "UTC").unwrap();
    assert!(fragment.sql.contains("toStartOfWeek("));
    assert!(fragment.sql.contains(", 1)"));
}

#[test]
fn test_datetime_key_without_granularity_rejected() {
    let mut spec = GroupBySpec::datetime("signup_date", Entity::User, Granularity::Day);
    spec.granularity = None;
    assert!(group_key_select(&spec, 0, "UTC").is_err());
}

#[test]
fn test_bucketed_key_selects_raw_value() {
    // Bucket assignment is deferred; the step emits the sentinel-substituted value
    let spec = GroupBySpec::bucketed("amount", Entity::Event);
    let fragment = group_key_select(&spec, 0, "UTC").unwrap();
    assert!(fragment.sql.contains("'$none'"));
    assert!(!fragment.sql.contains("widthBucket"));
}

#[test]
fn test_bounds_node_percentiles() {
    let rendered = QueryPlan {
        ctes: Vec::new(),
        root: bounds_node("combined", 0),
    }
    .render();
    assert!(rendered
        .sql
        .contains("quantile(0.02)(toFloat64OrZero(_group_key_0)) + 0.00001 AS lbound"));
    assert!(rendered
        .sql
        .contains("quantile(0.98)(toFloat64OrZero(_group_key_0)) AS ubound"));
    assert!(rendered.sql.contains("_group_key_0 != '$none'"));
}

#[test]
fn test_bucket_expr_sentinel_and_width() {
    let fragment = bucket_expr(1);
    assert!(fragment.sql.starts_with("CASE WHEN _group_key_1 = '$none' THEN -1"));
    assert!(fragment
        .sql
        .contains(&format!("{})", NUM_BUCKETS)));
    // Degenerate bounds widen to a non-empty interval
    assert!(fragment.sql.contains("if(ubound = lbound, ubound + 1, ubound)"));
    assert!(fragment.sql.ends_with("AS _group_key_1_bucket"));
}

#[test]
fn test_bucket_value_expr() {
    let fragment = bucket_value_expr(0);
    assert!(fragment.sql.contains("toFloat64OrZero(_group_key_0)"));
    assert!(fragment.sql.ends_with("AS _group_key_0_value"));
}

#[test]
fn test_bucket_display_range() {
    let fragment = bucket_display_expr(0);
    assert!(fragment.sql.contains("CASE WHEN _group_key_0_bucket = -1 THEN '$none'"));
    assert!(fragment.sql.contains("' - '"));
    assert!(fragment.sql.contains("round(min(_group_key_0_value), 1)"));
    assert!(fragment.sql.contains("round(max(_group_key_0_value), 1)"));
    assert!(fragment.sql.ends_with("AS _group_key_0"));
}

#[test]
fn test_bucket_aliases() {
    assert_eq!(bounds_cte_name(0), "_group_key_0_bounds");
    assert_eq!(bucket_alias(2), "_group_key_2_bucket");
}

#[test]
fn test_aggregate_value_select() {
    let spec = AggregateSpec {
        entity: Entity::Event,
        property: "revenue".to_string(),
        function: AggregateFunction::Sum,
    };
    let fragment = crate::groupkey::aggregate_value_select(&spec);
    assert_eq!(
        fragment.sql,
        "coalesce(toFloat64OrNull(JSONExtractString(properties, ?)), 0) AS agg_value"
    );
    assert_eq!(fragment.params, vec![SqlParam::from("revenue")]);
}
