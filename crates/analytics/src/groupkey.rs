//! Group-key compilation
//!
//! Produces breakdown-column expressions: categorical values with the
//! `$none` substitution, datetime properties truncated in the query timezone,
//! and the two-phase percentile bucketing plan for numeric properties.

use crate::error::{AnalyticsError, Result};
use crate::filter::property_fragment;
use crate::plan::{Fragment, FromNode, SelectNode};
use crate::query::{GroupBySpec, ValueType};
use crate::report::{group_key_alias, NONE_TOKEN};

/// Equal-width buckets between the percentile bounds
pub const NUM_BUCKETS: usize = 8;

/// Lower percentile of the bucketing bounds
pub const LOWER_PERCENTILE: f64 = 0.02;

/// Upper percentile of the bucketing bounds
pub const UPPER_PERCENTILE: f64 = 0.98;

/// SELECT fragment for one breakdown, aliased to its internal name.
///
/// Numeric bucketed keys select the raw value here; bucket assignment happens
/// in the aggregation stage once the combined set exists.
pub fn group_key_select(spec: &GroupBySpec, index: usize, timezone: &str) -> Result<Fragment> {
    let alias = group_key_alias(index);
    let prop = property_fragment(spec.entity, &spec.property);

    match spec.value_type {
        ValueType::Categorical | ValueType::Numerical => {
            // Null and empty string both collapse to the sentinel
            let mut params = prop.params.clone();
            params.extend(prop.params);
            Ok(Fragment::with_params(
                format!(
                    "CASE WHEN {sql} = '' THEN '{none}' ELSE {sql} END",
                    sql = prop.sql,
                    none = NONE_TOKEN
                ),
                params,
            )
            .aliased(&alias))
        }
        ValueType::Datetime => {
            let granularity = spec.granularity.ok_or_else(|| {
                AnalyticsError::InvalidQuery(format!(
                    "datetime group by '{}' requires a granularity",
                    spec.property
                ))
            })?;
            let localized = format!(
                "toTimeZone(toDateTime(toInt64OrZero({})), '{}')",
                prop.sql, timezone
            );
            Ok(Fragment::with_params(
                format!("toString({})", granularity.truncate_expr(&localized)),
                prop.params,
            )
            .aliased(&alias))
        }
    }
}

/// Name of the bounds CTE for one bucketed key
pub fn bounds_cte_name(index: usize) -> String {
    format!("{}_bounds", group_key_alias(index))
}

/// Bucket-index column alias for one bucketed key
pub fn bucket_alias(index: usize) -> String {
    format!("{}_bucket", group_key_alias(index))
}

/// Numeric-value column alias for one bucketed key
pub fn value_alias(index: usize) -> String {
    format!("{}_value", group_key_alias(index))
}

/// Percentile-bounds node over the combined set, excluding sentinel rows.
///
/// The lower bound is nudged up so values exactly on it land in bucket 1.
pub fn bounds_node(source: &str, index: usize) -> SelectNode {
    let key = group_key_alias(index);
    let mut node = SelectNode::new(FromNode::Cte(source.to_string()));
    node.columns.push(Fragment::new(format!(
        "quantile({})(toFloat64OrZero({})) + 0.00001 AS lbound",
        LOWER_PERCENTILE, key
    )));
    node.columns.push(Fragment::new(format!(
        "quantile({})(toFloat64OrZero({})) AS ubound",
        UPPER_PERCENTILE, key
    )));
    node.where_clauses
        .push(Fragment::new(format!("{} != '{}'", key, NONE_TOKEN)));
    node
}

/// Bucket-index expression for one row; sentinel rows go to bucket -1
pub fn bucket_expr(index: usize) -> Fragment {
    let key = group_key_alias(index);
    let bounds = bounds_cte_name(index);
    Fragment::new(format!(
        "CASE WHEN {key} = '{none}' THEN -1 ELSE widthBucket(toFloat64OrZero({key}), \
         (SELECT lbound FROM {bounds}), \
         (SELECT if(ubound = lbound, ubound + 1, ubound) FROM {bounds}), {n}) END",
        key = key,
        none = NONE_TOKEN,
        bounds = bounds,
        n = NUM_BUCKETS
    ))
    .aliased(&bucket_alias(index))
}

/// Numeric value carried alongside the bucket index for range display
pub fn bucket_value_expr(index: usize) -> Fragment {
    let key = group_key_alias(index);
    Fragment::new(format!(
        "CASE WHEN {key} = '{none}' THEN 0 ELSE toFloat64OrZero({key}) END",
        key = key,
        none = NONE_TOKEN
    ))
    .aliased(&value_alias(index))
}

/// Display expression for a bucket in the final SELECT: the observed
/// `min - max` range within the bucket, with sentinel rows shown as `$none`
pub fn bucket_display_expr(index: usize) -> Fragment {
    Fragment::new(format!(
        "CASE WHEN {bucket} = -1 THEN '{none}' ELSE \
         concat(toString(round(min({value}), 1)), ' - ', toString(round(max({value}), 1))) END",
        bucket = bucket_alias(index),
        none = NONE_TOKEN,
        value = value_alias(index)
    ))
    .aliased(&group_key_alias(index))
}

/// Aggregate-property value per row, with empty/null treated as zero
pub fn aggregate_value_select(spec: &crate::query::AggregateSpec) -> Fragment {
    let prop = property_fragment(spec.entity, &spec.property);
    Fragment::with_params(
        format!("coalesce(toFloat64OrNull({}), 0)", prop.sql),
        prop.params,
    )
    .aliased("agg_value")
}
