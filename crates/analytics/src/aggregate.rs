//! Aggregation stage and compilation entry point
//!
//! Wraps the combined set with grouping, aggregate selection, ordering, and
//! limiting, splicing in the percentile bucket plan when a numeric breakdown
//! requests it. `compile_query` is the single dispatch point over the
//! query's class and combination semantics.

use crate::combine::assemble;
use crate::error::Result;
use crate::groupkey::{
    bounds_cte_name, bounds_node, bucket_alias, bucket_display_expr, bucket_expr,
    bucket_value_expr,
};
use crate::plan::{CompiledQuery, Fragment, FromNode, PlanNode, QueryPlan, SelectNode};
use crate::query::{AnalyticsQuery, Combination, EngineConfig, LimitMode, QueryClass};
use crate::report::{group_key_alias, HEADER_COUNT, HEADER_DATETIME};

/// Compile a query into SQL text plus positional bind parameters.
///
/// Configuration errors surface here; a compiled query is safe to execute.
pub fn compile_query(query: &AnalyticsQuery, config: &EngineConfig) -> Result<CompiledQuery> {
    query.validate()?;

    let combined = assemble(query, config)?;
    let mut ctes = combined.ctes;
    let mut source = combined.source;

    let bucketed_keys: Vec<usize> = query
        .group_bys
        .iter()
        .enumerate()
        .filter(|(_, spec)| spec.bucketed)
        .map(|(i, _)| i)
        .collect();

    // Percentile bounds run once over the combined snapshot, then every row
    // gets a bucket index; the final stage groups on indexes and re-derives
    // the display range
    if !bucketed_keys.is_empty() {
        for &index in &bucketed_keys {
            ctes.push((
                bounds_cte_name(index),
                PlanNode::Select(bounds_node(&source, index)),
            ));
        }

        let mut bucketed = SelectNode::new(FromNode::Cte(source.clone()));
        bucketed.columns.push(Fragment::new("user_id"));
        bucketed.columns.push(Fragment::new("timestamp"));
        if query.time_bucket.is_some() {
            bucketed.columns.push(Fragment::new("datetime"));
        }
        if combined.has_event_columns {
            bucketed.columns.push(Fragment::new("event_name"));
            bucketed.columns.push(Fragment::new("event_index"));
        }
        for (key_index, spec) in query.group_bys.iter().enumerate() {
            if spec.bucketed {
                bucketed.columns.push(bucket_expr(key_index));
                bucketed.columns.push(bucket_value_expr(key_index));
            } else {
                bucketed
                    .columns
                    .push(Fragment::new(group_key_alias(key_index)));
            }
        }
        if query.aggregate.is_some() {
            bucketed.columns.push(Fragment::new("agg_value"));
        }

        ctes.push(("bucketed".to_string(), PlanNode::Select(bucketed)));
        source = "bucketed".to_string();
    }

    let mut root = SelectNode::new(FromNode::Cte(source));

    if query.time_bucket.is_some() {
        root.columns.push(Fragment::new(HEADER_DATETIME));
        root.group_by.push(HEADER_DATETIME.to_string());
    }
    if combined.has_event_columns {
        root.columns.push(Fragment::new("event_name"));
        root.columns.push(Fragment::new("event_index"));
        root.group_by.push("event_name".to_string());
        root.group_by.push("event_index".to_string());
    }
    for (key_index, spec) in query.group_bys.iter().enumerate() {
        if spec.bucketed {
            root.columns.push(bucket_display_expr(key_index));
            root.group_by.push(bucket_alias(key_index));
        } else {
            let alias = group_key_alias(key_index);
            root.columns.push(Fragment::new(alias.clone()));
            root.group_by.push(alias);
        }
    }

    let count_expr = match (&query.aggregate, query.class) {
        (Some(aggregate), _) => format!("{}(agg_value)", aggregate.function.sql_fn()),
        (None, QueryClass::UniqueUsers) => "count(DISTINCT user_id)".to_string(),
        (None, QueryClass::Occurrence) => "count(*)".to_string(),
    };
    root.columns
        .push(Fragment::new(count_expr).aliased(HEADER_COUNT));

    if query.time_bucket.is_some() {
        root.order_by.push(format!("{} ASC", HEADER_DATETIME));
    } else if !bucketed_keys.is_empty() {
        for &index in &bucketed_keys {
            root.order_by.push(format!("{} ASC", bucket_alias(index)));
        }
    } else {
        // Magnitude first; group keys break ties deterministically
        root.order_by.push(format!("{} DESC", HEADER_COUNT));
        for key_index in 0..query.group_bys.len() {
            root.order_by
                .push(format!("{} ASC", group_key_alias(key_index)));
        }
    }

    root.limit = Some(sql_limit(query, config));

    let compiled = QueryPlan { ctes, root }.render();

    tracing::debug!(
        class = ?query.class,
        combination = ?query.combination,
        events = query.events.len(),
        group_bys = query.group_bys.len(),
        params = compiled.params.len(),
        "compiled analytics query"
    );

    Ok(compiled)
}

/// Server-side row cap.
///
/// The tight cap applies only when post-processing cannot limit further:
/// exactly one breakdown, no time bucket, default limiting. Everything else
/// gets the safety cap and is limited after execution.
fn sql_limit(query: &AnalyticsQuery, config: &EngineConfig) -> usize {
    match query.limit {
        LimitMode::Download(n) => n,
        LimitMode::Unlimited => config.max_results_limit,
        LimitMode::Default => {
            if query.group_bys.len() == 1
                && query.time_bucket.is_none()
                && query.combination != Combination::Each
            {
                config.results_limit
            } else {
                config.max_results_limit
            }
        }
    }
}
