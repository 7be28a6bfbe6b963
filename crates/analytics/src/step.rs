//! Event-filter step builder
//!
//! Compiles one event (plus applicable global filters and the time range)
//! into an isolated, named sub-plan. Step names are positional and stable
//! within one compilation; the assembler references them by name.

use beacon_query::SqlParam;

use crate::error::Result;
use crate::filter::compile_filters;
use crate::groupkey::{aggregate_value_select, group_key_select};
use crate::plan::{Fragment, FromNode, SelectNode};
use crate::query::{AnalyticsQuery, EngineConfig};

/// How a step collapses matching rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupMode {
    /// One row per matching occurrence
    Raw,
    /// One row per user, earliest matching occurrence
    FirstPerUser,
    /// One row per user per time bucket, earliest occurrence in the bucket
    FirstPerUserPerBucket,
}

/// A compiled step: the CTE name, its plan node, and the breakdowns it emits
#[derive(Debug, Clone)]
pub struct StepPlan {
    pub name: String,
    pub node: SelectNode,
    /// Indexes into the query's group_bys that this step's columns cover
    pub key_indexes: Vec<usize>,
}

/// Positional CTE name for the step at `position` (1-based)
pub fn step_name(position: usize) -> String {
    format!("step_{}", position)
}

/// Compile one event into a named step.
///
/// `key_indexes` selects which of the query's breakdowns this step emits;
/// the assembler pads the rest so union arity stays aligned.
pub fn build_step(
    query: &AnalyticsQuery,
    config: &EngineConfig,
    event_index: usize,
    dedup: DedupMode,
    key_indexes: &[usize],
) -> Result<StepPlan> {
    let event = &query.events[event_index];
    let mut node = SelectNode::new(FromNode::Table(config.events_table.clone()));

    node.columns.push(Fragment::new("user_id"));
    node.columns.push(Fragment::new("timestamp"));

    if let Some(granularity) = query.time_bucket {
        let localized = format!("toTimeZone(timestamp, '{}')", query.timezone);
        node.columns.push(
            Fragment::new(format!(
                "toString({})",
                granularity.truncate_expr(&localized)
            ))
            .aliased("datetime"),
        );
    }

    for &index in key_indexes {
        node.columns
            .push(group_key_select(&query.group_bys[index], index, &query.timezone)?);
    }

    if let Some(aggregate) = &query.aggregate {
        node.columns.push(aggregate_value_select(aggregate));
    }

    node.where_clauses.push(Fragment::with_params(
        "event_name = ?",
        vec![SqlParam::from(event.name.as_str())],
    ));
    node.where_clauses.push(Fragment::with_params(
        "timestamp >= toDateTime(?)",
        vec![SqlParam::from(query.from)],
    ));
    node.where_clauses.push(Fragment::with_params(
        "timestamp < toDateTime(?)",
        vec![SqlParam::from(query.to)],
    ));
    if let Some(condition) = compile_filters(&event.filters)? {
        node.where_clauses.push(condition);
    }
    if let Some(condition) = compile_filters(&query.global_filters)? {
        node.where_clauses.push(condition);
    }

    // First-occurrence dedup: deterministic order by event time, then one
    // row per dedup key, so breakdowns reflect the literal first occurrence
    match dedup {
        DedupMode::Raw => {}
        DedupMode::FirstPerUser => {
            node.order_by.push("user_id ASC".to_string());
            node.order_by.push("timestamp ASC".to_string());
            node.limit_by = Some((1, vec!["user_id".to_string()]));
        }
        DedupMode::FirstPerUserPerBucket => {
            node.order_by.push("user_id ASC".to_string());
            node.order_by.push("timestamp ASC".to_string());
            node.limit_by = Some((1, vec!["user_id".to_string(), "datetime".to_string()]));
        }
    }

    Ok(StepPlan {
        name: step_name(event_index + 1),
        node,
        key_indexes: key_indexes.to_vec(),
    })
}
