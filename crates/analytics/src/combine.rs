//! Event-combination assembly
//!
//! Composes the per-event steps into one combined, column-aligned set under
//! ANY (union), ALL (join chain on user and, when bucketed, the same time
//! bucket), or EACH (union-all with per-event tagging) semantics. Emits plan
//! structure only; nothing here executes.

use beacon_query::SqlParam;

use crate::error::Result;
use crate::plan::{Fragment, FromNode, Join, PlanNode, SelectNode};
use crate::query::{AnalyticsQuery, Combination, EngineConfig, QueryClass};
use crate::report::group_key_alias;
use crate::step::{build_step, step_name, DedupMode, StepPlan};

/// The assembled combined set: its CTE chain and the name to select from
#[derive(Debug, Clone)]
pub struct CombinedPlan {
    pub ctes: Vec<(String, PlanNode)>,
    /// CTE name the aggregation stage reads
    pub source: String,
    /// EACH tagging columns (event_name, event_index) are present
    pub has_event_columns: bool,
}

/// Dedup mode for per-step first-occurrence semantics
fn unique_user_dedup(query: &AnalyticsQuery) -> DedupMode {
    if query.time_bucket.is_some() {
        DedupMode::FirstPerUserPerBucket
    } else {
        DedupMode::FirstPerUser
    }
}

/// Breakdown indexes the step at `event_index` owns for join/union semantics
fn scoped_key_indexes(query: &AnalyticsQuery, event_index: usize) -> Vec<usize> {
    query
        .group_bys
        .iter()
        .enumerate()
        .filter(|(_, spec)| match spec.event_index {
            Some(owner) => owner == event_index,
            // User-scoped breakdowns ride on the first step for joins
            None => event_index == 0,
        })
        .map(|(i, _)| i)
        .collect()
}

/// Breakdown indexes a step emits under EACH: its own plus every user-scoped one
fn each_key_indexes(query: &AnalyticsQuery, event_index: usize) -> Vec<usize> {
    query
        .group_bys
        .iter()
        .enumerate()
        .filter(|(_, spec)| spec.event_index.is_none() || spec.event_index == Some(event_index))
        .map(|(i, _)| i)
        .collect()
}

fn all_key_indexes(query: &AnalyticsQuery) -> Vec<usize> {
    (0..query.group_bys.len()).collect()
}

/// Projection of one step for a union input, padding breakdowns the step does
/// not own with the empty-string placeholder to keep arity aligned
fn union_select(
    query: &AnalyticsQuery,
    step: &StepPlan,
    event_tag: Option<usize>,
) -> SelectNode {
    let mut node = SelectNode::new(FromNode::Cte(step.name.clone()));
    node.columns.push(Fragment::new("user_id"));
    node.columns.push(Fragment::new("timestamp"));
    if query.time_bucket.is_some() {
        node.columns.push(Fragment::new("datetime"));
    }
    if let Some(index) = event_tag {
        node.columns.push(Fragment::with_params(
            "? AS event_name",
            vec![SqlParam::from(query.event_label(index))],
        ));
        node.columns
            .push(Fragment::new(format!("{} AS event_index", index)));
    }
    for key_index in 0..query.group_bys.len() {
        let alias = group_key_alias(key_index);
        if step.key_indexes.contains(&key_index) {
            node.columns.push(Fragment::new(alias));
        } else {
            node.columns
                .push(Fragment::new(format!("'' AS {}", alias)));
        }
    }
    if query.aggregate.is_some() {
        node.columns.push(Fragment::new("agg_value"));
    }
    node
}

/// Build the combined set for a query
pub fn assemble(query: &AnalyticsQuery, config: &EngineConfig) -> Result<CombinedPlan> {
    match query.combination {
        Combination::Each => assemble_each(query, config),
        Combination::Any | Combination::All if query.events.len() == 1 => {
            assemble_single(query, config)
        }
        Combination::Any => assemble_any(query, config),
        Combination::All => assemble_all(query, config),
    }
}

/// One event: the step itself is the combined set
fn assemble_single(query: &AnalyticsQuery, config: &EngineConfig) -> Result<CombinedPlan> {
    let dedup = match query.class {
        QueryClass::Occurrence => DedupMode::Raw,
        QueryClass::UniqueUsers => unique_user_dedup(query),
    };
    let step = build_step(query, config, 0, dedup, &all_key_indexes(query))?;
    let name = step.name.clone();
    Ok(CombinedPlan {
        ctes: vec![(name.clone(), PlanNode::Select(step.node))],
        source: name,
        has_event_columns: false,
    })
}

/// ANY: union of all steps; unique-user queries then keep the first
/// qualifying occurrence across events, so breakdowns reflect that row
fn assemble_any(query: &AnalyticsQuery, config: &EngineConfig) -> Result<CombinedPlan> {
    let keys = all_key_indexes(query);
    let mut ctes = Vec::new();
    let mut inputs = Vec::new();

    for event_index in 0..query.events.len() {
        let step = build_step(query, config, event_index, DedupMode::Raw, &keys)?;
        inputs.push(union_select(query, &step, None));
        ctes.push((step.name.clone(), PlanNode::Select(step.node)));
    }

    match query.class {
        QueryClass::Occurrence => {
            // Distinct union: an occurrence matched by several event specs
            // counts once
            ctes.push((
                "events_union".to_string(),
                PlanNode::Union { all: false, inputs },
            ));
            Ok(CombinedPlan {
                ctes,
                source: "events_union".to_string(),
                has_event_columns: false,
            })
        }
        QueryClass::UniqueUsers => {
            ctes.push((
                "events_union".to_string(),
                PlanNode::Union { all: true, inputs },
            ));

            let mut combined = SelectNode::new(FromNode::Cte("events_union".to_string()));
            combined.columns.push(Fragment::new("user_id"));
            combined.columns.push(Fragment::new("timestamp"));
            let mut dedup_keys = vec!["user_id".to_string()];
            if query.time_bucket.is_some() {
                combined.columns.push(Fragment::new("datetime"));
                dedup_keys.push("datetime".to_string());
            }
            for key_index in 0..query.group_bys.len() {
                combined
                    .columns
                    .push(Fragment::new(group_key_alias(key_index)));
            }
            if query.aggregate.is_some() {
                combined.columns.push(Fragment::new("agg_value"));
            }
            combined.order_by.push("user_id ASC".to_string());
            combined.order_by.push("timestamp ASC".to_string());
            combined.limit_by = Some((1, dedup_keys));

            ctes.push(("combined".to_string(), PlanNode::Select(combined)));
            Ok(CombinedPlan {
                ctes,
                source: "combined".to_string(),
                has_event_columns: false,
            })
        }
    }
}

/// ALL: inner-join chain in declared order on user id, plus the time bucket
/// when requested - every event must land in the same bucket
fn assemble_all(query: &AnalyticsQuery, config: &EngineConfig) -> Result<CombinedPlan> {
    let dedup = unique_user_dedup(query);
    let mut ctes = Vec::new();

    for event_index in 0..query.events.len() {
        let keys = scoped_key_indexes(query, event_index);
        let step = build_step(query, config, event_index, dedup, &keys)?;
        ctes.push((step.name.clone(), PlanNode::Select(step.node)));
    }

    let base = step_name(1);
    let mut joins = Vec::new();
    for position in 2..=query.events.len() {
        let previous = step_name(position - 1);
        let current = step_name(position);
        let mut on = vec![(
            format!("{}.user_id", previous),
            format!("{}.user_id", current),
        )];
        if query.time_bucket.is_some() {
            on.push((
                format!("{}.datetime", previous),
                format!("{}.datetime", current),
            ));
        }
        joins.push(Join { table: current, on });
    }

    let mut combined = SelectNode::new(FromNode::Join {
        base: base.clone(),
        joins,
    });
    combined
        .columns
        .push(Fragment::new(format!("{}.user_id AS user_id", base)));
    combined
        .columns
        .push(Fragment::new(format!("{}.timestamp AS timestamp", base)));
    if query.time_bucket.is_some() {
        combined
            .columns
            .push(Fragment::new(format!("{}.datetime AS datetime", base)));
    }
    for (key_index, spec) in query.group_bys.iter().enumerate() {
        let owner = step_name(spec.event_index.unwrap_or(0) + 1);
        let alias = group_key_alias(key_index);
        combined
            .columns
            .push(Fragment::new(format!("{}.{} AS {}", owner, alias, alias)));
    }
    if query.aggregate.is_some() {
        combined
            .columns
            .push(Fragment::new(format!("{}.agg_value AS agg_value", base)));
    }

    ctes.push(("combined".to_string(), PlanNode::Select(combined)));
    Ok(CombinedPlan {
        ctes,
        source: "combined".to_string(),
        has_event_columns: false,
    })
}

/// EACH: union-all preserving duplicates, tagging rows with the originating
/// event label and declared position
fn assemble_each(query: &AnalyticsQuery, config: &EngineConfig) -> Result<CombinedPlan> {
    let dedup = match query.class {
        QueryClass::Occurrence => DedupMode::Raw,
        QueryClass::UniqueUsers => unique_user_dedup(query),
    };

    let mut ctes = Vec::new();
    let mut inputs = Vec::new();

    for event_index in 0..query.events.len() {
        let keys = each_key_indexes(query, event_index);
        let step = build_step(query, config, event_index, dedup, &keys)?;
        inputs.push(union_select(query, &step, Some(event_index)));
        ctes.push((step.name.clone(), PlanNode::Select(step.node)));
    }

    ctes.push((
        "events_union".to_string(),
        PlanNode::Union { all: true, inputs },
    ));

    Ok(CombinedPlan {
        ctes,
        source: "events_union".to_string(),
        has_event_columns: true,
    })
}
