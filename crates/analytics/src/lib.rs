//! Beacon Analytics Engine
//!
//! Behavioral analytics over an events table: multi-event queries with
//! ANY/ALL/EACH combination semantics, compiled to staged ClickHouse SQL,
//! executed through `beacon-query`, and post-processed into presentation-ready
//! reports.
//!
//! # Overview
//!
//! This crate provides the analytics layer for Beacon, built on top of
//! `beacon-query`. It includes:
//!
//! - **Query Model**: events, filters, breakdowns, time buckets
//! - **Compiler**: staged SQL plans (per-event steps, combination, aggregation)
//! - **Post-processing**: gap-filling, limiting, relabeling, EACH pivots
//! - **Executor**: bounded-concurrency query groups with batch status
//!
//! # Usage
//!
//! ```ignore
//! use beacon_analytics::{
//!     run_query, AnalyticsQuery, Combination, EngineConfig, EventSpec, QueryClass,
//! };
//!
//! let query = AnalyticsQuery::new(QueryClass::UniqueUsers, Combination::Any, from, to)
//!     .with_event(EventSpec::new("signup"))
//!     .with_timezone("America/New_York");
//!
//! let report = run_query(backend.as_ref(), &query, &EngineConfig::default()).await;
//! ```

pub mod aggregate;
pub mod buckets;
pub mod combine;
pub mod error;
pub mod executor;
pub mod filter;
pub mod groupkey;
pub mod plan;
pub mod postprocess;
pub mod query;
pub mod report;
pub mod step;

#[cfg(test)]
mod buckets_test;
#[cfg(test)]
mod groupkey_test;
#[cfg(test)]
mod postprocess_test;

// Re-exports for convenience
pub use aggregate::compile_query;
pub use error::{AnalyticsError, Result};
pub use executor::{run_query, run_query_group, BatchStatus};
pub use filter::{LogicalOp, Operator, PropertyFilter};
pub use plan::CompiledQuery;
pub use postprocess::sanitize_report;
pub use query::{
    AggregateFunction, AggregateSpec, AnalyticsQuery, Combination, EngineConfig, Entity,
    EventSpec, Granularity, GroupBySpec, LimitMode, QueryClass, ValueType,
};
pub use report::{Report, ReportMeta};
