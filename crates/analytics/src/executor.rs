//! Query-group execution
//!
//! Runs a batch of queries against one backend with bounded concurrency.
//! Individual failures become error-marked reports in their original slot;
//! the batch as a whole reports a three-way status.

use std::sync::Arc;

use tokio::sync::Semaphore;

use beacon_query::QueryBackend;

use crate::error::Result;
use crate::postprocess::sanitize_report;
use crate::query::{AnalyticsQuery, EngineConfig};
use crate::report::Report;

/// Outcome of a query group
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Every query produced a result
    Success,
    /// Some queries produced results, some failed
    Partial,
    /// Nothing ran; the backend was unreachable
    Failed,
}

/// Compile, execute, and post-process one query
async fn execute_single(
    backend: &dyn QueryBackend,
    query: &AnalyticsQuery,
    config: &EngineConfig,
) -> Result<Report> {
    let compiled = crate::aggregate::compile_query(query, config)?;
    let result = backend.execute_with_params(&compiled.sql, &compiled.params).await?;
    sanitize_report(Report::from_query_result(&result), query, config)
}

/// Run one query, converting any failure into an error-marked report.
///
/// The returned report always echoes its query in the metadata so callers
/// can correlate slots without positional bookkeeping.
pub async fn run_query(
    backend: &dyn QueryBackend,
    query: &AnalyticsQuery,
    config: &EngineConfig,
) -> Report {
    let mut report = match execute_single(backend, query, config).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, "analytics query failed");
            Report::error(e)
        }
    };
    report.meta.query = Some(query.clone());
    report
}

/// Run a group of queries with bounded concurrency.
///
/// Reports come back in submission order, one per query. A failed health
/// check short-circuits the whole group.
pub async fn run_query_group(
    backend: Arc<dyn QueryBackend>,
    queries: Vec<AnalyticsQuery>,
    config: &EngineConfig,
) -> (Vec<Report>, BatchStatus) {
    if queries.is_empty() {
        return (Vec::new(), BatchStatus::Success);
    }

    if let Err(e) = backend.health_check().await {
        tracing::error!(backend = backend.name(), error = %e, "backend unavailable");
        let reports = queries
            .iter()
            .map(|query| {
                let mut report = Report::error(&e);
                report.meta.query = Some(query.clone());
                report
            })
            .collect();
        return (reports, BatchStatus::Failed);
    }

    tracing::info!(
        backend = backend.name(),
        queries = queries.len(),
        max_concurrent = config.max_concurrent_queries,
        "running query group"
    );

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_queries.max(1)));
    let mut handles = Vec::with_capacity(queries.len());

    for query in queries {
        let backend = Arc::clone(&backend);
        let semaphore = Arc::clone(&semaphore);
        let config = config.clone();
        handles.push(tokio::spawn(async move {
            // Closing the semaphore is not possible from here; acquire can
            // only fail if it were, so treat that as a backend error
            let _permit = semaphore.acquire_owned().await;
            run_query(backend.as_ref(), &query, &config).await
        }));
    }

    let mut reports = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(report) => reports.push(report),
            Err(e) => {
                tracing::error!(error = %e, "query task panicked");
                reports.push(Report::error("internal execution failure"));
            }
        }
    }

    let status = if reports.iter().any(Report::is_error) {
        BatchStatus::Partial
    } else {
        BatchStatus::Success
    };
    (reports, status)
}
