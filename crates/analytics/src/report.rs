//! Report types
//!
//! The engine's presentation-ready result: ordered headers, rows of
//! heterogeneous values, and a metadata block. A report whose first header is
//! the reserved error marker signals failure across every consumer boundary.

use serde::{Deserialize, Serialize};

use beacon_query::QueryResult;

use crate::query::AnalyticsQuery;

/// Sentinel substituted for null/empty categorical values
pub const NONE_TOKEN: &str = "$none";

/// Prefix for internal breakdown column aliases (`_group_key_0`, ...)
pub const GROUP_KEY_PREFIX: &str = "_group_key_";

/// Time-bucket column header
pub const HEADER_DATETIME: &str = "datetime";

/// Aggregate column header
pub const HEADER_COUNT: &str = "count";

/// Per-event tag header (EACH combination)
pub const HEADER_EVENT_NAME: &str = "event_name";

/// Declared-order annotation header (EACH combination, internal)
pub const HEADER_EVENT_INDEX: &str = "event_index";

/// Reserved failure marker header
pub const HEADER_ERROR: &str = "error";

/// Metric kind recorded per pivoted EACH column
pub const METRIC_EACH_EVENT_TOTAL: &str = "each_event_total";

/// Internal alias for the Nth requested breakdown
pub fn group_key_alias(index: usize) -> String {
    format!("{}{}", GROUP_KEY_PREFIX, index)
}

/// Auxiliary per-header metric (e.g. per-event totals for EACH pivots)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderMetric {
    pub kind: String,
    pub header: String,
    pub value: f64,
}

/// Report metadata block
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportMeta {
    /// Echo of the query that produced this report
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<AnalyticsQuery>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<HeaderMetric>,
}

/// A post-processed analytics result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    pub meta: ReportMeta,
}

impl Report {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<serde_json::Value>>) -> Self {
        Self {
            headers,
            rows,
            meta: ReportMeta::default(),
        }
    }

    /// Build the error-marked report for a failed query
    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            headers: vec![HEADER_ERROR.to_string()],
            rows: vec![vec![serde_json::Value::String(format!(
                "Query failed: - {}",
                message
            ))]],
            meta: ReportMeta::default(),
        }
    }

    /// Whether this report carries the failure marker
    pub fn is_error(&self) -> bool {
        self.headers.first().map(String::as_str) == Some(HEADER_ERROR)
    }

    /// Lift raw backend output into a report
    pub fn from_query_result(result: &QueryResult) -> Self {
        Self {
            headers: result.columns.iter().map(|c| c.name.clone()).collect(),
            rows: result.rows.clone(),
            meta: ReportMeta::default(),
        }
    }

    /// Position of a header by name
    pub fn header_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}
