//! Analytics error types

use thiserror::Error;

/// Analytics errors
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// Invalid query configuration (detected at compile time, never executed)
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Unknown or unparseable timezone
    #[error("invalid timezone: {0}")]
    Timezone(String),

    /// Executed result does not have the shape the compiler produced
    #[error("malformed result: {0}")]
    MalformedResult(String),

    /// Backend error (from beacon-query)
    #[error("backend error: {0}")]
    Backend(#[from] beacon_query::QueryError),
}

/// Result type for analytics operations
pub type Result<T> = std::result::Result<T, AnalyticsError>;
