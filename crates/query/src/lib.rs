//! Beacon Query - SQL query execution for Beacon analytics
//!
//! The database boundary for the analytics engine: a [`QueryBackend`] trait,
//! a ClickHouse implementation over the HTTP interface, and a unified tabular
//! [`QueryResult`]. Compiled plans arrive as SQL text plus positional bind
//! parameters; the backend owns placeholder substitution and transport.
//!
//! # Usage
//!
//! ```ignore
//! use beacon_query::{ClickHouseBackend, QueryBackend, SqlParam};
//!
//! let backend = ClickHouseBackend::from_url("http://localhost:8123", "analytics");
//! let result = backend
//!     .execute_with_params(
//!         "SELECT count(*) FROM events WHERE event_name = ?",
//!         &[SqlParam::from("Signup")],
//!     )
//!     .await?;
//! println!("Rows: {}", result.row_count);
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod result;

// Re-exports
pub use backend::clickhouse::{ClickHouseBackend, ClickHouseBackendConfig};
pub use backend::{validate_sql, QueryBackend, SqlParam};
pub use config::QueryConfig;
pub use error::QueryError;
pub use result::{Column, DataType, QueryResult, TableInfo};
