//! Query backend trait and implementations

pub mod clickhouse;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::result::{QueryResult, TableInfo};

/// A positional bind parameter for a compiled query.
///
/// Compiled plans use `?` placeholders in emission order; each backend owns
/// the substitution into its native parameter protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlParam {
    /// UTF-8 string value
    Str(String),
    /// Signed 64-bit integer value
    Int(i64),
    /// 64-bit floating point value
    Float(f64),
}

impl SqlParam {
    /// Render the value for transport (unquoted; quoting is the backend's job)
    pub fn as_transport_value(&self) -> String {
        match self {
            SqlParam::Str(s) => s.clone(),
            SqlParam::Int(i) => i.to_string(),
            SqlParam::Float(f) => f.to_string(),
        }
    }
}

impl From<&str> for SqlParam {
    fn from(s: &str) -> Self {
        SqlParam::Str(s.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(s: String) -> Self {
        SqlParam::Str(s)
    }
}

impl From<i64> for SqlParam {
    fn from(i: i64) -> Self {
        SqlParam::Int(i)
    }
}

impl From<f64> for SqlParam {
    fn from(f: f64) -> Self {
        SqlParam::Float(f)
    }
}

/// Query backend trait
///
/// Implemented by the ClickHouse backend and by test doubles.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Execute a SQL query
    async fn execute(&self, sql: &str) -> Result<QueryResult, QueryError>;

    /// Execute a SQL query with positional `?` bind parameters
    async fn execute_with_params(
        &self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<QueryResult, QueryError>;

    /// Check if backend is available
    async fn health_check(&self) -> Result<(), QueryError>;

    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// List available tables
    async fn list_tables(&self) -> Result<Vec<TableInfo>, QueryError>;
}

/// Validate SQL query - only allow SELECT and WITH (CTE) queries
///
/// This is a guardrail to prevent accidental destructive queries. Compiled
/// plans are always SELECT/WITH; anything else here is a defect upstream.
pub fn validate_sql(sql: &str) -> Result<(), QueryError> {
    let trimmed = sql.trim();
    let upper = trimmed.to_uppercase();

    // Must start with SELECT or WITH (CTE)
    if !upper.starts_with("SELECT") && !upper.starts_with("WITH") {
        return Err(QueryError::InvalidSql(
            "only SELECT and WITH queries are allowed".to_string(),
        ));
    }

    // Block SELECT ... INTO (creates tables in some databases)
    if upper.contains(" INTO ") && !upper.contains("INSERT INTO") {
        return Err(QueryError::InvalidSql(
            "SELECT INTO is not allowed".to_string(),
        ));
    }

    // Disallow multiple statements (e.g., "SELECT 1; DROP TABLE x")
    // Allow trailing semicolon for convenience
    if trimmed.contains(';') && !trimmed.ends_with(';') {
        return Err(QueryError::InvalidSql(
            "multiple statements not allowed".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_sql_select() {
        assert!(validate_sql("SELECT * FROM events").is_ok());
        assert!(validate_sql("  SELECT count(*) FROM events  ").is_ok());
        assert!(validate_sql("select * from events").is_ok());
    }

    #[test]
    fn test_validate_sql_with() {
        assert!(validate_sql("WITH step_1 AS (SELECT 1) SELECT * FROM step_1").is_ok());
        assert!(validate_sql("with x as (select 1) select * from x").is_ok());
    }

    #[test]
    fn test_validate_sql_invalid() {
        assert!(validate_sql("INSERT INTO events VALUES (1)").is_err());
        assert!(validate_sql("DELETE FROM events").is_err());
        assert!(validate_sql("DROP TABLE events").is_err());
        assert!(validate_sql("UPDATE events SET x=1").is_err());
        assert!(validate_sql("TRUNCATE TABLE events").is_err());
        assert!(validate_sql("ALTER TABLE events ADD COLUMN x INT").is_err());
        assert!(validate_sql("CREATE TABLE foo (id INT)").is_err());
    }

    #[test]
    fn test_validate_sql_multiple_statements() {
        assert!(validate_sql("SELECT 1; DROP TABLE events").is_err());
        assert!(validate_sql("SELECT 1; SELECT 2").is_err());
    }

    #[test]
    fn test_validate_sql_trailing_semicolon_ok() {
        assert!(validate_sql("SELECT * FROM events;").is_ok());
    }

    #[test]
    fn test_validate_sql_select_into_blocked() {
        assert!(validate_sql("SELECT * INTO new_table FROM events").is_err());
        assert!(validate_sql("select * into backup from events").is_err());
    }

    #[test]
    fn test_validate_sql_subqueries_ok() {
        assert!(validate_sql("SELECT * FROM (SELECT 1 as x) sub").is_ok());
        assert!(
            validate_sql("SELECT * FROM events WHERE user_id IN (SELECT user_id FROM step_1)")
                .is_ok()
        );
    }

    #[test]
    fn test_sql_param_from() {
        assert_eq!(SqlParam::from("a"), SqlParam::Str("a".to_string()));
        assert_eq!(SqlParam::from(42i64), SqlParam::Int(42));
        assert_eq!(SqlParam::from(1.5f64), SqlParam::Float(1.5));
    }

    #[test]
    fn test_sql_param_transport_value() {
        assert_eq!(SqlParam::from("hello").as_transport_value(), "hello");
        assert_eq!(SqlParam::from(-3i64).as_transport_value(), "-3");
        assert_eq!(SqlParam::from(2.5f64).as_transport_value(), "2.5");
    }
}
