//! Query configuration types

use serde::{Deserialize, Serialize};

use crate::backend::clickhouse::ClickHouseBackendConfig;
use crate::error::QueryError;

/// Query configuration
///
/// Deserialized from the host application's config file and resolved into a
/// backend configuration before use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// ClickHouse HTTP URL (e.g., "http://localhost:8123")
    pub url: Option<String>,

    /// Database name
    pub database: Option<String>,

    /// Username for authentication
    pub username: Option<String>,

    /// Password for authentication
    pub password: Option<String>,

    /// Max execution time in seconds (defaults to 60)
    #[serde(default = "default_max_execution_time")]
    pub max_execution_time: u64,
}

fn default_max_execution_time() -> u64 {
    60
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            url: None,
            database: None,
            username: None,
            password: None,
            max_execution_time: default_max_execution_time(),
        }
    }
}

impl QueryConfig {
    /// Create config with URL and database
    pub fn new(url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            database: Some(database.into()),
            ..Default::default()
        }
    }

    /// Resolve into a ClickHouse backend configuration
    pub fn resolve(&self) -> Result<ClickHouseBackendConfig, QueryError> {
        let url = self
            .url
            .as_ref()
            .ok_or_else(|| QueryError::Config("url required for query backend".to_string()))?;
        let database = self.database.as_ref().ok_or_else(|| {
            QueryError::Config("database required for query backend".to_string())
        })?;

        let mut config = ClickHouseBackendConfig::new(url, database);
        config.max_execution_time = self.max_execution_time;

        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            config = config.with_credentials(user, pass);
        }

        Ok(config)
    }
}
