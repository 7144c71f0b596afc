//! Connection pool and schema migrations
//!
//! [`DatabaseConfig`] deserializes from the service configuration
//! (`WORKFLOW__DATABASE__*`), so every pool setting can be tuned per
//! deployment without code changes.

use serde::Deserialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use core_kernel::CoreError;

use crate::error::DatabaseError;

pub type DatabasePool = PgPool;

/// Pool settings for one workflow service's database
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// Connections kept open while idle
    pub min_connections: u32,
    /// How long a caller waits for a free connection
    pub acquire_timeout_secs: u64,
    pub max_lifetime_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/workflow".to_string(),
            max_connections: 10,
            min_connections: 2,
            acquire_timeout_secs: 30,
            max_lifetime_secs: 30 * 60,
            idle_timeout_secs: 10 * 60,
        }
    }
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.url.trim().is_empty() {
            return Err(CoreError::configuration("database.url must not be empty"));
        }
        if self.max_connections == 0 {
            return Err(CoreError::configuration("database.max_connections must be positive"));
        }
        if self.min_connections > self.max_connections {
            return Err(CoreError::configuration(
                "database.min_connections exceeds database.max_connections",
            ));
        }
        if self.acquire_timeout_secs == 0 {
            return Err(CoreError::configuration("database.acquire_timeout_secs must be positive"));
        }
        Ok(())
    }

    fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(Duration::from_secs(self.acquire_timeout_secs))
            .max_lifetime(Duration::from_secs(self.max_lifetime_secs))
            .idle_timeout(Duration::from_secs(self.idle_timeout_secs))
    }
}

/// Opens the pool
///
/// ```rust,ignore
/// let pool = create_pool(&DatabaseConfig::new("postgres://localhost/pcic")).await?;
/// run_migrations(&pool).await?;
/// ```
pub async fn create_pool(config: &DatabaseConfig) -> Result<DatabasePool, DatabaseError> {
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        acquire_timeout_secs = config.acquire_timeout_secs,
        "Opening workflow database pool"
    );

    let pool = config
        .pool_options()
        .connect(&config.url)
        .await
        .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

    Ok(pool)
}

/// Applies the embedded workflow schema
///
/// Safe to run on every start; applied migrations are skipped.
pub async fn run_migrations(pool: &DatabasePool) -> Result<(), DatabaseError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Workflow schema migrations applied");
    Ok(())
}
