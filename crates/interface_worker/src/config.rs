//! Service configuration
//!
//! Read from `WORKFLOW__*` environment variables (after `.env`), nested keys
//! separated by `__`:
//!
//! ```bash
//! WORKFLOW__SERVICE_NAME=pcic-service
//! WORKFLOW__PORT=8081
//! WORKFLOW__DATABASE__URL=postgres://localhost/pcic
//! WORKFLOW__DATABASE__MIN_CONNECTIONS=4
//! WORKFLOW__BUS__URL=nats://localhost:4222
//! WORKFLOW__LOG_FORMAT=json
//! WORKFLOW__VARIANTS=VERIFICATION,CLAIMS
//! WORKFLOW__ENGINE__WORKERS=8
//! WORKFLOW__ENGINE__OUTBOX__MAX_ATTEMPTS=20
//! ```

use serde::Deserialize;

use core_kernel::CoreError;
use domain_workflow::WorkflowVariant;
use infra_bus::NatsConfig;
use infra_db::DatabaseConfig;
use workflow_engine::EngineConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Name used in logs and as the orchestrator's service label
    pub service_name: String,
    pub host: String,
    pub port: u16,
    /// PostgreSQL pool; in-memory stores when absent
    pub database: Option<DatabaseConfig>,
    /// NATS JetStream; an in-process bus when absent
    pub bus: Option<NatsConfig>,
    pub log_level: String,
    pub log_format: LogFormat,
    /// Workflow variants this service keeps projections for
    pub variants: Vec<WorkflowVariant>,
    pub engine: EngineConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: "workflow-service".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8080,
            database: None,
            bus: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            variants: WorkflowVariant::ALL.to_vec(),
            engine: EngineConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Loads configuration from the environment
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::with_prefix("WORKFLOW")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("variants"),
            )
            .build()?
            .try_deserialize()
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.service_name.trim().is_empty() {
            return Err(CoreError::configuration("service_name must not be empty"));
        }
        if self.variants.is_empty() {
            return Err(CoreError::configuration("at least one workflow variant must be projected"));
        }
        if let Some(database) = &self.database {
            database.validate()?;
        }
        if let Some(bus) = &self.bus {
            bus.validate()?;
        }
        self.engine.validate()
    }

    /// Returns the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server_addr(), "0.0.0.0:8080");
        assert!(config.database.is_none());
        assert!(config.bus.is_none());
        assert_eq!(config.variants.len(), 4);
    }

    #[test]
    fn test_empty_variants_rejected() {
        let config = ServiceConfig {
            variants: Vec::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_engine_settings_are_validated() {
        let mut config = ServiceConfig::default();
        config.engine.workers = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn test_deserializes_partial_document() {
        let config: ServiceConfig = serde_json::from_value(serde_json::json!({
            "service_name": "pcic-service",
            "log_format": "json",
            "variants": ["VERIFICATION", "CLAIMS"],
            "engine": { "workers": 8 }
        }))
        .unwrap();

        assert_eq!(config.service_name, "pcic-service");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.variants,
            vec![WorkflowVariant::Verification, WorkflowVariant::Claims]
        );
        assert_eq!(config.engine.workers, 8);
        assert_eq!(config.engine.channel_capacity, 256);
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_database_and_bus_sections() {
        let config: ServiceConfig = serde_json::from_value(serde_json::json!({
            "database": { "url": "postgres://db/pcic", "min_connections": 4 },
            "bus": { "url": "nats://bus:4222" }
        }))
        .unwrap();

        let database = config.database.as_ref().unwrap();
        assert_eq!(database.min_connections, 4);
        assert_eq!(database.max_connections, 10);
        assert_eq!(config.bus.as_ref().unwrap().stream, "WORKFLOW");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pool_settings_are_validated() {
        let config: ServiceConfig = serde_json::from_value(serde_json::json!({
            "database": { "max_connections": 2, "min_connections": 5 }
        }))
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_connections"));
    }
}
