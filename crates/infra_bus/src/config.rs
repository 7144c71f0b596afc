//! Bus connection settings, read from `WORKFLOW__BUS__*`

use serde::Deserialize;
use std::time::Duration;

use core_kernel::CoreError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    pub url: String,
    /// JetStream stream holding every workflow topic
    pub stream: String,
    pub subject_prefix: String,
    /// Unacknowledged messages one consumer may hold
    pub max_ack_pending: i64,
    /// Redelivery delay for a message that was not acknowledged
    pub ack_wait_secs: u64,
    /// Deliveries before the broker stops retrying a message
    pub max_deliver: i64,
    pub max_age_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            stream: "WORKFLOW".to_string(),
            subject_prefix: "workflow".to_string(),
            max_ack_pending: 1024,
            ack_wait_secs: 30,
            max_deliver: 10,
            max_age_secs: 7 * 24 * 3600,
            connect_timeout_secs: 5,
        }
    }
}

impl NatsConfig {
    pub fn ack_wait(&self) -> Duration {
        Duration::from_secs(self.ack_wait_secs)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.url.trim().is_empty() {
            return Err(CoreError::configuration("bus.url must not be empty"));
        }
        if self.stream.is_empty() || self.stream.contains(['.', '*', '>', ' ']) {
            return Err(CoreError::configuration(format!(
                "bus.stream '{}' is not a valid stream name",
                self.stream
            )));
        }
        if self.subject_prefix.is_empty() || self.subject_prefix.contains(['*', '>', ' ']) {
            return Err(CoreError::configuration(format!(
                "bus.subject_prefix '{}' is not a valid subject prefix",
                self.subject_prefix
            )));
        }
        if self.max_ack_pending <= 0 {
            return Err(CoreError::configuration("bus.max_ack_pending must be positive"));
        }
        if self.ack_wait_secs == 0 {
            return Err(CoreError::configuration("bus.ack_wait_secs must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = NatsConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ack_wait(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_document_keeps_other_defaults() {
        let config: NatsConfig = serde_json::from_value(serde_json::json!({
            "url": "nats://bus:4222",
            "max_deliver": 3
        }))
        .unwrap();

        assert_eq!(config.url, "nats://bus:4222");
        assert_eq!(config.max_deliver, 3);
        assert_eq!(config.stream, "WORKFLOW");
    }

    #[test]
    fn test_wildcard_prefix_is_rejected() {
        let config = NatsConfig {
            subject_prefix: "workflow.>".into(),
            ..NatsConfig::default()
        };
        assert!(config.validate().is_err());

        let config = NatsConfig {
            stream: "work.flow".into(),
            ..NatsConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
