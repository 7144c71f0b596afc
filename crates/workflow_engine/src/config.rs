//! Engine tuning
//!
//! Plain serde structs so the service can load them through its own
//! configuration layer; every field has a default.

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use core_kernel::CoreError;
use domain_workflow::Status;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Consumer workers; one application is always handled by the same one
    pub workers: usize,
    /// Bounded queue per worker
    pub channel_capacity: usize,
    pub reorder: ReorderConfig,
    pub retry: RetryPolicy,
    pub outbox: OutboxConfig,
    pub sla: SlaConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            channel_capacity: 256,
            reorder: ReorderConfig::default(),
            retry: RetryPolicy::default(),
            outbox: OutboxConfig::default(),
            sla: SlaConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Rejects settings that would stall the engine
    pub fn validate(&self) -> Result<(), CoreError> {
        let checks = [
            (self.workers == 0, "workers must be at least 1"),
            (self.channel_capacity == 0, "channel_capacity must be at least 1"),
            (self.reorder.max_per_application == 0, "reorder.max_per_application must be at least 1"),
            (self.reorder.max_total == 0, "reorder.max_total must be at least 1"),
            (self.reorder.ttl_secs == 0, "reorder.ttl_secs must be positive"),
            (self.retry.base_delay_ms == 0, "retry.base_delay_ms must be positive"),
            (self.outbox.batch_size == 0, "outbox.batch_size must be at least 1"),
            (self.outbox.poll_interval_ms == 0, "outbox.poll_interval_ms must be positive"),
            (self.outbox.max_attempts == 0, "outbox.max_attempts must be at least 1"),
            (self.sla.sweep_interval_secs == 0, "sla.sweep_interval_secs must be positive"),
        ];

        if let Some((_, message)) = checks.iter().find(|(failed, _)| *failed) {
            return Err(CoreError::configuration(*message));
        }
        if let Some(window) = self.sla.windows.iter().find(|w| w.window_secs == 0) {
            return Err(CoreError::configuration(format!(
                "sla window for {} must be positive",
                window.status
            )));
        }
        if self.reorder.max_per_application > self.reorder.max_total {
            return Err(CoreError::configuration(
                "reorder.max_per_application exceeds reorder.max_total",
            ));
        }
        Ok(())
    }
}

/// Bounds of the reorder buffer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReorderConfig {
    pub max_per_application: usize,
    pub max_total: usize,
    /// Held events older than this are expired by the sweeper
    pub ttl_secs: u64,
}

impl Default for ReorderConfig {
    fn default() -> Self {
        Self {
            max_per_application: 16,
            max_total: 10_000,
            ttl_secs: 900,
        }
    }
}

impl ReorderConfig {
    pub fn ttl(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.ttl_secs as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    pub batch_size: usize,
    pub poll_interval_ms: u64,
    /// Attempts across passes before a record is dead-lettered
    pub max_attempts: u32,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval_ms: 500,
            max_attempts: 10,
        }
    }
}

impl OutboxConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// How long a status may be held before it is escalated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaWindow {
    pub status: Status,
    pub window_secs: u64,
}

impl SlaWindow {
    pub fn new(status: Status, window: ChronoDuration) -> Self {
        Self {
            status,
            window_secs: window.num_seconds().max(0) as u64,
        }
    }

    pub fn window(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.window_secs as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaConfig {
    /// Sweep period; one projection escalates at most once per tick
    pub sweep_interval_secs: u64,
    pub windows: Vec<SlaWindow>,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 3600,
            windows: vec![
                SlaWindow::new(Status::ProcessingByAew, ChronoDuration::hours(72)),
                SlaWindow::new(Status::ProcessingByMa, ChronoDuration::hours(72)),
                SlaWindow::new(Status::ProcessingByPcic, ChronoDuration::hours(120)),
                SlaWindow::new(Status::ProcessingByAdjuster, ChronoDuration::hours(120)),
                SlaWindow::new(Status::InspectionPending, ChronoDuration::hours(168)),
            ],
        }
    }
}

impl SlaConfig {
    pub fn sweep_interval(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.sweep_interval_secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = EngineConfig {
            workers: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn test_zero_sla_window_rejected() {
        let mut config = EngineConfig::default();
        config.sla.windows.push(SlaWindow {
            status: Status::ClaimFiled,
            window_secs: 0,
        });
        assert!(matches!(config.validate(), Err(CoreError::Configuration(_))));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"workers": 8, "outbox": {"max_attempts": 3}}"#).unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.outbox.max_attempts, 3);
        assert_eq!(config.outbox.batch_size, 100);
        assert_eq!(config.sla.windows.len(), 5);
    }
}
