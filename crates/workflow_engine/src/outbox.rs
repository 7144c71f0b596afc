//! Outbox publisher
//!
//! Publishes staged events in staging order. A record is marked published
//! only after the bus accepted it, so a crash in between republishes it and
//! consumers rely on event-id dedup. A transient failure blocks the rest of
//! that application's records for the current pass.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;

use core_kernel::{ApplicationId, PortError};

use crate::config::OutboxConfig;
use crate::error::EngineError;
use crate::ports::{EventBus, OutboxRecord, OutboxStore};
use crate::retry::RetryPolicy;

/// Counts of one publishing pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub published: usize,
    /// Transient failures left for the next pass
    pub failed: usize,
    pub dead_lettered: usize,
    /// Records skipped behind an earlier failure of the same application
    pub deferred: usize,
}

impl PublishReport {
    pub fn is_idle(&self) -> bool {
        *self == PublishReport::default()
    }
}

pub struct OutboxPublisher {
    outbox: Arc<dyn OutboxStore>,
    bus: Arc<dyn EventBus>,
    retry: RetryPolicy,
    config: OutboxConfig,
}

impl OutboxPublisher {
    pub fn new(
        outbox: Arc<dyn OutboxStore>,
        bus: Arc<dyn EventBus>,
        retry: RetryPolicy,
        config: OutboxConfig,
    ) -> Self {
        Self {
            outbox,
            bus,
            retry,
            config,
        }
    }

    /// Publishes one batch of pending records
    ///
    /// Errors only when the outbox itself cannot be read or updated; bus
    /// failures are accounted for in the report.
    pub async fn publish_pending(&self) -> Result<PublishReport, EngineError> {
        let records = self.outbox.pending(self.config.batch_size).await?;
        let mut report = PublishReport::default();
        let mut blocked: HashSet<ApplicationId> = HashSet::new();

        for record in records {
            let application_id = record.event.application_id;
            if blocked.contains(&application_id) {
                report.deferred += 1;
                continue;
            }

            match self.publish(&record).await {
                Ok(()) => {
                    self.outbox.mark_published(record.id).await?;
                    report.published += 1;
                    tracing::debug!(
                        outbox_id = %record.id,
                        event_id = %record.event.event_id,
                        topic = %record.topic,
                        "Outbox record published"
                    );
                }
                Err(err) if err.is_transient() => {
                    let attempts = self.outbox.record_failure(record.id, &err.to_string()).await?;
                    if attempts >= self.config.max_attempts {
                        self.dead_letter(&record, attempts, &err).await?;
                        report.dead_lettered += 1;
                    } else {
                        tracing::warn!(
                            outbox_id = %record.id,
                            event_id = %record.event.event_id,
                            application_id = %application_id,
                            attempts,
                            error = %err,
                            "Publish failed, will retry on next pass"
                        );
                        report.failed += 1;
                    }
                    blocked.insert(application_id);
                }
                Err(err) => {
                    let attempts = self.outbox.record_failure(record.id, &err.to_string()).await?;
                    self.dead_letter(&record, attempts, &err).await?;
                    report.dead_lettered += 1;
                }
            }
        }

        Ok(report)
    }

    async fn publish(&self, record: &OutboxRecord) -> Result<(), PortError> {
        let payload = record.event.encode().map_err(|e| PortError::serialization(e.to_string()))?;
        self.retry
            .run("publish", || {
                self.bus.publish(record.topic, &record.partition_key, &payload)
            })
            .await
    }

    async fn dead_letter(
        &self,
        record: &OutboxRecord,
        attempts: u32,
        err: &PortError,
    ) -> Result<(), EngineError> {
        tracing::error!(
            alert = true,
            outbox_id = %record.id,
            event_id = %record.event.event_id,
            event_type = %record.event.event_type,
            application_id = %record.event.application_id,
            attempts,
            error = %err,
            "Outbox record dead-lettered"
        );
        self.outbox.mark_dead_letter(record.id, &err.to_string()).await?;
        Ok(())
    }

    /// Polls the outbox until `shutdown` flips
    ///
    /// A full batch is followed immediately by the next one; otherwise the
    /// publisher sleeps for the poll interval.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let poll = self.config.poll_interval();
        tracing::info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval_ms,
            "Outbox publisher started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let busy = match self.publish_pending().await {
                Ok(report) => {
                    if !report.is_idle() {
                        tracing::debug!(
                            published = report.published,
                            failed = report.failed,
                            dead_lettered = report.dead_lettered,
                            deferred = report.deferred,
                            "Outbox pass finished"
                        );
                    }
                    report.published >= self.config.batch_size
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Outbox pass failed");
                    false
                }
            };

            if busy {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Outbox publisher stopped");
    }
}
