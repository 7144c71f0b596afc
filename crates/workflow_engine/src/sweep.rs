//! SLA sweeper
//!
//! Periodically scans projections that sit in a watched status for longer
//! than its window and stages one `EscalationRaised` per projection per sweep
//! interval. The same pass expires reorder-buffer entries past their TTL.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;

use core_kernel::ActorContext;
use domain_workflow::{ApplicationProjection, DomainEvent, EscalationPayload, EventType};

use crate::config::{SlaConfig, SlaWindow};
use crate::error::EngineError;
use crate::orchestrator::Orchestrator;
use crate::ports::{ProjectionStore, UnitOfWork};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub escalated: usize,
    /// Stale projections already escalated within the interval, or moved meanwhile
    pub skipped: usize,
    /// Reorder-buffer entries expired
    pub expired: usize,
}

pub struct SlaSweeper {
    store: Arc<dyn ProjectionStore>,
    orchestrator: Arc<Orchestrator>,
    config: SlaConfig,
}

impl SlaSweeper {
    pub fn new(store: Arc<dyn ProjectionStore>, orchestrator: Arc<Orchestrator>, config: SlaConfig) -> Self {
        Self {
            store,
            orchestrator,
            config,
        }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, EngineError> {
        let mut report = SweepReport::default();
        let interval = self.config.sweep_interval();

        for window in &self.config.windows {
            let stale = self.store.stale(window.status, now - window.window()).await?;
            for projection in stale {
                if !self.watches(&projection) {
                    continue;
                }
                if !projection.escalation_due(now, interval) {
                    report.skipped += 1;
                    continue;
                }
                if self.escalate(&projection, window, now).await? {
                    report.escalated += 1;
                } else {
                    report.skipped += 1;
                }
            }
        }

        report.expired = self.orchestrator.expire_buffered(now).await?;

        if report.escalated > 0 || report.expired > 0 {
            tracing::info!(
                service = self.orchestrator.service(),
                escalated = report.escalated,
                skipped = report.skipped,
                expired = report.expired,
                "SLA sweep finished"
            );
        }
        Ok(report)
    }

    fn watches(&self, projection: &ApplicationProjection) -> bool {
        if !self.orchestrator.projects(projection.variant) {
            return false;
        }
        self.orchestrator
            .validator()
            .registry(projection.variant)
            .is_some_and(|registry| !registry.is_terminal(projection.status))
    }

    // False when the projection moved between the scan and the commit
    async fn escalate(
        &self,
        projection: &ApplicationProjection,
        window: &SlaWindow,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let payload = serde_json::to_value(EscalationPayload {
            reason: "sla_breach".to_string(),
            variant: projection.variant,
            status: Some(projection.status),
            stuck_since: Some(projection.updated_at),
            held_event_id: None,
            detail: format!(
                "{} exceeded its {}h window",
                projection.status,
                window.window().num_hours()
            ),
        })?;
        let ctx = ActorContext::system(projection.application_id, projection.tenant_id);
        let escalation = DomainEvent::new(&ctx, EventType::EscalationRaised.as_str(), projection.version, payload)
            .with_occurred_at(now);

        let mut marked = projection.clone();
        marked.last_escalated_at = Some(now);
        let unit = UnitOfWork::new()
            .put_projection(marked, Some(projection.version))
            .stage(escalation);

        match self.store.commit(unit).await {
            Ok(()) => {
                tracing::warn!(
                    application_id = %projection.application_id,
                    variant = %projection.variant,
                    status = %projection.status,
                    stuck_since = %projection.updated_at,
                    "SLA breached, escalation raised"
                );
                Ok(true)
            }
            Err(err) if err.is_conflict() => {
                tracing::debug!(
                    application_id = %projection.application_id,
                    "Projection moved during sweep, escalation skipped"
                );
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Sweeps every interval until `shutdown` flips
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = std::time::Duration::from_secs(self.config.sweep_interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        tracing::info!(
            sweep_interval_secs = self.config.sweep_interval_secs,
            windows = self.config.windows.len(),
            "SLA sweeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep(Utc::now()).await {
                        tracing::warn!(error = %e, "SLA sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("SLA sweeper stopped");
    }
}
