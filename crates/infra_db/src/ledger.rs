//! Notification delivery ledger
//!
//! One row per event that produced a notice. The primary key on `event_id`
//! makes a redelivered event lose the claim race.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use core_kernel::{ActorId, DomainPort, EventId, PortError};
use workflow_engine::DeliveryLedger;

use crate::error::DatabaseError;

#[derive(Debug, Clone)]
pub struct PgDeliveryLedger {
    pool: PgPool,
}

impl PgDeliveryLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl DomainPort for PgDeliveryLedger {}

#[async_trait]
impl DeliveryLedger for PgDeliveryLedger {
    async fn claim(&self, event_id: EventId, recipient: ActorId) -> Result<bool, PortError> {
        let inserted = sqlx::query(
            "INSERT INTO notification_ledger (event_id, recipient_id) VALUES ($1, $2) \
             ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(Uuid::from(event_id))
        .bind(Uuid::from(recipient))
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        let claimed = inserted.rows_affected() == 1;
        if !claimed {
            debug!(event_id = %event_id, "Notice already claimed");
        }
        Ok(claimed)
    }

    async fn release(&self, event_id: EventId) -> Result<(), PortError> {
        sqlx::query("DELETE FROM notification_ledger WHERE event_id = $1")
            .bind(Uuid::from(event_id))
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from)?;
        Ok(())
    }
}
