//! Dead-letter table
//!
//! Messages the engine gave up on are kept in `dead_letters` for operator
//! inspection and manual replay.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use core_kernel::{DomainPort, PortError};
use workflow_engine::{DeadLetter, DeadLetterSink, DeadLetterSource};

use crate::error::DatabaseError;

#[derive(Debug, Clone)]
pub struct PgDeadLetterSink {
    pool: PgPool,
}

impl PgDeadLetterSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Number of letters recorded from `source`
    pub async fn count(&self, source: DeadLetterSource) -> Result<i64, DatabaseError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM dead_letters WHERE source = $1",
        )
        .bind(source_name(source))
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

impl DomainPort for PgDeadLetterSink {}

#[async_trait]
impl DeadLetterSink for PgDeadLetterSink {
    async fn dead_letter(&self, letter: DeadLetter) -> Result<(), PortError> {
        warn!(
            source = source_name(letter.source),
            event_id = ?letter.event_id,
            reason = %letter.reason,
            "Recording dead letter"
        );

        sqlx::query(
            "INSERT INTO dead_letters \
             (source, event_id, application_id, reason, payload, dead_lettered_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(source_name(letter.source))
        .bind(letter.event_id.map(Uuid::from))
        .bind(letter.application_id.map(Uuid::from))
        .bind(&letter.reason)
        .bind(&letter.payload)
        .bind(letter.dead_lettered_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;
        Ok(())
    }
}

fn source_name(source: DeadLetterSource) -> &'static str {
    match source {
        DeadLetterSource::Outbox => "outbox",
        DeadLetterSource::Consumer => "consumer",
        DeadLetterSource::ReorderBuffer => "reorder_buffer",
    }
}
