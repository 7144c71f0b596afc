//! PostgreSQL Workflow Store
//!
//! Implements [`ProjectionStore`] and [`OutboxStore`] on three tables:
//! `workflow_projections`, `processed_events` and `workflow_outbox`.
//!
//! A [`UnitOfWork`] is written inside one transaction. Duplicate event ids
//! and moved projection versions are detected by row counts, so a conflicting
//! commit rolls back without leaving any partial state behind.
//!
//! ```rust,ignore
//! use infra_db::{create_pool, DatabaseConfig, PgWorkflowStore};
//!
//! let pool = create_pool(&DatabaseConfig::new(url)).await?;
//! let store = Arc::new(PgWorkflowStore::new(pool));
//! let orchestrator = Orchestrator::new(
//!     "pcic-service",
//!     validator,
//!     [WorkflowVariant::Verification],
//!     store.clone(),
//!     dead_letters,
//!     ReorderConfig::default(),
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use core_kernel::{
    ActorId, ApplicationId, DomainPort, EventId, HealthCheckResult, HealthCheckable, OutboxId,
    PortError, TenantId,
};
use domain_workflow::{ApplicationProjection, DomainEvent, Status, WorkflowVariant};
use workflow_engine::{OutboxRecord, OutboxStore, ProjectionStore, ProjectionWrite, UnitOfWork};

use crate::error::DatabaseError;

const PROJECTION_COLUMNS: &str = "application_id, variant, status, version, last_event_id, \
     applicant_id, tenant_id, created_at, updated_at, last_escalated_at";

/// PostgreSQL-backed projection, processed-event and outbox store
#[derive(Debug, Clone)]
pub struct PgWorkflowStore {
    pool: PgPool,
}

impl PgWorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn mark_processed(
        tx: &mut Transaction<'_, Postgres>,
        event_id: EventId,
    ) -> Result<(), PortError> {
        let inserted = sqlx::query(
            "INSERT INTO processed_events (event_id) VALUES ($1) ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(Uuid::from(event_id))
        .execute(&mut **tx)
        .await
        .map_err(DatabaseError::from)?;

        if inserted.rows_affected() == 0 {
            return Err(PortError::conflict(format!("event {event_id} already processed")));
        }
        Ok(())
    }

    async fn write_projection(
        tx: &mut Transaction<'_, Postgres>,
        write: &ProjectionWrite,
    ) -> Result<(), PortError> {
        let p = &write.projection;
        let version = db_version(p.version)?;

        let affected = match write.expected_version {
            None => sqlx::query(
                "INSERT INTO workflow_projections (application_id, variant, status, version, \
                 last_event_id, applicant_id, tenant_id, created_at, updated_at, last_escalated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
                 ON CONFLICT (application_id, variant) DO NOTHING",
            )
            .bind(Uuid::from(p.application_id))
            .bind(p.variant.as_str())
            .bind(p.status.as_str())
            .bind(version)
            .bind(Uuid::from(p.last_event_id))
            .bind(Uuid::from(p.applicant_id))
            .bind(p.tenant_id.map(Uuid::from))
            .bind(p.created_at)
            .bind(p.updated_at)
            .bind(p.last_escalated_at)
            .execute(&mut **tx)
            .await
            .map_err(DatabaseError::from)?
            .rows_affected(),
            Some(expected) => sqlx::query(
                "UPDATE workflow_projections \
                 SET status = $3, version = $4, last_event_id = $5, updated_at = $6, \
                     last_escalated_at = $7 \
                 WHERE application_id = $1 AND variant = $2 AND version = $8",
            )
            .bind(Uuid::from(p.application_id))
            .bind(p.variant.as_str())
            .bind(p.status.as_str())
            .bind(version)
            .bind(Uuid::from(p.last_event_id))
            .bind(p.updated_at)
            .bind(p.last_escalated_at)
            .bind(db_version(expected)?)
            .execute(&mut **tx)
            .await
            .map_err(DatabaseError::from)?
            .rows_affected(),
        };

        if affected == 0 {
            return Err(PortError::conflict(format!(
                "{} projection of {} changed concurrently",
                p.variant, p.application_id
            )));
        }
        Ok(())
    }

    async fn stage(
        tx: &mut Transaction<'_, Postgres>,
        event: &DomainEvent,
    ) -> Result<(), PortError> {
        sqlx::query(
            "INSERT INTO workflow_outbox (id, event_id, application_id, topic, partition_key, event) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::from(OutboxId::new_v7()))
        .bind(Uuid::from(event.event_id))
        .bind(Uuid::from(event.application_id))
        .bind(event.topic().as_str())
        .bind(event.partition_key())
        .bind(Json(event))
        .execute(&mut **tx)
        .await
        .map_err(DatabaseError::from)?;
        Ok(())
    }
}

impl DomainPort for PgWorkflowStore {}

#[async_trait]
impl HealthCheckable for PgWorkflowStore {
    async fn health_check(&self) -> HealthCheckResult {
        let start = std::time::Instant::now();

        match sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
        {
            Ok(_) => HealthCheckResult::healthy(
                "postgres-workflow-store",
                start.elapsed().as_millis() as u64,
            ),
            Err(e) => HealthCheckResult::unhealthy(
                "postgres-workflow-store",
                format!("Database error: {}", e),
            ),
        }
    }
}

#[async_trait]
impl ProjectionStore for PgWorkflowStore {
    #[instrument(skip(self), fields(application_id = %application_id, variant = %variant))]
    async fn get(
        &self,
        application_id: ApplicationId,
        variant: WorkflowVariant,
    ) -> Result<Option<ApplicationProjection>, PortError> {
        let row = sqlx::query_as::<_, ProjectionRow>(&format!(
            "SELECT {PROJECTION_COLUMNS} FROM workflow_projections \
             WHERE application_id = $1 AND variant = $2"
        ))
        .bind(Uuid::from(application_id))
        .bind(variant.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        Ok(row.map(ApplicationProjection::try_from).transpose()?)
    }

    async fn is_processed(&self, event_id: EventId) -> Result<bool, PortError> {
        let seen = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM processed_events WHERE event_id = $1)",
        )
        .bind(Uuid::from(event_id))
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from)?;
        Ok(seen)
    }

    #[instrument(skip(self, unit), fields(
        processed = unit.processed.len(),
        staged = unit.staged.len(),
    ))]
    async fn commit(&self, unit: UnitOfWork) -> Result<(), PortError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;

        // Any early return drops `tx`, which rolls the transaction back
        for event_id in &unit.processed {
            Self::mark_processed(&mut tx, *event_id).await?;
        }
        if let Some(write) = &unit.projection {
            Self::write_projection(&mut tx, write).await?;
        }
        for event in &unit.staged {
            Self::stage(&mut tx, event).await?;
        }

        tx.commit().await.map_err(DatabaseError::from)?;
        debug!("Unit of work committed");
        Ok(())
    }

    async fn stale(
        &self,
        status: Status,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<ApplicationProjection>, PortError> {
        let rows = sqlx::query_as::<_, ProjectionRow>(&format!(
            "SELECT {PROJECTION_COLUMNS} FROM workflow_projections \
             WHERE status = $1 AND updated_at < $2 \
             ORDER BY updated_at"
        ))
        .bind(status.as_str())
        .bind(updated_before)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        rows.into_iter()
            .map(|row| ApplicationProjection::try_from(row).map_err(PortError::from))
            .collect()
    }
}

#[async_trait]
impl OutboxStore for PgWorkflowStore {
    async fn pending(&self, limit: usize) -> Result<Vec<OutboxRecord>, PortError> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            "SELECT id, seq, partition_key, event, attempts, last_error, staged_at \
             FROM workflow_outbox \
             WHERE published_at IS NULL AND dead_lettered_at IS NULL \
             ORDER BY seq \
             LIMIT $1",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        Ok(rows.into_iter().map(OutboxRecord::from).collect())
    }

    #[instrument(skip(self), fields(outbox_id = %id))]
    async fn mark_published(&self, id: OutboxId) -> Result<(), PortError> {
        let updated = sqlx::query(
            "UPDATE workflow_outbox SET published_at = now() \
             WHERE id = $1 AND published_at IS NULL",
        )
        .bind(Uuid::from(id))
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        if updated.rows_affected() == 0 {
            return Err(DatabaseError::not_found("OutboxRecord", id).into());
        }
        Ok(())
    }

    async fn record_failure(&self, id: OutboxId, error: &str) -> Result<u32, PortError> {
        let attempts = sqlx::query_scalar::<_, i32>(
            "UPDATE workflow_outbox SET attempts = attempts + 1, last_error = $2 \
             WHERE id = $1 \
             RETURNING attempts",
        )
        .bind(Uuid::from(id))
        .bind(error)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from)?
        .ok_or_else(|| DatabaseError::not_found("OutboxRecord", id))?;

        Ok(attempts.max(0) as u32)
    }

    #[instrument(skip(self, error), fields(outbox_id = %id))]
    async fn mark_dead_letter(&self, id: OutboxId, error: &str) -> Result<(), PortError> {
        let updated = sqlx::query(
            "UPDATE workflow_outbox SET dead_lettered_at = now(), last_error = $2 WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        if updated.rows_affected() == 0 {
            return Err(DatabaseError::not_found("OutboxRecord", id).into());
        }
        Ok(())
    }
}

fn db_version(version: u64) -> Result<i64, DatabaseError> {
    i64::try_from(version)
        .map_err(|_| DatabaseError::SerializationError(format!("version {version} out of range")))
}

/// Row of `workflow_projections`
#[derive(Debug, Clone, FromRow)]
pub struct ProjectionRow {
    pub application_id: Uuid,
    pub variant: String,
    pub status: String,
    pub version: i64,
    pub last_event_id: Uuid,
    pub applicant_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_escalated_at: Option<DateTime<Utc>>,
}

impl TryFrom<ProjectionRow> for ApplicationProjection {
    type Error = DatabaseError;

    fn try_from(row: ProjectionRow) -> Result<Self, Self::Error> {
        let variant = row
            .variant
            .parse::<WorkflowVariant>()
            .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;
        let status = row
            .status
            .parse::<Status>()
            .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;
        let version = u64::try_from(row.version).map_err(|_| {
            DatabaseError::SerializationError(format!("negative version {}", row.version))
        })?;

        Ok(ApplicationProjection {
            application_id: ApplicationId::from_uuid(row.application_id),
            variant,
            status,
            version,
            last_event_id: EventId::from_uuid(row.last_event_id),
            applicant_id: ActorId::from_uuid(row.applicant_id),
            tenant_id: row.tenant_id.map(TenantId::from_uuid),
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_escalated_at: row.last_escalated_at,
        })
    }
}

/// Row of `workflow_outbox`
#[derive(Debug, Clone, FromRow)]
pub struct OutboxRow {
    pub id: Uuid,
    pub seq: i64,
    pub partition_key: String,
    pub event: Json<DomainEvent>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub staged_at: DateTime<Utc>,
}

impl From<OutboxRow> for OutboxRecord {
    fn from(row: OutboxRow) -> Self {
        let event = row.event.0;
        OutboxRecord {
            id: OutboxId::from_uuid(row.id),
            seq: row.seq,
            topic: event.topic(),
            partition_key: row.partition_key,
            attempts: row.attempts.max(0) as u32,
            last_error: row.last_error,
            staged_at: row.staged_at,
            event,
        }
    }
}
