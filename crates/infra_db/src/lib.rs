//! Infrastructure Database Layer
//!
//! PostgreSQL adapters for the workflow engine ports, built on SQLx.
//!
//! # Tables
//!
//! - `workflow_projections`: one row per (application, variant)
//! - `processed_events`: event ids already applied by this service
//! - `workflow_outbox`: staged consequence events awaiting publication
//! - `dead_letters`: messages given up on
//! - `notification_ledger`: events that already produced a notice
//!
//! Each service owns its own database; the schema is the same everywhere.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, run_migrations, DatabaseConfig, PgWorkflowStore};
//!
//! let pool = create_pool(&DatabaseConfig::new("postgres://localhost/workflow")).await?;
//! run_migrations(&pool).await?;
//! let store = PgWorkflowStore::new(pool);
//! ```

pub mod pool;
pub mod error;
pub mod store;
pub mod dead_letters;
pub mod ledger;

pub use pool::{DatabasePool, create_pool, run_migrations, DatabaseConfig};
pub use error::DatabaseError;
pub use store::PgWorkflowStore;
pub use dead_letters::PgDeadLetterSink;
pub use ledger::PgDeliveryLedger;
