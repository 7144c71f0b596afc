//! Adapters bundled with the engine
//!
//! The PostgreSQL store lives in `infra_db`; everything here is in-memory and
//! backs tests, local runs and the worker binary when no database is set.

pub mod memory;

pub use memory::{
    BusFailure, InMemoryDeadLetters, InMemoryDeliveryLedger, InMemoryEventBus,
    InMemoryWorkflowStore, RecordingNotifier,
};
