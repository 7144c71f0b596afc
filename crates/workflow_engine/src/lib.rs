//! Workflow Engine
//!
//! Runs the application workflow on top of the pure domain crate:
//!
//! - [`Orchestrator`] validates consumed events and commands, updates the
//!   projection and stages consequence events in one unit of work
//! - [`OutboxPublisher`] publishes staged events at least once
//! - [`PartitionedConsumer`] serializes each application's events on one worker
//! - [`SlaSweeper`] escalates applications stuck past their window
//! - [`NotificationFanout`] turns decisions into user-facing notices
//!
//! Storage, bus and delivery are ports (see [`ports`]); in-memory adapters live
//! in [`adapters::memory`].

pub mod adapters;
pub mod config;
pub mod consumer;
pub mod error;
pub mod notification;
pub mod orchestrator;
pub mod outbox;
pub mod ports;
pub mod reorder;
pub mod retry;
pub mod sweep;

pub use config::{EngineConfig, OutboxConfig, ReorderConfig, SlaConfig, SlaWindow};
pub use consumer::{Delivery, EventHandler, PartitionedConsumer};
pub use error::EngineError;
pub use notification::{FanoutOutcome, Notice, NoticeKind, NotificationFanout};
pub use orchestrator::{Command, Orchestrator, OrchestratorOutcome};
pub use outbox::{OutboxPublisher, PublishReport};
pub use ports::{
    Acknowledge, DeadLetter, DeadLetterSink, DeadLetterSource, DeliveryLedger, EventBus,
    EventSource, NotificationDelivery, OutboxRecord, OutboxStore, ProjectionStore, ProjectionWrite,
    Receipt, UnitOfWork,
};
pub use reorder::{HeldEvent, HoldResult, ReorderBuffer};
pub use retry::RetryPolicy;
pub use sweep::{SlaSweeper, SweepReport};
