//! Infrastructure Bus Layer
//!
//! NATS JetStream adapter for the engine's [`EventBus`] and [`EventSource`]
//! ports.
//!
//! # Subjects
//!
//! Every message lands on `{prefix}.{topic}.{partition_key}` inside one
//! stream, so a consumer filters by topic and the partition key survives the
//! round trip without a header.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_bus::{NatsConfig, NatsEventBus};
//!
//! let bus = Arc::new(NatsEventBus::connect(&NatsConfig::default(), "pcic-service").await?);
//! let feed = bus.subscribe("pcic-service", &Topic::ALL).await?;
//! ```
//!
//! [`EventBus`]: workflow_engine::EventBus
//! [`EventSource`]: workflow_engine::EventSource

pub mod config;
pub mod error;
pub mod nats;

pub use config::NatsConfig;
pub use error::BusError;
pub use nats::NatsEventBus;
