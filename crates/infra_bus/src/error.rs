//! Bus error types
//!
//! Broker failures map onto [`PortError`]; lost connections, failed
//! publishes and failed acks are transient so the outbox retries them.

use thiserror::Error;

use core_kernel::PortError;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Failed to connect to NATS: {0}")]
    ConnectionFailed(String),

    /// Stream or consumer could not be created
    #[error("JetStream setup failed: {0}")]
    SetupFailed(String),

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Ack failed: {0}")]
    AckFailed(String),
}

impl From<BusError> for PortError {
    fn from(error: BusError) -> Self {
        match error {
            BusError::ConnectionFailed(_) | BusError::PublishFailed(_) | BusError::AckFailed(_) => {
                PortError::Connection {
                    message: error.to_string(),
                    source: Some(Box::new(error)),
                }
            }
            BusError::SetupFailed(_) => PortError::Internal {
                message: error.to_string(),
                source: Some(Box::new(error)),
            },
        }
    }
}
