//! Log-only notification delivery
//!
//! Stands in for the mail relay: every notice becomes one structured log
//! line that a log shipper can forward.

use async_trait::async_trait;
use tracing::info;

use core_kernel::{DomainPort, PortError};
use workflow_engine::{Notice, NotificationDelivery};

#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl DomainPort for LogNotifier {}

#[async_trait]
impl NotificationDelivery for LogNotifier {
    async fn deliver(&self, notice: &Notice) -> Result<(), PortError> {
        info!(
            event_id = %notice.event_id,
            application_id = %notice.application_id,
            recipient = %notice.recipient,
            template = notice.template,
            subject = %notice.subject,
            "Notice dispatched"
        );
        Ok(())
    }
}
