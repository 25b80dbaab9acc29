//! Log-only payment notifier.

use async_trait::async_trait;
use rsvp_core::{Notifier, NotifyError, PaymentNotice};

/// Writes payment notices to the log instead of delivering them.
///
/// Stands in for an email or SMS integration.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn payment_resolved(&self, notice: &PaymentNotice) -> Result<(), NotifyError> {
        tracing::info!(
            event_id = %notice.event_id,
            user_id = %notice.user_id,
            status = %notice.status,
            checkout_request_id = %notice.reference,
            description = %notice.description,
            "Payment notice"
        );
        Ok(())
    }
}
