//! Recording notifier.

use async_trait::async_trait;
use rsvp_core::{Notifier, NotifyError, PaymentNotice};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How long [`RecordingNotifier::wait_for`] waits before giving up
const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// Notifier that records every notice it is asked to send.
///
/// Notices are delivered from spawned tasks, so tests read them through
/// [`RecordingNotifier::wait_for`] rather than right after the call that
/// triggered them.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    notices: Arc<Mutex<Vec<PaymentNotice>>>,
    failing: Arc<AtomicBool>,
    stalled: Arc<AtomicBool>,
}

impl RecordingNotifier {
    /// Notifier that always succeeds
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifier that records and then fails every delivery
    #[must_use]
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.failing.store(true, Ordering::SeqCst);
        notifier
    }

    /// Notifier that records and then never completes a delivery
    #[must_use]
    pub fn stalled() -> Self {
        let notifier = Self::default();
        notifier.stalled.store(true, Ordering::SeqCst);
        notifier
    }

    /// Notices received so far
    #[must_use]
    pub fn notices(&self) -> Vec<PaymentNotice> {
        self.notices.lock().map(|n| n.clone()).unwrap_or_default()
    }

    /// Wait until at least `count` notices arrived, or a few seconds passed,
    /// and return what was received.
    pub async fn wait_for(&self, count: usize) -> Vec<PaymentNotice> {
        let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
        loop {
            let notices = self.notices();
            if notices.len() >= count || tokio::time::Instant::now() >= deadline {
                return notices;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn payment_resolved(&self, notice: &PaymentNotice) -> Result<(), NotifyError> {
        self.notices
            .lock()
            .map_err(|_| NotifyError("recording notifier lock poisoned".to_string()))?
            .push(notice.clone());

        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError("mail server unreachable".to_string()));
        }
        Ok(())
    }
}
