//! Event ledger / user projection consistency.
//!
//! The event ledger is authoritative; the user projection is a cache derived
//! from it. Writes to the two cannot be made atomic, so [`ProjectionSync`]:
//!
//! 1. mirrors each ledger change to the projection ([`ProjectionSync::propagate`]),
//! 2. queues the `(event, user)` pair when that mirror write fails and later
//!    re-derives it from the ledger with exponential backoff
//!    ([`ProjectionSync::drain_retries`]),
//! 3. periodically re-derives every projection from every ledger and rewrites
//!    any that diverged ([`ProjectionSync::repair_all`]). This also heals
//!    pairs whose queue entry was lost with the process.

use crate::metrics;
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use rsvp_core::{
    Attendance, AttendanceRef, Clock, EventId, EventStore, StoreError, UserId, UserProjection,
    UserProjectionStore,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// A change to mirror into a user's projection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProjectionChange {
    /// Insert or overwrite the entry for the event
    Upsert(AttendanceRef),
    /// Remove the entry for the event
    Remove,
}

impl ProjectionChange {
    /// Change mirroring the ledger's current attendance (or its absence)
    #[must_use]
    pub fn from_attendance(event_id: EventId, attendance: Option<&Attendance>) -> Self {
        attendance.map_or(Self::Remove, |a| Self::Upsert(a.to_ref(event_id)))
    }
}

#[derive(Clone, Debug)]
struct RepairEntry {
    attempts: u32,
    due_at: DateTime<Utc>,
}

/// Result of [`ProjectionSync::drain_retries`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Pairs re-derived successfully
    pub repaired: usize,
    /// Pairs that failed again and were rescheduled
    pub rescheduled: usize,
    /// Pairs that ran out of retries (left to the full repair sweep)
    pub abandoned: usize,
}

/// Result of [`ProjectionSync::repair_all`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Users whose projection was compared
    pub users_checked: usize,
    /// Users whose projection was rewritten
    pub repaired: usize,
    /// Users whose rewrite failed
    pub failed: usize,
}

/// Keeps user projections converged with the event ledger.
pub struct ProjectionSync {
    events: Arc<dyn EventStore>,
    projections: Arc<dyn UserProjectionStore>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    queue: Mutex<HashMap<(EventId, UserId), RepairEntry>>,
    // Writers: full repair. Readers: single-pair writes. A full repair must
    // not interleave with a pair write or it could overwrite a newer entry
    // with its older snapshot.
    gate: RwLock<()>,
}

impl ProjectionSync {
    /// Create a sync over the given stores
    #[must_use]
    pub fn new(
        events: Arc<dyn EventStore>,
        projections: Arc<dyn UserProjectionStore>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            events,
            projections,
            clock,
            policy,
            queue: Mutex::new(HashMap::new()),
            gate: RwLock::new(()),
        }
    }

    /// Mirror one ledger change into the user's projection.
    ///
    /// A failed write is logged and queued for repair; it is never reported
    /// to the caller, whose ledger write already succeeded.
    pub async fn propagate(&self, event_id: EventId, user_id: UserId, change: ProjectionChange) {
        let result = {
            let _shared = self.gate.read().await;
            self.apply(user_id, event_id, &change).await
        };

        if let Err(error) = result {
            self.defer(event_id, user_id, &error).await;
        }
    }

    /// Mirror the ledger's current attendance for one pair, read fresh
    /// rather than taken from the caller.
    ///
    /// Failures are queued for repair like [`ProjectionSync::propagate`].
    pub async fn refresh(&self, event_id: EventId, user_id: UserId) {
        if let Err(error) = self.rederive(event_id, user_id).await {
            self.defer(event_id, user_id, &error).await;
        }
    }

    async fn defer(&self, event_id: EventId, user_id: UserId, error: &StoreError) {
        tracing::warn!(
            event_id = %event_id,
            user_id = %user_id,
            error = %error,
            "Projection write failed, queued for repair"
        );
        metrics::record_projection_write_failure();
        self.enqueue(event_id, user_id).await;
    }

    async fn apply(&self, user_id: UserId, event_id: EventId, change: &ProjectionChange) -> Result<(), StoreError> {
        match change {
            ProjectionChange::Upsert(entry) => self.projections.upsert_entry(user_id, entry).await,
            ProjectionChange::Remove => self.projections.remove_entry(user_id, event_id).await.map(|_| ()),
        }
    }

    async fn enqueue(&self, event_id: EventId, user_id: UserId) {
        let due_at = self.due_after(self.clock.now(), 0);
        let mut queue = self.queue.lock().await;
        queue.entry((event_id, user_id)).or_insert(RepairEntry { attempts: 0, due_at });
        metrics::record_repair_queue_depth(queue.len());
    }

    fn due_after(&self, now: DateTime<Utc>, attempt: u32) -> DateTime<Utc> {
        chrono::Duration::from_std(self.policy.delay_for_attempt(attempt))
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(now)
    }

    /// Number of pairs waiting for a retry
    pub async fn pending_repairs(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Re-derive every queued pair that is due from the ledger.
    ///
    /// Failures are rescheduled with exponential backoff; a pair that exhausts
    /// its retries is dropped and left to [`ProjectionSync::repair_all`].
    pub async fn drain_retries(&self) -> DrainReport {
        let now = self.clock.now();
        let due: Vec<_> = {
            let mut queue = self.queue.lock().await;
            let keys: Vec<_> = queue
                .iter()
                .filter(|(_, entry)| entry.due_at <= now)
                .map(|(key, _)| *key)
                .collect();
            keys.into_iter()
                .filter_map(|key| queue.remove(&key).map(|entry| (key, entry)))
                .collect()
        };

        let mut report = DrainReport::default();
        for ((event_id, user_id), entry) in due {
            match self.rederive(event_id, user_id).await {
                Ok(()) => {
                    report.repaired += 1;
                    metrics::record_projection_repairs(1);
                    tracing::info!(
                        event_id = %event_id,
                        user_id = %user_id,
                        attempts = entry.attempts + 1,
                        "Projection entry repaired"
                    );
                }
                Err(error) => {
                    let attempts = entry.attempts + 1;
                    if self.policy.allows(attempts) {
                        let due_at = self.due_after(now, attempts);
                        self.queue
                            .lock()
                            .await
                            .entry((event_id, user_id))
                            .or_insert(RepairEntry { attempts, due_at });
                        report.rescheduled += 1;
                        tracing::debug!(
                            event_id = %event_id,
                            user_id = %user_id,
                            attempts,
                            error = %error,
                            "Projection repair failed, rescheduled"
                        );
                    } else {
                        report.abandoned += 1;
                        tracing::warn!(
                            event_id = %event_id,
                            user_id = %user_id,
                            attempts,
                            error = %error,
                            "Projection repair retries exhausted, deferring to full sweep"
                        );
                    }
                }
            }
        }

        metrics::record_repair_queue_depth(self.pending_repairs().await);
        report
    }

    async fn rederive(&self, event_id: EventId, user_id: UserId) -> Result<(), StoreError> {
        let _shared = self.gate.read().await;
        let event = self.events.find_event(event_id).await?;
        let change = ProjectionChange::from_attendance(
            event_id,
            event.as_ref().and_then(|e| e.attendance_of(user_id)),
        );
        self.apply(user_id, event_id, &change).await
    }

    /// Re-derive every user's projection from every event ledger and rewrite
    /// the ones that diverged.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the ledger or the list of projections cannot
    /// be read. Individual rewrite failures are counted in the report.
    pub async fn repair_all(&self) -> Result<RepairReport, StoreError> {
        let _exclusive = self.gate.write().await;

        let mut derived: HashMap<UserId, UserProjection> = HashMap::new();
        for event_id in self.events.list_event_ids().await? {
            let Some(event) = self.events.find_event(event_id).await? else {
                continue;
            };
            for attendance in &event.attendees {
                derived
                    .entry(attendance.user_id)
                    .or_insert_with(|| UserProjection::new(attendance.user_id))
                    .upsert(attendance.to_ref(event.id));
            }
        }
        for user_id in self.projections.list_user_ids().await? {
            derived
                .entry(user_id)
                .or_insert_with(|| UserProjection::new(user_id));
        }

        let mut report = RepairReport::default();
        for (user_id, expected) in derived {
            report.users_checked += 1;

            let current = self
                .projections
                .find(user_id)
                .await?
                .unwrap_or_else(|| UserProjection::new(user_id));
            if current.same_entries(&expected) {
                continue;
            }

            match self.projections.replace(&expected).await {
                Ok(()) => {
                    report.repaired += 1;
                    tracing::info!(
                        user_id = %user_id,
                        before = current.attending.len(),
                        after = expected.attending.len(),
                        "Diverged projection rewritten from ledger"
                    );
                }
                Err(error) => {
                    report.failed += 1;
                    tracing::warn!(user_id = %user_id, error = %error, "Projection rewrite failed");
                }
            }
        }

        if report.failed == 0 {
            self.queue.lock().await.clear();
            metrics::record_repair_queue_depth(0);
        }
        if report.repaired > 0 {
            metrics::record_projection_repairs(report.repaired);
        }
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::capacity::admission_rule;
    use crate::store::{InMemoryEventStore, InMemoryProjectionStore};
    use rsvp_core::{Event, Money, PaymentStatus};
    use rsvp_testing::test_clock;

    struct Fixture {
        events: Arc<InMemoryEventStore>,
        projections: Arc<InMemoryProjectionStore>,
        sync: ProjectionSync,
        event_id: EventId,
    }

    async fn fixture() -> Fixture {
        let events = Arc::new(InMemoryEventStore::new());
        let projections = Arc::new(InMemoryProjectionStore::new());
        let event = Event::new("Meetup", 10, Money::ZERO, test_clock().now());
        let event_id = event.id;
        events.insert_event(&event).await.unwrap();

        let sync = ProjectionSync::new(
            events.clone(),
            projections.clone(),
            Arc::new(test_clock()),
            RetryPolicy::default(),
        );
        Fixture {
            events,
            projections,
            sync,
            event_id,
        }
    }

    #[tokio::test]
    async fn test_propagate_upsert_and_remove() {
        let f = fixture().await;
        let user = UserId::new();
        let attendance = Attendance::confirmed(user, test_clock().now());

        f.sync
            .propagate(f.event_id, user, ProjectionChange::from_attendance(f.event_id, Some(&attendance)))
            .await;
        let projection = f.projections.find(user).await.unwrap().unwrap();
        assert_eq!(projection.get(f.event_id).unwrap().status, PaymentStatus::Paid);

        f.sync.propagate(f.event_id, user, ProjectionChange::Remove).await;
        let projection = f.projections.find(user).await.unwrap().unwrap();
        assert!(projection.get(f.event_id).is_none());
    }

    #[tokio::test]
    async fn test_refresh_reads_current_ledger() {
        let f = fixture().await;
        let user = UserId::new();
        let reference = rsvp_core::CheckoutRequestId::new("ws_CO_refresh");
        let paid = Event::new("Workshop", 2, Money::from_units(300), test_clock().now());
        f.events.insert_event(&paid).await.unwrap();

        f.events
            .reserve(paid.id, &admission_rule(user, test_clock().now()))
            .await
            .unwrap();
        f.events.attach_reference(paid.id, user, &reference).await.unwrap();
        f.events
            .transition(&reference, PaymentStatus::Paid, test_clock().now())
            .await
            .unwrap();

        f.sync.refresh(paid.id, user).await;
        let projection = f.projections.find(user).await.unwrap().unwrap();
        let entry = projection.get(paid.id).unwrap();
        assert_eq!(entry.status, PaymentStatus::Paid);
        assert_eq!(entry.payment_reference, Some(reference));
        assert_eq!(f.sync.pending_repairs().await, 0);
    }

    #[tokio::test]
    async fn test_repair_all_rewrites_missing_and_stale() {
        let f = fixture().await;
        let attending = UserId::new();
        let stale = UserId::new();

        f.events
            .reserve(f.event_id, &admission_rule(attending, test_clock().now()))
            .await
            .unwrap();
        // Projection never written for `attending`; `stale` has an entry the
        // ledger does not back.
        f.projections
            .upsert_entry(
                stale,
                &Attendance::confirmed(stale, test_clock().now()).to_ref(f.event_id),
            )
            .await
            .unwrap();

        let report = f.sync.repair_all().await.unwrap();
        assert_eq!(report.users_checked, 2);
        assert_eq!(report.repaired, 2);

        assert!(f.projections.find(attending).await.unwrap().unwrap().get(f.event_id).is_some());
        assert!(f.projections.find(stale).await.unwrap().unwrap().attending.is_empty());

        let again = f.sync.repair_all().await.unwrap();
        assert_eq!(again.repaired, 0);
    }
}
