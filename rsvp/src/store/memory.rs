//! In-memory stores.
//!
//! Each event lives behind its own async mutex; the capacity gate and the
//! append happen under that mutex, so registrations for one event serialize
//! while different events proceed in parallel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rsvp_core::{
    AdmissionRule, Attendance, AttendanceRef, CheckoutRequestId, Event, EventId, EventStore,
    PaymentSession, PaymentSessionStore, PaymentStatus, ReleaseOutcome, ReserveOutcome,
    SessionOutcome, StoreError, TransitionOutcome, UserId, UserProjection, UserProjectionStore,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// In-memory event ledger.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<HashMap<EventId, Arc<Mutex<Event>>>>>,
    references: Arc<RwLock<HashMap<CheckoutRequestId, EventId>>>,
}

impl InMemoryEventStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn event_slot(&self, event_id: EventId) -> Option<Arc<Mutex<Event>>> {
        self.events.read().await.get(&event_id).cloned()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn insert_event(&self, event: &Event) -> Result<(), StoreError> {
        let mut events = self.events.write().await;
        if events.contains_key(&event.id) {
            return Err(StoreError::Conflict(format!("event {} already exists", event.id)));
        }
        events.insert(event.id, Arc::new(Mutex::new(event.clone())));
        Ok(())
    }

    async fn find_event(&self, event_id: EventId) -> Result<Option<Event>, StoreError> {
        match self.event_slot(event_id).await {
            Some(slot) => Ok(Some(slot.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn list_event_ids(&self) -> Result<Vec<EventId>, StoreError> {
        Ok(self.events.read().await.keys().copied().collect())
    }

    async fn reserve(&self, event_id: EventId, rule: AdmissionRule<'_>) -> Result<ReserveOutcome, StoreError> {
        let Some(slot) = self.event_slot(event_id).await else {
            return Ok(ReserveOutcome::EventNotFound);
        };

        let mut event = slot.lock().await;
        match rule(&*event) {
            Ok(attendance) => {
                event.admit(attendance.clone());
                Ok(ReserveOutcome::Admitted {
                    event: event.clone(),
                    attendance,
                })
            }
            Err(rejection) => Ok(ReserveOutcome::Rejected(rejection)),
        }
    }

    async fn attach_reference(
        &self,
        event_id: EventId,
        user_id: UserId,
        reference: &CheckoutRequestId,
    ) -> Result<bool, StoreError> {
        let Some(slot) = self.event_slot(event_id).await else {
            return Ok(false);
        };

        let mut event = slot.lock().await;
        let Some(attendance) = event
            .attendance_of_mut(user_id)
            .filter(|a| a.status == PaymentStatus::Pending && a.payment_reference.is_none())
        else {
            return Ok(false);
        };

        attendance.payment_reference = Some(reference.clone());
        self.references
            .write()
            .await
            .insert(reference.clone(), event_id);
        Ok(true)
    }

    async fn release_pending(&self, event_id: EventId, user_id: UserId) -> Result<ReleaseOutcome, StoreError> {
        let Some(slot) = self.event_slot(event_id).await else {
            return Ok(ReleaseOutcome::Absent);
        };

        let mut event = slot.lock().await;
        let Some(attendance) = event.attendance_of(user_id) else {
            return Ok(ReleaseOutcome::Absent);
        };
        if attendance.status != PaymentStatus::Pending || attendance.payment_reference.is_some() {
            return Ok(ReleaseOutcome::Retained(attendance.clone()));
        }

        event.remove_attendance(user_id);
        Ok(ReleaseOutcome::Released)
    }

    async fn remove_attendance(&self, event_id: EventId, user_id: UserId) -> Result<Option<Attendance>, StoreError> {
        let Some(slot) = self.event_slot(event_id).await else {
            return Ok(None);
        };

        let removed = slot.lock().await.remove_attendance(user_id);
        if let Some(reference) = removed.as_ref().and_then(|a| a.payment_reference.as_ref()) {
            self.references.write().await.remove(reference);
        }
        Ok(removed)
    }

    async fn transition(
        &self,
        reference: &CheckoutRequestId,
        to: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError> {
        let Some(event_id) = self.references.read().await.get(reference).copied() else {
            return Ok(TransitionOutcome::NotFound);
        };
        let Some(slot) = self.event_slot(event_id).await else {
            return Ok(TransitionOutcome::NotFound);
        };

        let mut event = slot.lock().await;
        let Some(attendance) = event
            .attendees
            .iter_mut()
            .find(|a| a.payment_reference.as_ref() == Some(reference))
        else {
            return Ok(TransitionOutcome::NotFound);
        };

        match attendance.status.transition(to) {
            Ok(next) => {
                attendance.status = next;
                if next == PaymentStatus::Paid {
                    attendance.payment_date = Some(at);
                }
                Ok(TransitionOutcome::Applied {
                    event_id,
                    attendance: attendance.clone(),
                })
            }
            Err(invalid) => Ok(TransitionOutcome::AlreadyTerminal(invalid.from)),
        }
    }

    async fn unreferenced_pending_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<(EventId, UserId)>, StoreError> {
        let slots: Vec<_> = self.events.read().await.values().cloned().collect();

        let mut orphans = Vec::new();
        for slot in slots {
            let event = slot.lock().await;
            orphans.extend(
                event
                    .attendees
                    .iter()
                    .filter(|a| {
                        a.status == PaymentStatus::Pending
                            && a.payment_reference.is_none()
                            && a.reserved_at < cutoff
                    })
                    .map(|a| (event.id, a.user_id)),
            );
        }
        Ok(orphans)
    }

    async fn referenced_pending_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<CheckoutRequestId>, StoreError> {
        let slots: Vec<_> = self.events.read().await.values().cloned().collect();

        let mut references = Vec::new();
        for slot in slots {
            let event = slot.lock().await;
            references.extend(
                event
                    .attendees
                    .iter()
                    .filter(|a| a.status == PaymentStatus::Pending && a.reserved_at < cutoff)
                    .filter_map(|a| a.payment_reference.clone()),
            );
        }
        Ok(references)
    }
}

/// In-memory user projections.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProjectionStore {
    projections: Arc<RwLock<HashMap<UserId, UserProjection>>>,
}

impl InMemoryProjectionStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserProjectionStore for InMemoryProjectionStore {
    async fn find(&self, user_id: UserId) -> Result<Option<UserProjection>, StoreError> {
        Ok(self.projections.read().await.get(&user_id).cloned())
    }

    async fn upsert_entry(&self, user_id: UserId, entry: &AttendanceRef) -> Result<(), StoreError> {
        self.projections
            .write()
            .await
            .entry(user_id)
            .or_insert_with(|| UserProjection::new(user_id))
            .upsert(entry.clone());
        Ok(())
    }

    async fn remove_entry(&self, user_id: UserId, event_id: EventId) -> Result<bool, StoreError> {
        Ok(self
            .projections
            .write()
            .await
            .get_mut(&user_id)
            .is_some_and(|p| p.remove(event_id)))
    }

    async fn replace(&self, projection: &UserProjection) -> Result<(), StoreError> {
        self.projections
            .write()
            .await
            .insert(projection.user_id, projection.clone());
        Ok(())
    }

    async fn list_user_ids(&self) -> Result<Vec<UserId>, StoreError> {
        Ok(self.projections.read().await.keys().copied().collect())
    }
}

/// In-memory payment sessions.
#[derive(Debug, Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<CheckoutRequestId, PaymentSession>>>,
}

impl InMemorySessionStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentSessionStore for InMemorySessionStore {
    async fn insert(&self, session: &PaymentSession) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.checkout_request_id) {
            return Err(StoreError::Conflict(format!(
                "payment session {} already exists",
                session.checkout_request_id
            )));
        }
        sessions.insert(session.checkout_request_id.clone(), session.clone());
        Ok(())
    }

    async fn find(&self, checkout_request_id: &CheckoutRequestId) -> Result<Option<PaymentSession>, StoreError> {
        Ok(self.sessions.read().await.get(checkout_request_id).cloned())
    }

    async fn unresolved_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<PaymentSession>, StoreError> {
        let mut open: Vec<_> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| !s.is_resolved() && s.created_at < cutoff)
            .cloned()
            .collect();
        open.sort_by_key(|s| s.created_at);
        Ok(open)
    }

    async fn resolve(
        &self,
        checkout_request_id: &CheckoutRequestId,
        outcome: &SessionOutcome,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(checkout_request_id) {
            Some(session) if !session.is_resolved() => {
                session.resolved_at = Some(at);
                session.outcome = Some(outcome.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::capacity::admission_rule;
    use rsvp_core::{Money, Rejection};

    async fn seeded(capacity: u32) -> (InMemoryEventStore, EventId) {
        let store = InMemoryEventStore::new();
        let event = Event::new("Meetup", capacity, Money::from_units(500), Utc::now());
        let id = event.id;
        store.insert_event(&event).await.unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn test_reserve_unknown_event() {
        let store = InMemoryEventStore::new();
        let rule = admission_rule(UserId::new(), Utc::now());
        assert_eq!(
            store.reserve(EventId::new(), &rule).await.unwrap(),
            ReserveOutcome::EventNotFound
        );
    }

    #[tokio::test]
    async fn test_reserve_then_full() {
        let (store, id) = seeded(1).await;
        let first = admission_rule(UserId::new(), Utc::now());
        let second = admission_rule(UserId::new(), Utc::now());

        assert!(matches!(
            store.reserve(id, &first).await.unwrap(),
            ReserveOutcome::Admitted { .. }
        ));
        assert_eq!(
            store.reserve(id, &second).await.unwrap(),
            ReserveOutcome::Rejected(Rejection::CapacityExceeded)
        );
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_swap() {
        let (store, id) = seeded(1).await;
        let user = UserId::new();
        store.reserve(id, &admission_rule(user, Utc::now())).await.unwrap();

        let reference = CheckoutRequestId::new("ws_CO_1");
        assert!(store.attach_reference(id, user, &reference).await.unwrap());
        assert!(!store.attach_reference(id, user, &reference).await.unwrap());

        let applied = store
            .transition(&reference, PaymentStatus::Paid, Utc::now())
            .await
            .unwrap();
        assert!(matches!(applied, TransitionOutcome::Applied { .. }));

        let again = store
            .transition(&reference, PaymentStatus::Failed, Utc::now())
            .await
            .unwrap();
        assert_eq!(again, TransitionOutcome::AlreadyTerminal(PaymentStatus::Paid));

        let unknown = store
            .transition(&CheckoutRequestId::new("ws_CO_x"), PaymentStatus::Paid, Utc::now())
            .await
            .unwrap();
        assert_eq!(unknown, TransitionOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_release_only_unreferenced_pending() {
        let (store, id) = seeded(2).await;
        let a = UserId::new();
        let b = UserId::new();
        store.reserve(id, &admission_rule(a, Utc::now())).await.unwrap();
        store.reserve(id, &admission_rule(b, Utc::now())).await.unwrap();
        store
            .attach_reference(id, b, &CheckoutRequestId::new("ws_CO_b"))
            .await
            .unwrap();

        assert_eq!(store.release_pending(id, a).await.unwrap(), ReleaseOutcome::Released);
        assert!(matches!(
            store.release_pending(id, b).await.unwrap(),
            ReleaseOutcome::Retained(_)
        ));
        assert_eq!(store.release_pending(id, a).await.unwrap(), ReleaseOutcome::Absent);
    }

    #[tokio::test]
    async fn test_referenced_pending_listing() {
        let (store, id) = seeded(3).await;
        let reserved_at = Utc::now();
        let (held, settled, bare) = (UserId::new(), UserId::new(), UserId::new());
        let held_ref = CheckoutRequestId::new("ws_CO_held");
        let settled_ref = CheckoutRequestId::new("ws_CO_settled");

        for user in [held, settled, bare] {
            store.reserve(id, &admission_rule(user, reserved_at)).await.unwrap();
        }
        store.attach_reference(id, held, &held_ref).await.unwrap();
        store.attach_reference(id, settled, &settled_ref).await.unwrap();
        store.transition(&settled_ref, PaymentStatus::Failed, reserved_at).await.unwrap();

        let later = reserved_at + chrono::Duration::minutes(15);
        assert_eq!(store.referenced_pending_before(later).await.unwrap(), vec![held_ref]);
        assert!(store.referenced_pending_before(reserved_at).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_session_resolves_once() {
        let store = InMemorySessionStore::new();
        let session = PaymentSession {
            checkout_request_id: CheckoutRequestId::new("ws_CO_1"),
            merchant_request_id: rsvp_core::MerchantRequestId::new("mr_1"),
            event_id: EventId::new(),
            user_id: UserId::new(),
            amount: 500,
            phone: "254712345678".into(),
            created_at: Utc::now(),
            resolved_at: None,
            outcome: None,
        };
        store.insert(&session).await.unwrap();
        assert!(store.insert(&session).await.is_err());

        let id = &session.checkout_request_id;
        assert!(store.resolve(id, &SessionOutcome::Paid, Utc::now()).await.unwrap());
        assert!(!store.resolve(id, &SessionOutcome::Expired, Utc::now()).await.unwrap());
        assert_eq!(store.find(id).await.unwrap().unwrap().outcome, Some(SessionOutcome::Paid));
    }
}
