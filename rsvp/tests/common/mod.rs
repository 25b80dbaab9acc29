//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use rsvp::app::{Services, Stores};
use rsvp::config::Config;
use rsvp::identity::StaticTokenIdentity;
use rsvp::store::{InMemoryEventStore, InMemoryProjectionStore, InMemorySessionStore};
use chrono::{DateTime, Utc};
use rsvp_core::{
    AttendanceRef, CheckoutRequestId, Clock, Event, EventId, EventStore, Money, PaymentSession,
    PaymentSessionStore, SessionOutcome, StoreError, UserId, UserProjection, UserProjectionStore,
};
use rsvp_testing::{ManualClock, RecordingNotifier, ScriptedGateway, test_clock};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counter of writes left to fail.
#[derive(Clone, Default)]
pub struct Outage(Arc<AtomicUsize>);

impl Outage {
    fn trip(&self, what: &str) -> Result<(), StoreError> {
        let tripped = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(StoreError::Unavailable(format!("{what} offline")))
        } else {
            Ok(())
        }
    }
}

/// Projection store that fails the next `n` writes.
#[derive(Clone, Default)]
pub struct FlakyProjectionStore {
    inner: InMemoryProjectionStore,
    outage: Outage,
}

impl FlakyProjectionStore {
    pub fn fail_next(&self, n: usize) {
        self.outage.0.store(n, Ordering::SeqCst);
    }

    fn trip(&self) -> Result<(), StoreError> {
        self.outage.trip("projection store")
    }
}

#[async_trait]
impl UserProjectionStore for FlakyProjectionStore {
    async fn find(&self, user_id: UserId) -> Result<Option<UserProjection>, StoreError> {
        self.inner.find(user_id).await
    }

    async fn upsert_entry(&self, user_id: UserId, entry: &AttendanceRef) -> Result<(), StoreError> {
        self.trip()?;
        self.inner.upsert_entry(user_id, entry).await
    }

    async fn remove_entry(&self, user_id: UserId, event_id: EventId) -> Result<bool, StoreError> {
        self.trip()?;
        self.inner.remove_entry(user_id, event_id).await
    }

    async fn replace(&self, projection: &UserProjection) -> Result<(), StoreError> {
        self.trip()?;
        self.inner.replace(projection).await
    }

    async fn list_user_ids(&self) -> Result<Vec<UserId>, StoreError> {
        self.inner.list_user_ids().await
    }
}

/// Session store that fails the next `n` inserts.
#[derive(Clone, Default)]
pub struct FlakySessionStore {
    inner: InMemorySessionStore,
    outage: Outage,
}

impl FlakySessionStore {
    pub fn fail_next(&self, n: usize) {
        self.outage.0.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentSessionStore for FlakySessionStore {
    async fn insert(&self, session: &PaymentSession) -> Result<(), StoreError> {
        self.outage.trip("session store")?;
        self.inner.insert(session).await
    }

    async fn find(&self, checkout_request_id: &CheckoutRequestId) -> Result<Option<PaymentSession>, StoreError> {
        self.inner.find(checkout_request_id).await
    }

    async fn unresolved_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<PaymentSession>, StoreError> {
        self.inner.unresolved_before(cutoff).await
    }

    async fn resolve(
        &self,
        checkout_request_id: &CheckoutRequestId,
        outcome: &SessionOutcome,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner.resolve(checkout_request_id, outcome, at).await
    }
}

/// Fully wired in-memory services with controllable collaborators.
pub struct Harness {
    pub services: Services,
    pub gateway: ScriptedGateway,
    pub notifier: RecordingNotifier,
    pub clock: ManualClock,
    pub projections: FlakyProjectionStore,
    pub sessions: FlakySessionStore,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_gateway(ScriptedGateway::new())
    }

    pub fn with_gateway(gateway: ScriptedGateway) -> Self {
        Self::build(gateway, StaticTokenIdentity::default())
    }

    pub fn with_identity(identity: StaticTokenIdentity) -> Self {
        Self::build(ScriptedGateway::new(), identity)
    }

    fn build(gateway: ScriptedGateway, identity: StaticTokenIdentity) -> Self {
        let notifier = RecordingNotifier::new();
        let clock = ManualClock::new(test_clock().now());
        let projections = FlakyProjectionStore::default();
        let sessions = FlakySessionStore::default();
        let stores = Stores {
            events: Arc::new(InMemoryEventStore::new()),
            projections: Arc::new(projections.clone()),
            sessions: Arc::new(sessions.clone()),
        };
        let config = Config::from_lookup(|_| None);

        let services = Services::new(
            stores,
            Arc::new(gateway.clone()),
            Arc::new(notifier.clone()),
            Arc::new(identity),
            Arc::new(clock.clone()),
            &config.reconciliation,
        );

        Self {
            services,
            gateway,
            notifier,
            clock,
            projections,
            sessions,
        }
    }

    pub async fn create_event(&self, capacity: u32, price_units: u64) -> EventId {
        let event = Event::new("Nairobi Rust Meetup", capacity, Money::from_units(price_units), self.clock.now());
        let id = event.id;
        self.services.stores.events.insert_event(&event).await.unwrap();
        id
    }

    pub async fn event(&self, event_id: EventId) -> Event {
        self.services.stores.events.find_event(event_id).await.unwrap().unwrap()
    }

    pub async fn projection(&self, user_id: UserId) -> Option<UserProjection> {
        self.services.stores.projections.find(user_id).await.unwrap()
    }
}

/// Provider callback body in the nested `Body.stkCallback` shape.
pub fn callback_body(checkout_request_id: &str, result_code: i64, result_desc: &str) -> serde_json::Value {
    serde_json::json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": checkout_request_id,
                "ResultCode": result_code,
                "ResultDesc": result_desc,
            }
        }
    })
}
