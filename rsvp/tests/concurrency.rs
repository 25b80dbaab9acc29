//! Capacity gate under concurrent registrations.

#![allow(clippy::unwrap_used)]

mod common;

use common::Harness;
use futures::future::join_all;
use rsvp::Registration;
use rsvp_core::{PaymentStatus, RsvpError, UserId};
use rsvp_testing::ScriptedGateway;
use std::sync::Arc;
use std::time::Duration;

const CAPACITY: u32 = 5;
const CONTENDERS: usize = 40;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_registrations_never_exceed_capacity() {
    let harness = Arc::new(Harness::with_gateway(
        ScriptedGateway::new().with_latency(Duration::from_millis(5)),
    ));
    let event_id = harness.create_event(CAPACITY, 100).await;

    let tasks = (0..CONTENDERS).map(|_| {
        let harness = harness.clone();
        tokio::spawn(async move {
            harness
                .services
                .coordinator
                .register(event_id, UserId::new(), Some("0712345678"))
                .await
        })
    });
    let results: Vec<_> = join_all(tasks).await.into_iter().map(Result::unwrap).collect();

    let admitted = results
        .iter()
        .filter(|r| matches!(r, Ok(Registration::PaymentPending { .. })))
        .count();
    let refused = results
        .iter()
        .filter(|r| matches!(r, Err(RsvpError::CapacityExceeded)))
        .count();
    assert_eq!(admitted, CAPACITY as usize);
    assert_eq!(refused, CONTENDERS - CAPACITY as usize);

    let event = harness.event(event_id).await;
    assert_eq!(event.live_count(), CAPACITY as usize);
    assert!(event.attendees.iter().all(|a| a.status == PaymentStatus::Pending));
    assert!(event.attendees.iter().all(|a| a.payment_reference.is_some()));
    assert_eq!(harness.gateway.requests().len(), CAPACITY as usize);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_registration_admits_once() {
    let harness = Arc::new(Harness::new());
    let event_id = harness.create_event(10, 0).await;
    let user = UserId::new();

    let tasks = (0..16).map(|_| {
        let harness = harness.clone();
        tokio::spawn(async move { harness.services.coordinator.register(event_id, user, None).await })
    });
    let results: Vec<_> = join_all(tasks).await.into_iter().map(Result::unwrap).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, RsvpError::DuplicateRegistration))
    );
    assert_eq!(harness.event(event_id).await.live_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancellations_reopen_slots_under_contention() {
    let harness = Arc::new(Harness::new());
    let event_id = harness.create_event(2, 0).await;
    let holders = [UserId::new(), UserId::new()];
    for user in holders {
        harness.services.coordinator.register(event_id, user, None).await.unwrap();
    }

    let cancels = holders.map(|user| {
        let harness = harness.clone();
        tokio::spawn(async move { harness.services.coordinator.cancel(event_id, user).await })
    });
    let joiners = (0..10).map(|_| {
        let harness = harness.clone();
        tokio::spawn(async move {
            harness
                .services
                .coordinator
                .register(event_id, UserId::new(), None)
                .await
        })
    });

    for cancel in join_all(cancels).await {
        cancel.unwrap().unwrap();
    }
    let joined = join_all(joiners)
        .await
        .into_iter()
        .map(Result::unwrap)
        .filter(Result::is_ok)
        .count();

    assert!(joined <= 2);
    assert!(harness.event(event_id).await.live_count() <= 2);
}
