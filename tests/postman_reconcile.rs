//! Postman against the in-memory platform: reservation and assignation
//! updates reach the right caller, in timestamp order, exactly once.

use chrono::Duration as TimeDelta;
use futures::future::join_all;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use taskport::api::schema::Event;
use taskport::postman_prelude::*;
use taskport::{
    Assignation, DefinitionOptions, FunctionSignature, MockPlatform, TypeDescriptor,
    prepare_definition,
};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

fn postman(platform: &Arc<MockPlatform>) -> Postman {
    Postman::new(platform.clone(), PostmanConfig::new())
}

async fn next<T>(queue: &mut Delivery<T>) -> T {
    timeout(WAIT, queue.recv())
        .await
        .expect("timed out waiting for an update")
        .expect("delivery queue closed")
}

#[tokio::test]
async fn test_reserve_delivers_active_once() {
    let platform = Arc::new(MockPlatform::new());
    let postman = postman(&platform);

    let mut queue = postman
        .reserve(&"node-1".to_string(), ReserveParams::default(), None)
        .await
        .unwrap();
    let reservation = next(&mut queue).await;
    assert_eq!(reservation.status, ReservationStatus::Active);
    assert_eq!(reservation.reference, "default");
    assert!(postman.is_watching().await);

    // The subscription's CREATE and the request's response carry the same
    // timestamp; only one of them is delivered.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(queue.try_recv().is_err());

    let key = ReservationKey::new("node-1", "default");
    assert_eq!(postman.reservation(&key), Some(reservation));
}

#[tokio::test]
async fn test_stale_assignation_updates_are_dropped() {
    let platform = Arc::new(MockPlatform::new());
    let postman = postman(&platform);

    let mut reservations = postman
        .reserve(&"node-1".to_string(), ReserveParams::default(), Some("r".into()))
        .await
        .unwrap();
    let reservation = next(&mut reservations).await;

    let mut queue = postman
        .assign(&reservation.id, vec![json!(1)], Some("call-1".into()), None)
        .await
        .unwrap();
    let assigned = next(&mut queue).await;
    assert_eq!(assigned.status, AssignationStatus::Assigned);

    let progress = platform
        .update_assignation(&assigned.id, AssignationStatus::Progress, None)
        .unwrap();
    assert_eq!(next(&mut queue).await.status, AssignationStatus::Progress);

    // Replayed out of order: older than what the caller already saw.
    let mut late = progress.clone();
    late.status = AssignationStatus::Assigned;
    late.updated_at = progress.updated_at - TimeDelta::milliseconds(1);
    platform.publish_assignation(Event::Update(late));
    platform.publish_assignation(Event::Update(progress.clone()));

    platform.update_assignation(&assigned.id, AssignationStatus::Returned, Some(vec![json!(2)]));
    let returned = next(&mut queue).await;
    assert_eq!(returned.status, AssignationStatus::Returned);
    assert_eq!(returned.returns, Some(vec![json!(2)]));
}

#[tokio::test]
async fn test_final_update_ends_the_queue() {
    let platform = Arc::new(MockPlatform::new());
    let postman = postman(&platform);
    let mut reservations = postman
        .reserve(&"node-1".to_string(), ReserveParams::default(), None)
        .await
        .unwrap();
    let reservation = next(&mut reservations).await;

    let mut queue = postman
        .assign(&reservation.id, vec![], Some("c1".into()), None)
        .await
        .unwrap();
    let assigned = next(&mut queue).await;
    assert!(postman.assignation("c1").is_some());

    platform.update_assignation(&assigned.id, AssignationStatus::Returned, Some(vec![json!(1)]));
    assert_eq!(next(&mut queue).await.status, AssignationStatus::Returned);

    let ended = timeout(WAIT, queue.recv()).await.unwrap();
    assert!(ended.is_none());
    assert!(postman.assignation("c1").is_none());
    assert!(!postman.unregister_assignation_queue("c1"));
}

#[tokio::test]
async fn test_untracked_updates_are_ignored() {
    let platform = Arc::new(MockPlatform::new());
    let postman = postman(&platform);
    let mut queue = postman
        .reserve(&"node-1".to_string(), ReserveParams::default(), None)
        .await
        .unwrap();
    let reservation = next(&mut queue).await;

    let stranger = Assignation {
        id: "foreign".into(),
        reservation: Some(reservation.id.clone()),
        args: vec![],
        kwargs: HashMap::new(),
        parent: None,
        status: AssignationStatus::Assigned,
        statusmessage: None,
        returns: None,
        reference: "nobody".into(),
        updated_at: reservation.updated_at,
    };
    platform.publish_assignation(Event::Create(stranger));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(postman.assignation("nobody").is_none());
    assert!(postman.is_watching().await);
}

#[tokio::test]
async fn test_failed_reserve_leaves_nothing_behind() {
    let platform = Arc::new(MockPlatform::new());
    let postman = postman(&platform);
    platform.fail_on("reserve");

    let result = postman
        .reserve(&"node-1".to_string(), ReserveParams::default(), Some("r".into()))
        .await;
    assert!(matches!(result, Err(PostmanError::Api(_))));
    assert!(!postman.unregister_reservation_queue(&ReservationKey::new("node-1", "r")));
}

#[tokio::test]
async fn test_unassign_reports_cancelled() {
    let platform = Arc::new(MockPlatform::new());
    let postman = postman(&platform);
    let mut reservations = postman
        .reserve(&"node-1".to_string(), ReserveParams::default(), None)
        .await
        .unwrap();
    let reservation = next(&mut reservations).await;
    let mut queue = postman
        .assign(&reservation.id, vec![], None, None)
        .await
        .unwrap();
    let assigned = next(&mut queue).await;

    let cancelled = postman.unassign(&assigned.id).await.unwrap();
    assert_eq!(cancelled.status, AssignationStatus::Cancelled);
    assert_eq!(next(&mut queue).await.status, AssignationStatus::Cancelled);

    let unreserved = postman.unreserve(&reservation.id).await.unwrap();
    assert_eq!(unreserved.status, ReservationStatus::Cancelled);
    assert_eq!(next(&mut reservations).await.status, ReservationStatus::Cancelled);
}

#[tokio::test]
async fn test_broken_subscription_closes_queues_and_restarts() {
    let platform = Arc::new(MockPlatform::new());
    let postman = postman(&platform);
    let mut queue = postman
        .reserve(&"node-1".to_string(), ReserveParams::default(), Some("a".into()))
        .await
        .unwrap();
    next(&mut queue).await;

    platform.break_subscriptions();
    let ended = timeout(WAIT, queue.recv()).await.unwrap();
    assert!(ended.is_none());

    let mut queue = postman
        .reserve(&"node-1".to_string(), ReserveParams::default(), Some("b".into()))
        .await
        .unwrap();
    assert_eq!(next(&mut queue).await.reference, "b");
    assert!(postman.is_watching().await);

    postman.stop_watching().await;
    assert!(!postman.is_watching().await);
}

#[tokio::test]
async fn test_call_round_trips_values() {
    let platform = Arc::new(MockPlatform::new());
    let postman = postman(&platform);
    let structures = StructureRegistry::new();
    let definition = prepare_definition(
        &FunctionSignature::new("add")
            .param("a", TypeDescriptor::Int)
            .param("b", TypeDescriptor::Int)
            .returns(TypeDescriptor::Int)
            .doc("Add\n\nAdds two integers."),
        &structures,
        &DefinitionOptions::new(),
    )
    .unwrap();

    let mut reservations = postman
        .reserve(&"node-1".to_string(), ReserveParams::default(), None)
        .await
        .unwrap();
    let reservation = next(&mut reservations).await;

    // Plays the agent: answers the first assignation it sees.
    let worker = platform.clone();
    tokio::spawn(async move {
        loop {
            if let Some(assignation) = worker.assignations().into_iter().next() {
                let sum: i64 = assignation.args.iter().filter_map(|a| a.as_i64()).sum();
                worker.update_assignation(
                    &assignation.id,
                    AssignationStatus::Returned,
                    Some(vec![json!(sum)]),
                );
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    let mut kwargs = HashMap::new();
    kwargs.insert("b".to_string(), Value::Int(3));
    let result = timeout(
        WAIT,
        postman.call(&reservation.id, &definition, vec![Value::Int(4)], kwargs, &structures),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(result, vec![Value::Int(7)]);
}

#[tokio::test]
async fn test_call_surfaces_failures() {
    let platform = Arc::new(MockPlatform::new());
    let postman = postman(&platform);
    let structures = StructureRegistry::new();
    let definition = prepare_definition(
        &FunctionSignature::new("boom").returns(TypeDescriptor::Int).doc("Boom\n\nAlways fails."),
        &structures,
        &DefinitionOptions::new(),
    )
    .unwrap();

    let mut reservations = postman
        .reserve(&"node-1".to_string(), ReserveParams::default(), None)
        .await
        .unwrap();
    let reservation = next(&mut reservations).await;

    let worker = platform.clone();
    tokio::spawn(async move {
        loop {
            if let Some(assignation) = worker.assignations().into_iter().next() {
                worker.update_assignation(&assignation.id, AssignationStatus::Error, None);
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    let err = timeout(
        WAIT,
        postman.call(&reservation.id, &definition, vec![], HashMap::new(), &structures),
    )
    .await
    .unwrap()
    .unwrap_err();
    assert!(matches!(
        err,
        PostmanError::AssignationFailed {
            status: AssignationStatus::Error,
            ..
        }
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_reserves_start_watchers_once() {
    let platform = Arc::new(MockPlatform::new());
    let postman = postman(&platform);

    let reserves = (0..8).map(|i| {
        let postman = postman.clone();
        tokio::spawn(async move {
            postman
                .reserve(&format!("node-{i}"), ReserveParams::default(), None)
                .await
        })
    });
    for joined in join_all(reserves).await {
        let mut queue = joined.unwrap().unwrap();
        assert_eq!(next(&mut queue).await.status, ReservationStatus::Active);
    }

    assert_eq!(platform.subscriber_count(), 2);
    assert!(postman.is_watching().await);
}

fn counter() -> (StructureRegistry, taskport::Definition) {
    let structures = StructureRegistry::new();
    let definition = prepare_definition(
        &FunctionSignature::new("count")
            .param("n", TypeDescriptor::Int)
            .returns(TypeDescriptor::Int)
            .generator()
            .doc("Count\n\nCounts up to n."),
        &structures,
        &DefinitionOptions::new(),
    )
    .unwrap();
    (structures, definition)
}

#[tokio::test]
async fn test_call_rejects_generator_nodes() {
    let platform = Arc::new(MockPlatform::new());
    let postman = postman(&platform);
    let (structures, definition) = counter();

    let err = postman
        .call(&"reservation-1".to_string(), &definition, vec![Value::Int(3)], HashMap::new(), &structures)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PostmanError::WrongNodeKind {
            operation: "call",
            ..
        }
    ));
    assert!(platform.assignations().is_empty());
}

#[tokio::test]
async fn test_iterate_collects_yields_until_done() {
    let platform = Arc::new(MockPlatform::new());
    let postman = postman(&platform);
    let (structures, definition) = counter();

    let mut reservations = postman
        .reserve(&"node-1".to_string(), ReserveParams::default(), None)
        .await
        .unwrap();
    let reservation = next(&mut reservations).await;

    // Plays the agent: yields twice, then finishes.
    let worker = platform.clone();
    tokio::spawn(async move {
        loop {
            if let Some(assignation) = worker.assignations().into_iter().next() {
                for i in 0..2 {
                    worker.update_assignation(
                        &assignation.id,
                        AssignationStatus::Yield,
                        Some(vec![json!(i)]),
                    );
                }
                worker.update_assignation(&assignation.id, AssignationStatus::Done, None);
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    let items = timeout(
        WAIT,
        postman.iterate(&reservation.id, &definition, vec![Value::Int(2)], HashMap::new(), &structures),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(items, vec![vec![Value::Int(0)], vec![Value::Int(1)]]);
}
