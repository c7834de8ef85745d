//! Idempotency Integration Tests
//!
//! Tests for idempotency key generation and step settlement on replay.

use extractor_workflows::core::{generate_idempotency_key, hash_input, EventStore};
use extractor_workflows::domain::{
    Event, EventType, Instance, StepStatus, STEP_ACTIVITY, STEP_BILLING,
};
use tempfile::TempDir;
use uuid::Uuid;

fn event(instance_id: Uuid, step: &str, event_type: EventType, key: &str) -> Event {
    Event::new(
        instance_id,
        Some(step.to_string()),
        event_type,
        key.to_string(),
        format!("{:?}", event_type),
        StepStatus::Running,
    )
}

#[tokio::test]
async fn test_idempotency_key_format() {
    let instance_id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();

    let key = generate_idempotency_key(instance_id, STEP_BILLING, "2");

    // Format: {instance_id}:{step}:{input_hash}
    let parts: Vec<&str> = key.split(':').collect();
    assert_eq!(parts.len(), 3, "Key should have 3 parts separated by colons");
    assert_eq!(parts[0], "550e8400-e29b-41d4-a716-446655440000");
    assert_eq!(parts[1], "billing");
    assert_eq!(parts[2].len(), 16, "Hash should be 16 hex characters");
    assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(parts[2], hash_input("2"));
}

#[tokio::test]
async fn test_idempotency_key_is_deterministic() {
    let instance_id = Uuid::new_v4();

    assert_eq!(
        generate_idempotency_key(instance_id, STEP_BILLING, "2"),
        generate_idempotency_key(instance_id, STEP_BILLING, "2")
    );
    assert_ne!(
        generate_idempotency_key(instance_id, STEP_BILLING, "2"),
        generate_idempotency_key(instance_id, STEP_BILLING, "3")
    );
    assert_ne!(
        generate_idempotency_key(instance_id, STEP_ACTIVITY, "2"),
        generate_idempotency_key(instance_id, STEP_BILLING, "2")
    );
    assert_ne!(
        generate_idempotency_key(instance_id, STEP_BILLING, "2"),
        generate_idempotency_key(Uuid::new_v4(), STEP_BILLING, "2")
    );
}

async fn replayed(store: &EventStore) -> Instance {
    Instance::from_events(&store.replay().await.unwrap()).unwrap()
}

#[tokio::test]
async fn test_activity_settles_only_on_commit() {
    let temp_dir = TempDir::new().unwrap();
    let instance_id = Uuid::new_v4();
    let store = EventStore::open(temp_dir.path(), instance_id).await.unwrap();
    let key = generate_idempotency_key(instance_id, STEP_ACTIVITY, "{\"org_id\":\"o1\"}");

    store
        .append(&event(instance_id, STEP_ACTIVITY, EventType::ActivityStarted, &key).with_attempt(1))
        .await
        .unwrap();
    let instance = replayed(&store).await;
    assert!(!instance.is_activity_committed());
    assert!(instance.activity_in_flight);

    // A permanently failed activity is not a committed one
    store
        .append(&event(instance_id, STEP_ACTIVITY, EventType::ActivityFailed, &key))
        .await
        .unwrap();
    let instance = replayed(&store).await;
    assert!(!instance.is_activity_committed());
    assert!(!instance.activity_in_flight);

    store
        .append(
            &event(instance_id, STEP_ACTIVITY, EventType::ActivityCompleted, &key)
                .with_data(serde_json::json!({ "nb_job_results": 2 })),
        )
        .await
        .unwrap();
    let instance = replayed(&store).await;
    assert!(instance.is_activity_committed());
    assert_eq!(instance.nb_job_results, Some(2));
}

#[tokio::test]
async fn test_billing_settles_on_any_recorded_end() {
    for settling in [
        EventType::BillingReported,
        EventType::BillingSkipped,
        EventType::BillingFailed,
    ] {
        let temp_dir = TempDir::new().unwrap();
        let instance_id = Uuid::new_v4();
        let store = EventStore::open(temp_dir.path(), instance_id).await.unwrap();
        let key = generate_idempotency_key(instance_id, STEP_BILLING, "4");

        store
            .append(&event(instance_id, STEP_BILLING, EventType::BillingStarted, &key).with_attempt(1))
            .await
            .unwrap();
        store
            .append(&event(instance_id, STEP_BILLING, EventType::BillingRetrying, &key))
            .await
            .unwrap();
        let instance = replayed(&store).await;
        assert!(!instance.is_billing_settled());
        assert_eq!(instance.billing_attempts, 1);

        store
            .append(&event(instance_id, STEP_BILLING, settling, &key))
            .await
            .unwrap();
        assert!(replayed(&store).await.is_billing_settled(), "{:?}", settling);
    }
}
