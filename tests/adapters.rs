//! HTTP Adapter Integration Tests
//!
//! Extractor, Stripe meter, org directory and Slack clients against a mock
//! server.

use serde_json::json;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use extractor_workflows::adapters::{
    Activity, AlertSink, CustomerDirectory, ExtractorClient, MeterClient, OrgDirectory,
    SlackNotifier, StripeMeter,
};
use extractor_workflows::domain::{ActivityId, WorkflowPayload, WorkflowRequest};
use extractor_workflows::{ErrorKind, WorkflowError};

fn recipe_request() -> WorkflowRequest {
    WorkflowRequest::new(
        "o1",
        "p1",
        Some("c1".to_string()),
        WorkflowPayload::RecipeOnTask {
            recipe_id: "r1".to_string(),
            task_ids: vec!["t1".to_string(), "t2".to_string()],
            time_range: None,
        },
    )
}

#[tokio::test]
async fn test_extractor_posts_request_and_reads_job_count() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/pipelines/recipes"))
        .and(header("authorization", "Bearer secret"))
        .and(body_partial_json(json!({
            "org_id": "o1",
            "project_id": "p1",
            "recipe_id": "r1",
            "task_ids": ["t1", "t2"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "nb_job_results": 2
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = ExtractorClient::new(server.uri(), "secret", reqwest::Client::new());
    let output = client
        .execute(ActivityId::RunRecipeOnTask, &recipe_request())
        .await
        .unwrap();

    assert_eq!(output.nb_job_results, 2);
    assert_eq!(output.payload["status"], "ok");
}

#[tokio::test]
async fn test_extractor_error_classification() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/pipelines/log/tasks"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/pipelines/recipes"))
        .respond_with(ResponseTemplate::new(422).set_body_string("task t9 not found"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/pipelines/langsmith"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;

    let client = ExtractorClient::new(server.uri(), "secret", reqwest::Client::new());
    let request = recipe_request();

    let err = client
        .execute(ActivityId::RunProcessLogForTasks, &request)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransientExternal);

    let err = client
        .execute(ActivityId::RunRecipeOnTask, &request)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.message().contains("t9"));

    let err = client
        .execute(ActivityId::ExtractLangsmithData, &request)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermanentExternal);
}

#[tokio::test]
async fn test_extractor_unreachable_is_transient() {
    // Nothing listens on the discard port
    let client = ExtractorClient::new("http://127.0.0.1:9", "secret", reqwest::Client::new());
    let err = client
        .execute(ActivityId::RunRecipeOnTask, &recipe_request())
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::TransientExternal(_)));
    assert!(client.health_check().await.is_err());
}

#[tokio::test]
async fn test_extractor_health_check() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/health"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = ExtractorClient::new(server.uri(), "secret", reqwest::Client::new());
    tokio_test::assert_ok!(client.health_check().await);
}

#[tokio::test]
async fn test_stripe_meter_event() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/billing/meter_events"))
        .and(header("authorization", "Bearer sk_test"))
        .and(header("idempotency-key", "inst-billing-abc"))
        .and(body_string_contains("event_name=phospho_usage_based_meter"))
        .and(body_string_contains("payload%5Bvalue%5D=2"))
        .and(body_string_contains("payload%5Bstripe_customer_id%5D=c1"))
        .and(body_string_contains("identifier=inst-billing-abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "billing.meter_event"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let meter = StripeMeter::new(server.uri(), "sk_test", reqwest::Client::new());
    tokio_test::assert_ok!(
        meter
            .record("phospho_usage_based_meter", "c1", 2, "inst-billing-abc")
            .await
    );
}

#[tokio::test]
async fn test_stripe_rate_limit_is_transient() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/billing/meter_events"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let meter = StripeMeter::new(server.uri(), "sk_test", reqwest::Client::new());
    let err = meter
        .record("phospho_usage_based_meter", "c1", 2, "id")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TransientExternal);
}

#[tokio::test]
async fn test_org_directory_lookup() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/backend/v1/org/o1"))
        .and(header("authorization", "Bearer auth_key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "org_id": "o1",
            "name": "Acme",
            "metadata": { "customer_id": "cus_42" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/backend/v1/org/o2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "org_id": "o2",
            "metadata": {}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/backend/v1/org/o3"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/backend/v1/org/o4"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let directory = OrgDirectory::new(server.uri(), "auth_key", reqwest::Client::new());

    assert_eq!(
        directory.customer_id("o1").await.unwrap(),
        Some("cus_42".to_string())
    );
    assert_eq!(directory.customer_id("o2").await.unwrap(), None);
    assert_eq!(directory.customer_id("o3").await.unwrap(), None);

    let err = directory.customer_id("o4").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BillingLookup);
}

#[tokio::test]
async fn test_slack_alert_is_truncated() {
    let server = MockServer::start().await;
    let long_message = "x".repeat(500);

    Mock::given(method("POST"))
        .and(path("/hooks/alerts"))
        .and(body_partial_json(json!({ "text": "x".repeat(200) })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = SlackNotifier::new(
        format!("{}/hooks/alerts", server.uri()),
        reqwest::Client::new(),
    );
    tokio_test::assert_ok!(notifier.notify(&long_message).await);
}
