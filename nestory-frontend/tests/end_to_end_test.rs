mod common;

use common::{TestApp, PNG_BYTES, TEST_API_KEY};
use nestory_frontend::lifecycle::{
    ClientError, ControllerSettings, JobApi, JobController, Phase, ProxyClient,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_settings() -> ControllerSettings {
    ControllerSettings {
        poll_interval: Duration::from_millis(50),
        progress_interval: Duration::from_millis(20),
        timeout: Duration::from_secs(10),
    }
}

async fn wait_until_settled(controller: &JobController) -> Phase {
    let mut updates = controller.subscribe();
    let settled = tokio::time::timeout(
        Duration::from_secs(10),
        updates.wait_for(|s| matches!(s.phase, Phase::Done | Phase::Error)),
    )
    .await
    .expect("job did not settle")
    .expect("controller dropped")
    .phase;
    settled
}

#[tokio::test]
async fn browser_flow_through_the_proxy() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/submit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "job_id": "e2e-1" })))
        .expect(1)
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/status/e2e-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "queued" })))
        .up_to_n_times(2)
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/status/e2e-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "completed" })))
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/result/e2e-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(PNG_BYTES),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let app = TestApp::spawn(&upstream.uri(), Some(TEST_API_KEY)).await;
    let client = ProxyClient::new(&app.address).expect("Failed to build client");
    let controller = JobController::new(Arc::new(client), fast_settings());

    controller.generate("a cute superhero child", 10).await.unwrap();
    assert_eq!(controller.snapshot().job_id.as_deref(), Some("e2e-1"));

    assert_eq!(wait_until_settled(&controller).await, Phase::Done);

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.progress, 100.0);
    assert_eq!(controller.images().len(), 1);
    assert_eq!(controller.image().as_deref(), Some(PNG_BYTES));
}

#[tokio::test]
async fn proxy_error_message_reaches_the_controller() {
    let upstream = MockServer::start().await;
    let app = TestApp::spawn(&upstream.uri(), None).await;
    let client = ProxyClient::new(&app.address).expect("Failed to build client");
    let controller = JobController::new(Arc::new(client), fast_settings());

    controller.generate("a fox", 10).await.unwrap();

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.phase, Phase::Error);
    assert_eq!(snapshot.progress, 0.0);
    assert_eq!(
        snapshot.error.as_deref(),
        Some("Missing IMAGE_API_KEY (server did not load env vars)")
    );
}

#[tokio::test]
async fn non_image_result_is_reported_with_snippet() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/result/x1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("still rendering"))
        .mount(&upstream)
        .await;

    let app = TestApp::spawn(&upstream.uri(), Some(TEST_API_KEY)).await;
    let client = ProxyClient::new(&app.address).expect("Failed to build client");

    let err = client.result("x1").await.unwrap_err();
    assert!(matches!(err, ClientError::BadResult { status: 502, .. }));
    assert!(err.to_string().starts_with("Result failed (502): {"));
}

#[tokio::test]
async fn story_endpoints_through_the_client() {
    let upstream = MockServer::start().await;
    let app = TestApp::spawn(&upstream.uri(), None).await;
    let client = ProxyClient::new(&app.address).expect("Failed to build client");

    let topics = client.topics().await.unwrap();
    let keys: Vec<&str> = topics.iter().map(|t| t.key.as_str()).collect();
    assert_eq!(keys, vec!["space", "ocean", "jungle"]);

    let story = client.story("נועם", "jungle").await.unwrap();
    assert_eq!(story.topic_title, "ג׳ונגל מסתורי");
    assert!(story.story.contains("נועם"));

    let err = client.story("נועם", "mars").await.unwrap_err();
    assert_eq!(err.to_string(), "נושא לא חוקי");
}
