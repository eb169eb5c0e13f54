//! Service facades: path templates, payloads and error mapping

use super::mock_server::MockServerFixture;
use gateway_resilience::registry::InstanceUpdate;
use gateway_resilience::resilience::{CircuitBreakerConfig, RetryPolicy};
use gateway_resilience::telemetry::noop_observer;
use gateway_resilience::{
    ArchiveService, CallContext, Error, InstanceRegistry, ResilientClient, RunnerService,
    SegmentationService, ServiceConfig, ServiceFacade,
};
use mockito::Matcher;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_segment_command_posts_command_and_options() {
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture
        .server
        .mock("POST", "/segment")
        .match_body(Matcher::Json(json!({"command": "list files", "options": {}})))
        .match_header("x-user-id", "u-1")
        .match_header("authorization", "Bearer token")
        .with_status(201)
        .with_body(r#"{"id":"seg-1","altFileId":"alt-1"}"#)
        .create_async()
        .await;

    let service = SegmentationService::new(fixture.client("segmentation"));
    let ctx = CallContext::new()
        .with_user_id("u-1")
        .with_authorization("Bearer token");
    let result = service
        .segment_command("list files", serde_json::Value::Null, &ctx)
        .await
        .unwrap();

    assert_eq!(result["altFileId"], "alt-1");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_segmentation_reads_and_alt_files() {
    let mut fixture = MockServerFixture::new().await;
    let status = fixture
        .mock_json("GET", "/segment/seg-1", 200, json!({"state": "completed"}))
        .await;
    let create = fixture
        .mock_json("POST", "/files/alt", 201, json!({"id": "alt-2"}))
        .await;
    let get = fixture
        .mock_json("GET", "/files/alt/alt-2", 200, json!({"content": "..."}))
        .await;

    let service = SegmentationService::new(fixture.client("segmentation"));
    let ctx = CallContext::new();
    assert_eq!(
        service.get_segmentation_status("seg-1", &ctx).await.unwrap()["state"],
        "completed"
    );
    assert_eq!(
        service.create_alt_file(json!({"steps": []}), &ctx).await.unwrap()["id"],
        "alt-2"
    );
    assert!(service.get_alt_file("alt-2", &ctx).await.is_ok());
    status.assert_async().await;
    create.assert_async().await;
    get.assert_async().await;
}

#[tokio::test]
async fn test_runner_operations() {
    let mut fixture = MockServerFixture::new().await;
    let run = fixture
        .server
        .mock("POST", "/run")
        .match_body(Matcher::Json(json!({"altFileId": "alt-1", "options": {"mode": "safe"}})))
        .with_status(202)
        .with_body(r#"{"taskId":"t-1"}"#)
        .create_async()
        .await;
    let cancel = fixture
        .mock_json("POST", "/tasks/t-1/cancel", 200, json!({"cancelled": true}))
        .await;
    let last = fixture
        .mock_json("GET", "/files/last/l-1", 200, json!({"id": "l-1"}))
        .await;

    let service = RunnerService::new(fixture.client("runner"));
    let ctx = CallContext::new().with_request_id("req-1");
    let task = service
        .run_task("alt-1", json!({"mode": "safe"}), &ctx)
        .await
        .unwrap();
    assert_eq!(task["taskId"], "t-1");
    assert_eq!(service.cancel_task("t-1", &ctx).await.unwrap()["cancelled"], true);
    assert_eq!(service.get_last_file("l-1", &ctx).await.unwrap()["id"], "l-1");

    run.assert_async().await;
    cancel.assert_async().await;
    last.assert_async().await;
}

#[tokio::test]
async fn test_missing_task_maps_to_not_found() {
    let mut fixture = MockServerFixture::new().await;
    let _m = fixture
        .mock_json_times("GET", "/tasks/t-404", 404, json!({"message": "missing"}), 1)
        .await;

    let service = RunnerService::new(fixture.client("runner"));
    let err = service
        .get_task_status("t-404", &CallContext::new())
        .await
        .unwrap_err();

    match err {
        Error::NotFound { service, message } => {
            assert_eq!(service, "runner");
            assert_eq!(message, "Task not found: t-404");
        }
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn test_archive_operations_and_service_error() {
    let mut fixture = MockServerFixture::new().await;
    let archive = fixture
        .server
        .mock("POST", "/archive")
        .match_body(Matcher::Json(json!({"lastFileId": "l-1", "metadata": {"tag": "x"}})))
        .with_status(201)
        .with_body(r#"{"archiveId":"a-1"}"#)
        .create_async()
        .await;
    let item = fixture
        .mock_json("GET", "/items/a-1", 200, json!({"id": "a-1"}))
        .await;
    let atlas = fixture
        .mock_json("GET", "/files/atlas/at-1", 200, json!({"id": "at-1"}))
        .await;
    let _search = fixture
        .mock_json("POST", "/search", 500, json!({"message": "index offline"}))
        .await;

    let client = fixture
        .client_builder("archive")
        .retry_policy(RetryPolicy::new(1, Duration::from_millis(5)))
        .build()
        .unwrap();
    let service = ArchiveService::new(client);
    let ctx = CallContext::new();

    assert_eq!(
        service
            .archive_result("l-1", json!({"tag": "x"}), &ctx)
            .await
            .unwrap()["archiveId"],
        "a-1"
    );
    assert!(service.get_archive_item("a-1", &ctx).await.is_ok());
    assert!(service.get_atlas_file("at-1", &ctx).await.is_ok());

    let err = service
        .search_archive(json!({"q": "x"}), &ctx)
        .await
        .unwrap_err();
    match err {
        Error::Service {
            ref service,
            status,
            ref message,
        } => {
            assert_eq!(service, "archive");
            assert_eq!(status, Some(500));
            assert_eq!(message, "index offline");
        }
        ref other => panic!("expected Service error, got {other:?}"),
    }
    assert_eq!(err.to_string(), "archive service error: index offline");

    archive.assert_async().await;
    item.assert_async().await;
    atlas.assert_async().await;
}

#[tokio::test]
async fn test_circuit_open_passes_through_facade() {
    let mut fixture = MockServerFixture::new().await;
    let _m = fixture.mock_json("GET", "/items/z", 500, json!({})).await;

    let client = fixture
        .client_builder("archive")
        .retry_policy(RetryPolicy::no_retry())
        .circuit_breaker(
            CircuitBreakerConfig::new()
                .with_failure_threshold(1)
                .with_reset_timeout(Duration::from_secs(60)),
        )
        .build()
        .unwrap();
    let service = ArchiveService::new(client);
    let ctx = CallContext::new();

    assert!(matches!(
        service.get_archive_item("z", &ctx).await,
        Err(Error::Service { .. })
    ));
    assert!(matches!(
        service.get_archive_item("z", &ctx).await,
        Err(Error::CircuitOpen { .. })
    ));
}

#[tokio::test]
async fn test_unresolvable_passes_through_facade() {
    let client = ResilientClient::builder("runner")
        .build()
        .unwrap();
    let service = RunnerService::new(client);
    assert!(matches!(
        service.get_task_status("t-1", &CallContext::new()).await,
        Err(Error::Unresolvable { .. })
    ));
}

#[tokio::test]
async fn test_health_check_uses_endpoint_when_unregistered() {
    let mut fixture = MockServerFixture::new().await;
    let _ok = fixture
        .mock_json("GET", "/health", 200, json!({"status": "ok"}))
        .await;
    let healthy = SegmentationService::new(fixture.client("segmentation"));
    assert!(healthy.health_check().await);

    let mut degraded_fixture = MockServerFixture::new().await;
    let _degraded = degraded_fixture
        .mock_json("GET", "/health", 200, json!({"status": "degraded"}))
        .await;
    let degraded = SegmentationService::new(degraded_fixture.client("segmentation"));
    assert!(!degraded.health_check().await);
}

#[tokio::test]
async fn test_health_check_uses_registry_view_when_registered() {
    let fixture = MockServerFixture::new().await;
    let registry = Arc::new(InstanceRegistry::new());
    registry
        .upsert_instance("runner", InstanceUpdate::new("http://runner-1:3002"))
        .unwrap();

    let client = fixture.client_builder("runner").registry(registry).build().unwrap();
    let service = RunnerService::new(client);
    assert_eq!(service.service_name(), "runner");
    assert!(service.health_check().await);
}

#[tokio::test]
async fn test_health_check_uses_configured_endpoint() {
    let mut fixture = MockServerFixture::new().await;
    let status = fixture
        .mock_json_times("GET", "/status", 200, json!({"status": "ok"}), 1)
        .await;
    let default_path = fixture
        .mock_json_times("GET", "/health", 503, json!({}), 0)
        .await;

    let mut config = ServiceConfig::runner().with_static_urls([fixture.base_url.clone()]);
    config.health_endpoint = "/status".into();
    let client = ResilientClient::from_config(&config, None, noop_observer()).unwrap();

    assert!(RunnerService::new(client).health_check().await);
    status.assert_async().await;
    default_path.assert_async().await;
}
