//! Circuit breaker behaviour as seen through the client

use super::mock_server::MockServerFixture;
use gateway_resilience::resilience::{CircuitBreakerConfig, CircuitState, RetryPolicy};
use gateway_resilience::telemetry::{RecordingObserver, TransitionEvent};
use gateway_resilience::{Error, ServiceRequest};
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

fn breaker(threshold: u32, reset_ms: u64) -> CircuitBreakerConfig {
    CircuitBreakerConfig::new()
        .with_failure_threshold(threshold)
        .with_reset_timeout(Duration::from_millis(reset_ms))
}

#[tokio::test]
async fn test_open_circuit_rejects_without_network_call() {
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture
        .mock_json_times("GET", "/items/x", 500, json!({"message": "down"}), 2)
        .await;

    let client = fixture
        .client_builder("archive")
        .retry_policy(RetryPolicy::no_retry())
        .circuit_breaker(breaker(2, 60_000))
        .build()
        .unwrap();

    for _ in 0..2 {
        let err = client.invoke(ServiceRequest::get("/items/x")).await.unwrap_err();
        assert!(matches!(err, Error::Transient { .. }));
    }
    assert_eq!(client.breaker().state(), CircuitState::Open);

    let err = client.invoke(ServiceRequest::get("/items/x")).await.unwrap_err();
    assert!(matches!(err, Error::CircuitOpen { ref service, .. } if service == "archive"));

    // Still exactly two requests reached the server.
    mock.assert_async().await;
}

#[tokio::test]
async fn test_half_open_trial_success_closes_circuit() {
    let mut fixture = MockServerFixture::new().await;
    let failing = fixture
        .mock_json("GET", "/segment/s-9", 503, json!({}))
        .await;

    let recorder = Arc::new(RecordingObserver::default());
    let client = fixture
        .client_builder("segmentation")
        .retry_policy(RetryPolicy::no_retry())
        .circuit_breaker(breaker(1, 80))
        .observer(recorder.clone())
        .build()
        .unwrap();

    assert!(client.invoke(ServiceRequest::get("/segment/s-9")).await.is_err());
    assert_eq!(client.breaker().state(), CircuitState::Open);

    failing.remove_async().await;
    let _recovered = fixture
        .mock_json("GET", "/segment/s-9", 200, json!({"state": "done"}))
        .await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    let response = client.invoke(ServiceRequest::get("/segment/s-9")).await.unwrap();
    assert_eq!(response.body["state"], "done");
    assert_eq!(client.breaker().state(), CircuitState::Closed);

    assert_eq!(
        recorder.events(),
        vec![
            TransitionEvent::CircuitOpen {
                service: "segmentation".into(),
                consecutive_failures: 1,
            },
            TransitionEvent::CircuitHalfOpen {
                service: "segmentation".into(),
            },
            TransitionEvent::CircuitClose {
                service: "segmentation".into(),
            },
        ]
    );
}

#[tokio::test]
async fn test_half_open_trial_failure_reopens() {
    let mut fixture = MockServerFixture::new().await;
    let _mock = fixture.mock_json("GET", "/tasks/t-5", 500, json!({})).await;

    let client = fixture
        .client_builder("runner")
        .retry_policy(RetryPolicy::no_retry())
        .circuit_breaker(breaker(1, 80))
        .build()
        .unwrap();

    assert!(client.invoke(ServiceRequest::get("/tasks/t-5")).await.is_err());
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Trial goes through and fails.
    let err = client.invoke(ServiceRequest::get("/tasks/t-5")).await.unwrap_err();
    assert!(matches!(err, Error::Transient { .. }));
    assert_eq!(client.breaker().state(), CircuitState::Open);

    // Timer restarted: immediately rejected again.
    let err = client.invoke(ServiceRequest::get("/tasks/t-5")).await.unwrap_err();
    assert!(matches!(err, Error::CircuitOpen { .. }));
}

#[tokio::test]
async fn test_concurrent_callers_during_trial_are_rejected() {
    let mut fixture = MockServerFixture::new().await;
    let failing = fixture.mock_json("GET", "/items/y", 500, json!({})).await;

    let client = fixture
        .client_builder("archive")
        .retry_policy(RetryPolicy::no_retry())
        .circuit_breaker(breaker(1, 50))
        .build()
        .unwrap();

    assert!(client.invoke(ServiceRequest::get("/items/y")).await.is_err());
    failing.remove_async().await;

    // The trial request is held open by the server for a while.
    let _slow = fixture
        .server
        .mock("GET", "/items/y")
        .with_status(200)
        .with_chunked_body(|w| {
            std::thread::sleep(Duration::from_millis(200));
            w.write_all(b"{}")
        })
        .create_async()
        .await;

    tokio::time::sleep(Duration::from_millis(70)).await;
    let trial = {
        let client = client.clone();
        tokio::spawn(async move { client.invoke(ServiceRequest::get("/items/y")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let rejected = client.invoke(ServiceRequest::get("/items/y")).await.unwrap_err();
    assert!(matches!(rejected, Error::CircuitOpen { .. }));

    assert!(trial.await.unwrap().is_ok());
    assert_eq!(client.breaker().state(), CircuitState::Closed);
}
