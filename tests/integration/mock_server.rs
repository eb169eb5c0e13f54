//! Mock HTTP server setup for integration tests

use gateway_resilience::resilience::{CircuitBreakerConfig, RetryPolicy};
use gateway_resilience::{ResilientClient, ResilientClientBuilder};
use mockito::{Mock, Server, ServerGuard};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Test fixture that manages a mock server
pub struct MockServerFixture {
    pub server: ServerGuard,
    pub base_url: String,
}

impl MockServerFixture {
    pub async fn new() -> Self {
        let server = Server::new_async().await;
        let base_url = server.url();
        Self { server, base_url }
    }

    /// Client builder pointed at this server with short, test-friendly settings:
    /// 2 retries 10ms apart, breaker threshold 5, 30s reset.
    pub fn client_builder(&self, service: &str) -> ResilientClientBuilder {
        ResilientClient::builder(service)
            .static_urls([self.base_url.clone()])
            .timeout(Duration::from_secs(2))
            .retry_policy(RetryPolicy::new(2, Duration::from_millis(10)))
            .circuit_breaker(
                CircuitBreakerConfig::new()
                    .with_failure_threshold(5)
                    .with_reset_timeout(Duration::from_secs(30)),
            )
    }

    pub fn client(&self, service: &str) -> ResilientClient {
        self.client_builder(service)
            .build()
            .expect("client should build")
    }

    /// Create a mock answering `method path` with a JSON body.
    pub async fn mock_json(&mut self, method: &str, path: &str, status: usize, body: Value) -> Mock {
        self.server
            .mock(method, path)
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await
    }

    /// Same as [`mock_json`](Self::mock_json) but asserting an exact hit count.
    pub async fn mock_json_times(
        &mut self,
        method: &str,
        path: &str,
        status: usize,
        body: Value,
        hits: usize,
    ) -> Mock {
        self.server
            .mock(method, path)
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .expect(hits)
            .create_async()
            .await
    }
}

/// A TCP endpoint that accepts connections and never answers.
pub async fn hanging_server() -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind local listener");
    let addr = listener.local_addr().expect("local addr");
    let handle = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    (format!("http://{}", addr), handle)
}
