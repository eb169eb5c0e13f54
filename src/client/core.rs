use crate::client::error_classification::AttemptFailure;
use crate::client::request::{ServiceRequest, ServiceResponse};
use crate::registry::InstanceRegistry;
use crate::resilience::{CircuitBreaker, CircuitBreakerSnapshot, Decision, RetryPolicy};
use crate::transport::{HttpCall, HttpTransport};
use crate::{Error, ErrorContext, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub(crate) struct ClientInner {
    pub(crate) service: String,
    pub(crate) registry: Option<Arc<InstanceRegistry>>,
    pub(crate) static_urls: Vec<String>,
    pub(crate) static_cursor: AtomicUsize,
    pub(crate) health_endpoint: String,
    pub(crate) transport: Arc<HttpTransport>,
    pub(crate) timeout: Duration,
    pub(crate) retry: RetryPolicy,
    pub(crate) breaker: CircuitBreaker,
}

/// Retrying, circuit-guarded HTTP client for one logical service.
///
/// Cloning is cheap and shares the breaker, registry and connection pool.
#[derive(Clone)]
pub struct ResilientClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl ResilientClient {
    pub fn service(&self) -> &str {
        &self.inner.service
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.inner.breaker
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        self.inner.breaker.snapshot()
    }

    pub fn registry(&self) -> Option<&Arc<InstanceRegistry>> {
        self.inner.registry.as_ref()
    }

    pub fn static_urls(&self) -> &[String] {
        &self.inner.static_urls
    }

    pub fn health_endpoint(&self) -> &str {
        &self.inner.health_endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.inner.retry
    }

    pub(crate) fn transport(&self) -> &Arc<HttpTransport> {
        &self.inner.transport
    }

    /// Pick a base URL: the registry first, then the static fallbacks.
    pub fn resolve_base_url(&self) -> Result<String> {
        self.inner.resolve_base_url()
    }

    /// Invoke the service.
    ///
    /// The base URL is resolved once. The whole retry sequence runs under a single
    /// breaker permit, in its own task: dropping the returned future does not stop it.
    pub async fn invoke(&self, request: ServiceRequest) -> Result<ServiceResponse> {
        let base_url = self.inner.resolve_base_url()?;
        let permit = self.inner.breaker.try_acquire()?;

        let inner = Arc::clone(&self.inner);
        let sequence = tokio::spawn(async move {
            let result = inner.attempt_sequence(&base_url, &request).await;
            match &result {
                Ok(_) => permit.success(),
                Err(_) => permit.failure(),
            }
            result
        });

        sequence.await.map_err(|e| {
            Error::runtime_with_context(
                format!("invocation task failed: {}", e),
                ErrorContext::new()
                    .with_details(self.inner.service.clone())
                    .with_source("resilient_client"),
            )
        })?
    }
}

impl ClientInner {
    fn resolve_base_url(&self) -> Result<String> {
        let registry_error = match &self.registry {
            Some(registry) => match registry.select_instance(&self.service) {
                Ok(url) => return Ok(url),
                Err(e) => Some(e),
            },
            None => None,
        };

        if !self.static_urls.is_empty() {
            let slot = self.static_cursor.fetch_add(1, Ordering::Relaxed) % self.static_urls.len();
            let url = self.static_urls[slot].clone();
            if let Some(e) = registry_error {
                debug!(
                    service = self.service.as_str(),
                    base_url = url.as_str(),
                    reason = %e,
                    "registry could not resolve service, using static fallback"
                );
            }
            return Ok(url);
        }

        Err(match registry_error {
            Some(Error::Unresolvable { reason, .. }) => Error::unresolvable(
                &self.service,
                format!("{}; no static fallback configured", reason),
            ),
            _ => Error::unresolvable(&self.service, "no registry entry and no static fallback"),
        })
    }

    async fn attempt_sequence(
        &self,
        base_url: &str,
        request: &ServiceRequest,
    ) -> Result<ServiceResponse> {
        let url = join_url(base_url, &request.path);
        let headers = outgoing_headers(request);
        let service = self.service.as_str();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let call = HttpCall {
                method: request.method.clone(),
                url: &url,
                body: request.body.as_ref(),
                headers: &headers,
                query: &request.query,
                timeout: self.timeout,
            };

            let failure = match self.transport.execute(call).await {
                Ok(response) if response.is_success() => {
                    debug!(service, url = url.as_str(), attempt = attempts, status = response.status, "call succeeded");
                    return Ok(ServiceResponse {
                        status: response.status,
                        body: response.body,
                    });
                }
                Ok(response) => AttemptFailure::from_response(response.status, &response.body),
                Err(e) => AttemptFailure::transport(e.to_string()),
            };

            match self.retry.decide(attempts, failure.class.is_retryable()) {
                Decision::Retry { delay } => {
                    warn!(
                        service,
                        url = url.as_str(),
                        attempt = attempts,
                        status = failure.status,
                        error = failure.message.as_str(),
                        delay_ms = delay.as_millis() as u64,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Decision::Fail => {
                    if failure.class.is_retryable() {
                        warn!(
                            service,
                            url = url.as_str(),
                            attempts,
                            status = failure.status,
                            error = failure.message.as_str(),
                            "retries exhausted"
                        );
                    }
                    return Err(failure.into_error(service, attempts));
                }
            }
        }
    }
}

fn outgoing_headers(request: &ServiceRequest) -> Vec<(String, String)> {
    let mut headers = request.headers.clone();
    if request.header_value("content-type").is_none() {
        headers.push(("Content-Type".to_string(), "application/json".to_string()));
    }
    if request.header_value(REQUEST_ID_HEADER).is_none() {
        headers.push((
            REQUEST_ID_HEADER.to_string(),
            uuid::Uuid::new_v4().to_string(),
        ));
    }
    headers
}

pub(crate) fn join_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if path.is_empty() {
        base.to_string()
    } else if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}
