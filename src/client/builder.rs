use crate::client::core::{ClientInner, ResilientClient};
use crate::config::ServiceConfig;
use crate::registry::{normalize_base_url, normalize_path, InstanceRegistry, DEFAULT_HEALTH_ENDPOINT};
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, RetryPolicy};
use crate::telemetry::{noop_observer, ResilienceObserver};
use crate::transport::HttpTransport;
use crate::{Error, ErrorContext, Result};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

/// Builder for [`ResilientClient`].
pub struct ResilientClientBuilder {
    service: String,
    registry: Option<Arc<InstanceRegistry>>,
    static_urls: Vec<String>,
    health_endpoint: String,
    transport: Option<Arc<HttpTransport>>,
    timeout: Duration,
    retry: RetryPolicy,
    breaker: CircuitBreakerConfig,
    observer: Arc<dyn ResilienceObserver>,
}

impl ResilientClient {
    pub fn builder(service: impl Into<String>) -> ResilientClientBuilder {
        ResilientClientBuilder::new(service)
    }

    /// Client configured from a service's settings.
    pub fn from_config(
        config: &ServiceConfig,
        registry: Option<Arc<InstanceRegistry>>,
        observer: Arc<dyn ResilienceObserver>,
    ) -> Result<Self> {
        let mut builder = ResilientClientBuilder::from_config(config).observer(observer);
        if let Some(registry) = registry {
            builder = builder.registry(registry);
        }
        builder.build()
    }
}

impl ResilientClientBuilder {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            registry: None,
            static_urls: Vec::new(),
            health_endpoint: DEFAULT_HEALTH_ENDPOINT.to_string(),
            transport: None,
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            breaker: CircuitBreakerConfig::default(),
            observer: noop_observer(),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(config.name.clone())
            .static_urls(config.static_urls.clone())
            .health_endpoint(config.health_endpoint.clone())
            .timeout(config.timeout)
            .retry_policy(config.retry_policy())
            .circuit_breaker(config.circuit_breaker_config())
    }

    pub fn registry(mut self, registry: Arc<InstanceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn static_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.static_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Path of the service's health endpoint, relative to its base URL.
    pub fn health_endpoint(mut self, path: impl Into<String>) -> Self {
        self.health_endpoint = path.into();
        self
    }

    /// Share a connection pool with other clients.
    pub fn transport(mut self, transport: Arc<HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn circuit_breaker(mut self, cfg: CircuitBreakerConfig) -> Self {
        self.breaker = cfg;
        self
    }

    /// Observer for this client's breaker transitions.
    pub fn observer(mut self, observer: Arc<dyn ResilienceObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn build(self) -> Result<ResilientClient> {
        if self.service.trim().is_empty() {
            return Err(Error::configuration_with_context(
                "service name must not be empty",
                ErrorContext::new()
                    .with_field_path("service")
                    .with_source("client_builder"),
            ));
        }

        let transport = match self.transport {
            Some(t) => t,
            None => Arc::new(HttpTransport::new()?),
        };

        let static_urls = self
            .static_urls
            .iter()
            .map(|u| normalize_base_url(u))
            .filter(|u| !u.is_empty())
            .collect();

        let breaker = CircuitBreaker::with_observer(self.service.clone(), self.breaker, self.observer);

        Ok(ResilientClient {
            inner: Arc::new(ClientInner {
                service: self.service,
                registry: self.registry,
                static_urls,
                static_cursor: AtomicUsize::new(0),
                health_endpoint: normalize_path(&self.health_endpoint),
                transport,
                timeout: self.timeout,
                retry: self.retry,
                breaker,
            }),
        })
    }
}
