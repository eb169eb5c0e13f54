//! Background health probing of registered instances.
//!
//! A [`HealthProber`] probes every instance in its [`ProbeScope`] on a fixed
//! interval, and additionally probes any instance the registry reports
//! as freshly upserted. Probes run concurrently, each bounded by its own timeout,
//! and results are written back to the registry as soon as each one finishes.

use crate::registry::{InstanceRegistry, InstanceStatus, ProbeOutcome, ProbeTarget, ServiceInstance};
use crate::telemetry::{noop_observer, ResilienceObserver};
use crate::transport::{HttpCall, HttpResponse, HttpTransport};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

pub const HEALTH_CHECK_HEADER: &str = "X-Health-Check";

/// Which services a prober is responsible for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ProbeScope {
    #[default]
    All,
    Only(String),
    /// Every service except these, for a catch-all prober next to scoped ones.
    Except(Vec<String>),
}

impl ProbeScope {
    pub fn covers(&self, service_name: &str) -> bool {
        match self {
            ProbeScope::All => true,
            ProbeScope::Only(name) => name == service_name,
            ProbeScope::Except(names) => !names.iter().any(|n| n == service_name),
        }
    }

    fn label(&self) -> String {
        match self {
            ProbeScope::All => "*".to_string(),
            ProbeScope::Only(name) => name.clone(),
            ProbeScope::Except(names) => format!("* - [{}]", names.join(", ")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    pub interval: Duration,
    /// Per-probe bound, independent of the interval.
    pub timeout: Duration,
    pub scope: ProbeScope,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            scope: ProbeScope::All,
        }
    }
}

impl HealthCheckConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Probe only `service`.
    pub fn with_scope(mut self, service: impl Into<String>) -> Self {
        self.scope = ProbeScope::Only(service.into());
        self
    }

    /// Probe every service except `services`.
    pub fn except<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope = ProbeScope::Except(services.into_iter().map(Into::into).collect());
        self
    }

    fn covers(&self, service_name: &str) -> bool {
        self.scope.covers(service_name)
    }
}

/// Counts from one full probe round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeRound {
    pub probed: usize,
    pub active: usize,
    pub degraded: usize,
    pub inactive: usize,
}

impl ProbeRound {
    fn record(&mut self, status: InstanceStatus) {
        self.probed += 1;
        match status {
            InstanceStatus::Active => self.active += 1,
            InstanceStatus::Degraded => self.degraded += 1,
            InstanceStatus::Inactive => self.inactive += 1,
        }
    }
}

struct ProberInner {
    registry: Arc<InstanceRegistry>,
    transport: Arc<HttpTransport>,
    config: HealthCheckConfig,
    observer: Arc<dyn ResilienceObserver>,
}

pub struct HealthProber {
    inner: Arc<ProberInner>,
    requests: mpsc::UnboundedReceiver<ProbeTarget>,
}

impl HealthProber {
    /// Create a prober and attach it to the registry's upsert notifications.
    pub fn new(
        registry: Arc<InstanceRegistry>,
        transport: Arc<HttpTransport>,
        config: HealthCheckConfig,
    ) -> Self {
        let requests = registry.subscribe_probe_requests();
        Self {
            inner: Arc::new(ProberInner {
                registry,
                transport,
                config,
                observer: noop_observer(),
            }),
            requests,
        }
    }

    pub fn with_observer(self, observer: Arc<dyn ResilienceObserver>) -> Self {
        let inner = ProberInner {
            registry: self.inner.registry.clone(),
            transport: self.inner.transport.clone(),
            config: self.inner.config.clone(),
            observer,
        };
        Self {
            inner: Arc::new(inner),
            requests: self.requests,
        }
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.inner.config
    }

    /// Probe every in-scope instance once, concurrently.
    pub async fn probe_all(&self) -> ProbeRound {
        self.inner.probe_all().await
    }

    /// Probe one instance and apply the result. Returns `None` if it is no longer registered.
    pub async fn check_instance(
        &self,
        service_name: &str,
        instance_id: &str,
    ) -> Option<InstanceStatus> {
        let instance = self.inner.registry.instance(service_name, instance_id)?;
        self.inner.check(instance).await
    }

    /// Probe one instance without touching the registry.
    pub async fn probe_instance(&self, instance: &ServiceInstance) -> ProbeOutcome {
        probe_endpoint(
            &self.inner.transport,
            &instance.health_url(),
            self.inner.config.timeout,
        )
        .await
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let HealthProber {
            inner,
            mut requests,
        } = self;
        let mut ticker = tokio::time::interval(inner.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let round = inner.probe_all().await;
                    debug!(
                        scope = %inner.config.scope.label(),
                        probed = round.probed,
                        active = round.active,
                        degraded = round.degraded,
                        inactive = round.inactive,
                        "probe round finished"
                    );
                }
                Some(target) = requests.recv() => {
                    if !inner.config.covers(&target.service_name) {
                        continue;
                    }
                    // Out-of-band probes must not stall the periodic round.
                    let inner = Arc::clone(&inner);
                    tokio::spawn(async move {
                        if let Some(instance) =
                            inner.registry.instance(&target.service_name, &target.instance_id)
                        {
                            inner.check(instance).await;
                        }
                    });
                }
            }
        }
    }
}

impl ProberInner {
    async fn probe_all(&self) -> ProbeRound {
        let mut pending: FuturesUnordered<_> = self
            .registry
            .all_instances()
            .into_iter()
            .filter(|i| self.config.covers(&i.service_name))
            .map(|instance| self.check(instance))
            .collect();

        let mut round = ProbeRound::default();
        while let Some(status) = pending.next().await {
            if let Some(status) = status {
                round.record(status);
            }
        }
        round
    }

    async fn check(&self, instance: ServiceInstance) -> Option<InstanceStatus> {
        let outcome =
            probe_endpoint(&self.transport, &instance.health_url(), self.config.timeout).await;
        let (previous, current) = self.registry.apply_probe(
            &instance.service_name,
            &instance.instance_id,
            outcome,
        )?;

        if previous != current {
            self.observer.on_instance_status_change(
                &instance.service_name,
                &instance.instance_id,
                previous,
                current,
            );
        }
        Some(current)
    }
}

/// Probe `url` once and classify the result.
pub async fn probe_endpoint(
    transport: &HttpTransport,
    url: &str,
    timeout: Duration,
) -> ProbeOutcome {
    let headers = [(HEALTH_CHECK_HEADER.to_string(), "true".to_string())];
    let mut call = HttpCall::get(url, timeout);
    call.headers = &headers;

    // reqwest's timeout covers the request; the outer bound also covers body reads.
    match tokio::time::timeout(timeout, transport.execute(call)).await {
        Ok(Ok(response)) => classify_response(&response),
        Ok(Err(e)) => {
            warn!(url, error = %e, "health probe failed");
            ProbeOutcome::unreachable()
        }
        Err(_) => {
            warn!(url, timeout_ms = timeout.as_millis() as u64, "health probe timed out");
            ProbeOutcome::unreachable()
        }
    }
}

/// Map a probe response to an instance status.
///
/// Non-2xx is inactive. A 2xx body with `"status": "degraded"` is degraded; any
/// other or missing status value is active. `version` and `metadata` from the body
/// are kept whatever the classification.
pub fn classify_response(response: &HttpResponse) -> ProbeOutcome {
    let status = if !response.is_success() {
        InstanceStatus::Inactive
    } else if response.body.get("status").and_then(Value::as_str) == Some("degraded") {
        InstanceStatus::Degraded
    } else {
        InstanceStatus::Active
    };

    ProbeOutcome {
        status,
        version: response
            .body
            .get("version")
            .and_then(Value::as_str)
            .map(str::to_string),
        metadata: response
            .body
            .get("metadata")
            .and_then(Value::as_object)
            .cloned(),
    }
}
