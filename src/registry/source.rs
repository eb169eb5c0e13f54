//! External sources of truth for the registry and the periodic refresh job.

use super::{InstanceRegistry, ServiceSnapshot};
use crate::transport::{HttpCall, HttpTransport};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Anything that can list the current services and their instances.
#[async_trait]
pub trait RegistrySource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<ServiceSnapshot>>;
}

/// `GET {registry_url}/services` against a central service registry.
pub struct HttpRegistrySource {
    registry_url: String,
    transport: Arc<HttpTransport>,
    timeout: Duration,
}

impl HttpRegistrySource {
    pub fn new(registry_url: impl Into<String>, transport: Arc<HttpTransport>) -> Self {
        Self {
            registry_url: registry_url.into().trim_end_matches('/').to_string(),
            transport,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn services_url(&self) -> String {
        format!("{}/services", self.registry_url)
    }
}

#[async_trait]
impl RegistrySource for HttpRegistrySource {
    async fn fetch(&self) -> Result<Vec<ServiceSnapshot>> {
        let url = self.services_url();
        let response = self
            .transport
            .execute(HttpCall::get(&url, self.timeout))
            .await?;

        if !response.is_success() {
            return Err(Error::runtime_with_context(
                format!("service registry returned HTTP {}", response.status),
                ErrorContext::new()
                    .with_details(url)
                    .with_source("registry_source"),
            ));
        }

        Ok(serde_json::from_value(response.body)?)
    }
}

/// Fixed snapshot held in memory; replaceable at runtime.
#[derive(Default)]
pub struct StaticRegistrySource {
    snapshot: Mutex<Vec<ServiceSnapshot>>,
}

impl StaticRegistrySource {
    pub fn new(snapshot: Vec<ServiceSnapshot>) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
        }
    }

    pub fn replace(&self, snapshot: Vec<ServiceSnapshot>) {
        *self.snapshot.lock().unwrap_or_else(|e| e.into_inner()) = snapshot;
    }
}

#[async_trait]
impl RegistrySource for StaticRegistrySource {
    async fn fetch(&self) -> Result<Vec<ServiceSnapshot>> {
        Ok(self
            .snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }
}

/// Periodically reconciles the registry against a [`RegistrySource`].
pub struct RegistryRefresher {
    registry: Arc<InstanceRegistry>,
    source: Arc<dyn RegistrySource>,
    interval: Duration,
}

impl RegistryRefresher {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        source: Arc<dyn RegistrySource>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            source,
            interval,
        }
    }

    /// Fetch once and reconcile. A failed fetch leaves the registry untouched.
    pub async fn refresh_once(&self) -> Result<super::RefreshSummary> {
        let snapshot = self.source.fetch().await?;
        let summary = self.registry.refresh_from_source(snapshot);
        if summary.removed_instances > 0 || summary.removed_services > 0 {
            info!(
                upserted = summary.upserted,
                removed_instances = summary.removed_instances,
                removed_services = summary.removed_services,
                "registry refreshed"
            );
        } else {
            debug!(upserted = summary.upserted, "registry refreshed");
        }
        Ok(summary)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.refresh_once().await {
                    warn!(error = %e, "registry refresh failed, keeping current view");
                }
            }
        })
    }
}
