//! Wiring of the whole resilience layer from a [`GatewayConfig`].

use crate::client::{ResilientClient, ResilientClientBuilder};
use crate::config::{GatewayConfig, ServiceConfig};
use crate::health::{HealthCheckConfig, HealthProber, ProbeRound};
use crate::registry::{
    HealthReport, HttpRegistrySource, InstanceRegistry, InstanceUpdate, RegistryRefresher,
};
use crate::resilience::CircuitBreakerSnapshot;
use crate::services::{ArchiveService, RunnerService, SegmentationService};
use crate::telemetry::{ResilienceObserver, TracingObserver};
use crate::transport::HttpTransport;
use crate::{Error, ErrorContext, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Point-in-time view for health endpoints and operators.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatus {
    pub registry_enabled: bool,
    pub breakers: Vec<CircuitBreakerSnapshot>,
    pub health: HealthReport,
}

/// Owns the registry, the service facades and the background jobs.
///
/// Background tasks are aborted on [`Gateway::shutdown`] or when the gateway is dropped.
pub struct Gateway {
    config: GatewayConfig,
    registry: Arc<InstanceRegistry>,
    transport: Arc<HttpTransport>,
    segmentation: SegmentationService,
    runner: RunnerService,
    archive: ArchiveService,
    tasks: Vec<JoinHandle<()>>,
}

impl Gateway {
    /// Start with transitions logged through `tracing`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: GatewayConfig) -> Result<Self> {
        Self::start_with_observer(config, Arc::new(TracingObserver))
    }

    pub fn start_with_observer(
        config: GatewayConfig,
        observer: Arc<dyn ResilienceObserver>,
    ) -> Result<Self> {
        config.validate()?;

        let transport = Arc::new(HttpTransport::new()?);
        let registry = Arc::new(InstanceRegistry::new());

        // Everything fallible happens before the first task is spawned.
        let registry_url = if config.registry.enabled {
            Some(config.registry.url.clone().ok_or_else(|| {
                Error::configuration_with_context(
                    "registry URL is required when the service registry is enabled",
                    ErrorContext::new()
                        .with_field_path("registry.url")
                        .with_source("gateway"),
                )
            })?)
        } else {
            None
        };

        let client = |service: &ServiceConfig| -> Result<ResilientClient> {
            ResilientClientBuilder::from_config(service)
                .registry(registry.clone())
                .transport(transport.clone())
                .observer(observer.clone())
                .build()
        };
        let segmentation = SegmentationService::new(client(&config.segmentation)?);
        let runner = RunnerService::new(client(&config.runner)?);
        let archive = ArchiveService::new(client(&config.archive)?);

        // Probers subscribe before seeding so seeded instances get probed right away.
        let mut probe_configs: Vec<HealthCheckConfig> = config
            .services()
            .iter()
            .map(|service| service.health_check_config(config.health_check_timeout))
            .collect();
        probe_configs.push(config.unconfigured_health_check_config());

        let mut tasks: Vec<JoinHandle<()>> = probe_configs
            .into_iter()
            .map(|probe_config| {
                HealthProber::new(registry.clone(), transport.clone(), probe_config)
                    .with_observer(observer.clone())
                    .spawn()
            })
            .collect();

        for service in config.services() {
            seed_static_instances(&registry, service);
        }

        if let Some(url) = registry_url {
            let source = HttpRegistrySource::new(url.clone(), transport.clone())
                .with_timeout(config.health_check_timeout);
            tasks.push(
                RegistryRefresher::new(
                    registry.clone(),
                    Arc::new(source),
                    config.registry.refresh_interval,
                )
                .spawn(),
            );
            info!(registry_url = url.as_str(), "central service registry enabled");
        }

        let gateway = Self {
            segmentation,
            runner,
            archive,
            registry,
            transport,
            tasks,
            config,
        };

        info!(
            services = ?gateway.registry.service_names(),
            background_tasks = gateway.tasks.len(),
            "gateway resilience layer started"
        );
        Ok(gateway)
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    pub fn segmentation(&self) -> &SegmentationService {
        &self.segmentation
    }

    pub fn runner(&self) -> &RunnerService {
        &self.runner
    }

    pub fn archive(&self) -> &ArchiveService {
        &self.archive
    }

    /// Run one probe round over every registered instance now.
    pub async fn probe_now(&self) -> ProbeRound {
        HealthProber::new(
            self.registry.clone(),
            self.transport.clone(),
            HealthCheckConfig::default().with_timeout(self.config.health_check_timeout),
        )
        .probe_all()
        .await
    }

    pub fn status(&self) -> GatewayStatus {
        use crate::services::ServiceFacade;
        GatewayStatus {
            registry_enabled: self.config.registry.enabled,
            breakers: vec![
                self.segmentation.client().snapshot(),
                self.runner.client().snapshot(),
                self.archive.client().snapshot(),
            ],
            health: self.registry.health_report(),
        }
    }

    pub fn shutdown(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("gateway background tasks stopped");
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn seed_static_instances(registry: &InstanceRegistry, service: &ServiceConfig) {
    for url in &service.static_urls {
        let update = InstanceUpdate::new(url.clone()).with_health_endpoint(service.health_endpoint.clone());
        if let Err(e) = registry.upsert_instance(&service.name, update) {
            warn!(service = service.name.as_str(), base_url = url.as_str(), error = %e, "could not seed static instance");
        }
    }
}
