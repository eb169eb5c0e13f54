//! In-memory instance registry with round-robin selection over healthy instances.
//!
//! The registry is the only shared mutable view of the downstream topology. It is
//! constructed explicitly and handed to every client as `Arc<InstanceRegistry>`.
//! All reads and writes go through a single mutex; selection (pool computation plus
//! counter advance) happens under one guard, so concurrent selections never apply
//! stale counter values.

pub mod source;

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub use source::{HttpRegistrySource, RegistryRefresher, RegistrySource, StaticRegistrySource};

pub const DEFAULT_HEALTH_ENDPOINT: &str = "/health";
pub const UNKNOWN_VERSION: &str = "unknown";

/// Health classification of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Active,
    Degraded,
    Inactive,
}

impl InstanceStatus {
    /// Parse a status reported by an instance or a registry source.
    ///
    /// Unrecognized values are treated as `Active`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "degraded" => InstanceStatus::Degraded,
            "inactive" | "down" | "unhealthy" => InstanceStatus::Inactive,
            _ => InstanceStatus::Active,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Active => "active",
            InstanceStatus::Degraded => "degraded",
            InstanceStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One network-addressable endpoint of a logical service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstance {
    pub instance_id: String,
    pub service_name: String,
    pub base_url: String,
    pub version: String,
    pub status: InstanceStatus,
    /// Time of the last probe attempt; `None` until the first probe finishes.
    pub last_checked: Option<SystemTime>,
    pub health_endpoint: String,
    pub metadata: Map<String, Value>,
}

impl ServiceInstance {
    pub fn health_url(&self) -> String {
        format!("{}{}", self.base_url, self.health_endpoint)
    }

    pub fn is_selectable(&self) -> bool {
        self.status != InstanceStatus::Inactive
    }
}

/// Upsert payload; also the per-instance shape of a registry refresh snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceUpdate {
    #[serde(default)]
    pub instance_id: Option<String>,
    pub base_url: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default)]
    pub health_endpoint: Option<String>,
}

impl InstanceUpdate {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    pub fn with_status(mut self, status: InstanceStatus) -> Self {
        self.status = Some(status.as_str().to_string());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_health_endpoint(mut self, path: impl Into<String>) -> Self {
        self.health_endpoint = Some(path.into());
        self
    }

    /// Identity used to match existing instances: explicit id, else the base URL.
    pub fn resolved_id(&self) -> String {
        self.instance_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| normalize_base_url(&self.base_url))
    }
}

/// One logical service as listed by an external source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSnapshot {
    pub service_name: String,
    #[serde(default)]
    pub instances: Vec<InstanceUpdate>,
}

/// The set of instances known for one logical service.
#[derive(Debug, Clone)]
pub struct ServiceRegistration {
    pub service_name: String,
    /// Insertion order, not priority.
    pub instances: Vec<ServiceInstance>,
    pub round_robin_counter: usize,
}

impl ServiceRegistration {
    fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            instances: Vec::new(),
            round_robin_counter: 0,
        }
    }

    /// Indices of the pool selection draws from: active instances, else degraded ones.
    fn healthy_pool(&self) -> Vec<usize> {
        let pool_of = |status: InstanceStatus| -> Vec<usize> {
            self.instances
                .iter()
                .enumerate()
                .filter(|(_, i)| i.status == status)
                .map(|(idx, _)| idx)
                .collect()
        };
        let active = pool_of(InstanceStatus::Active);
        if !active.is_empty() {
            return active;
        }
        pool_of(InstanceStatus::Degraded)
    }

    fn select(&mut self) -> Option<&ServiceInstance> {
        let pool = self.healthy_pool();
        if pool.is_empty() {
            return None;
        }
        // The counter is reduced modulo the current pool size so it self-corrects
        // when instances are added, removed or change health.
        let slot = self.round_robin_counter % pool.len();
        self.round_robin_counter = (self.round_robin_counter + 1) % pool.len();
        self.instances.get(pool[slot])
    }
}

/// Request for an immediate, out-of-band probe of one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub service_name: String,
    pub instance_id: String,
}

/// Result of probing one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub status: InstanceStatus,
    pub version: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

impl ProbeOutcome {
    pub fn unreachable() -> Self {
        Self {
            status: InstanceStatus::Inactive,
            version: None,
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub upserted: usize,
    pub removed_instances: usize,
    pub removed_services: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceHealth {
    pub service_name: String,
    pub instance_id: String,
    pub base_url: String,
    pub status: InstanceStatus,
    pub version: String,
    /// Milliseconds since the Unix epoch.
    pub last_checked_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub total: usize,
    pub active: usize,
    pub degraded: usize,
    pub inactive: usize,
    pub instances: Vec<InstanceHealth>,
}

/// Registry of logical services and their instances.
#[derive(Default)]
pub struct InstanceRegistry {
    services: Mutex<HashMap<String, ServiceRegistration>>,
    probe_hooks: Mutex<Vec<mpsc::UnboundedSender<ProbeTarget>>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the guard cannot leave a registration half-written
    // (every mutation is a single assignment or push), so poisoned state is reused.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, ServiceRegistration>> {
        self.services.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Receive a `ProbeTarget` for every subsequent upsert.
    pub fn subscribe_probe_requests(&self) -> mpsc::UnboundedReceiver<ProbeTarget> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.probe_hooks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    fn request_probe(&self, target: ProbeTarget) {
        let mut hooks = self.probe_hooks.lock().unwrap_or_else(|e| e.into_inner());
        hooks.retain(|tx| tx.send(target.clone()).is_ok());
        if hooks.is_empty() {
            debug!(
                service = target.service_name.as_str(),
                instance_id = target.instance_id.as_str(),
                "no health prober attached, skipping out-of-band probe"
            );
        }
    }

    /// Insert a new instance or merge fields into the one with the same id.
    ///
    /// Schedules an immediate probe of the instance without waiting for it.
    pub fn upsert_instance(
        &self,
        service_name: &str,
        update: InstanceUpdate,
    ) -> Result<ServiceInstance> {
        let base_url = normalize_base_url(&update.base_url);
        if base_url.is_empty() {
            return Err(Error::configuration_with_context(
                "instance base URL must not be empty",
                ErrorContext::new()
                    .with_field_path("baseUrl")
                    .with_details(service_name.to_string())
                    .with_source("instance_registry"),
            ));
        }
        let instance_id = update.resolved_id();

        let instance = {
            let mut services = self.lock();
            let registration = services
                .entry(service_name.to_string())
                .or_insert_with(|| ServiceRegistration::new(service_name));

            match registration
                .instances
                .iter_mut()
                .find(|i| i.instance_id == instance_id)
            {
                Some(existing) => {
                    if existing.base_url != base_url {
                        info!(
                            service = service_name,
                            instance_id = instance_id.as_str(),
                            old_base_url = existing.base_url.as_str(),
                            new_base_url = base_url.as_str(),
                            "instance base URL updated"
                        );
                        existing.base_url = base_url;
                    }
                    if let Some(version) = update.version {
                        existing.version = version;
                    }
                    if let Some(status) = update.status.as_deref() {
                        existing.status = InstanceStatus::parse_lenient(status);
                    }
                    if let Some(metadata) = update.metadata {
                        existing.metadata.extend(metadata);
                    }
                    if let Some(path) = update.health_endpoint.as_deref() {
                        existing.health_endpoint = normalize_path(path);
                    }
                    existing.clone()
                }
                None => {
                    let instance = ServiceInstance {
                        instance_id: instance_id.clone(),
                        service_name: service_name.to_string(),
                        base_url,
                        version: update
                            .version
                            .unwrap_or_else(|| UNKNOWN_VERSION.to_string()),
                        status: update
                            .status
                            .as_deref()
                            .map(InstanceStatus::parse_lenient)
                            .unwrap_or(InstanceStatus::Active),
                        last_checked: None,
                        health_endpoint: update
                            .health_endpoint
                            .as_deref()
                            .map(normalize_path)
                            .unwrap_or_else(|| DEFAULT_HEALTH_ENDPOINT.to_string()),
                        metadata: update.metadata.unwrap_or_default(),
                    };
                    info!(
                        service = service_name,
                        instance_id = instance.instance_id.as_str(),
                        base_url = instance.base_url.as_str(),
                        "instance registered"
                    );
                    registration.instances.push(instance.clone());
                    instance
                }
            }
        };

        self.request_probe(ProbeTarget {
            service_name: service_name.to_string(),
            instance_id: instance.instance_id.clone(),
        });
        Ok(instance)
    }

    /// Delete an instance; the service entry goes away with its last instance.
    pub fn remove_instance(&self, service_name: &str, instance_id: &str) -> bool {
        let mut services = self.lock();
        let Some(registration) = services.get_mut(service_name) else {
            return false;
        };
        let before = registration.instances.len();
        registration.instances.retain(|i| i.instance_id != instance_id);
        let removed = registration.instances.len() != before;
        if removed {
            info!(service = service_name, instance_id, "instance removed");
        }
        if registration.instances.is_empty() {
            services.remove(service_name);
            info!(service = service_name, "service removed, no instances left");
        }
        removed
    }

    pub fn remove_service(&self, service_name: &str) -> bool {
        let removed = self.lock().remove(service_name).is_some();
        if removed {
            info!(service = service_name, "service removed");
        }
        removed
    }

    /// Pick the next healthy instance's base URL, round-robin.
    pub fn select_instance(&self, service_name: &str) -> Result<String> {
        let mut services = self.lock();
        let registration = services
            .get_mut(service_name)
            .ok_or_else(|| Error::unresolvable(service_name, "service is not registered"))?;
        registration
            .select()
            .map(|i| i.base_url.clone())
            .ok_or_else(|| Error::unresolvable(service_name, "no healthy instance"))
    }

    /// Reconcile against an authoritative snapshot.
    ///
    /// Listed instances are upserted, unlisted instances of listed services are
    /// removed, and services missing from the snapshot are removed entirely.
    pub fn refresh_from_source(&self, snapshot: Vec<ServiceSnapshot>) -> RefreshSummary {
        let mut summary = RefreshSummary::default();
        let snapshot = merge_by_service(snapshot);

        let listed: HashSet<&str> = snapshot.iter().map(|s| s.service_name.as_str()).collect();
        let stale_services: Vec<String> = self
            .lock()
            .keys()
            .filter(|name| !listed.contains(name.as_str()))
            .cloned()
            .collect();
        for name in stale_services {
            if self.remove_service(&name) {
                summary.removed_services += 1;
            }
        }

        for service in snapshot {
            let mut keep = HashSet::new();
            for update in service.instances {
                match self.upsert_instance(&service.service_name, update) {
                    Ok(instance) => {
                        keep.insert(instance.instance_id);
                        summary.upserted += 1;
                    }
                    Err(e) => warn!(
                        service = service.service_name.as_str(),
                        error = %e,
                        "skipping invalid instance in registry snapshot"
                    ),
                }
            }

            let stale: Vec<String> = self
                .instances(&service.service_name)
                .into_iter()
                .filter(|i| !keep.contains(&i.instance_id))
                .map(|i| i.instance_id)
                .collect();
            for instance_id in stale {
                if self.remove_instance(&service.service_name, &instance_id) {
                    summary.removed_instances += 1;
                }
            }
        }

        summary
    }

    /// Record a probe attempt. Returns `(previous, current)` status when the instance exists.
    pub fn apply_probe(
        &self,
        service_name: &str,
        instance_id: &str,
        outcome: ProbeOutcome,
    ) -> Option<(InstanceStatus, InstanceStatus)> {
        let mut services = self.lock();
        let instance = services
            .get_mut(service_name)?
            .instances
            .iter_mut()
            .find(|i| i.instance_id == instance_id)?;

        let previous = instance.status;
        instance.status = outcome.status;
        instance.last_checked = Some(SystemTime::now());
        if let Some(version) = outcome.version {
            instance.version = version;
        }
        if let Some(metadata) = outcome.metadata {
            instance.metadata = metadata;
        }
        Some((previous, instance.status))
    }

    pub fn instance(&self, service_name: &str, instance_id: &str) -> Option<ServiceInstance> {
        self.lock()
            .get(service_name)?
            .instances
            .iter()
            .find(|i| i.instance_id == instance_id)
            .cloned()
    }

    pub fn instances(&self, service_name: &str) -> Vec<ServiceInstance> {
        self.lock()
            .get(service_name)
            .map(|r| r.instances.clone())
            .unwrap_or_default()
    }

    pub fn all_instances(&self) -> Vec<ServiceInstance> {
        let services = self.lock();
        let mut names: Vec<&String> = services.keys().collect();
        names.sort();
        names
            .into_iter()
            .flat_map(|name| services[name].instances.iter().cloned())
            .collect()
    }

    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains_service(&self, service_name: &str) -> bool {
        self.lock().contains_key(service_name)
    }

    /// Whether any instance of the service is currently selectable.
    pub fn is_service_healthy(&self, service_name: &str) -> bool {
        self.lock()
            .get(service_name)
            .map(|r| r.instances.iter().any(ServiceInstance::is_selectable))
            .unwrap_or(false)
    }

    pub fn health_report(&self) -> HealthReport {
        let mut report = HealthReport::default();
        for instance in self.all_instances() {
            report.total += 1;
            match instance.status {
                InstanceStatus::Active => report.active += 1,
                InstanceStatus::Degraded => report.degraded += 1,
                InstanceStatus::Inactive => report.inactive += 1,
            }
            report.instances.push(InstanceHealth {
                last_checked_ms: instance
                    .last_checked
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_millis() as u64),
                service_name: instance.service_name,
                instance_id: instance.instance_id,
                base_url: instance.base_url,
                status: instance.status,
                version: instance.version,
            });
        }
        report
    }
}

/// Fold repeated entries for one service into the first, keeping listing order.
fn merge_by_service(snapshot: Vec<ServiceSnapshot>) -> Vec<ServiceSnapshot> {
    let mut merged: Vec<ServiceSnapshot> = Vec::with_capacity(snapshot.len());
    let mut position: HashMap<String, usize> = HashMap::new();
    for entry in snapshot {
        match position.get(&entry.service_name) {
            Some(&i) => merged[i].instances.extend(entry.instances),
            None => {
                position.insert(entry.service_name.clone(), merged.len());
                merged.push(entry);
            }
        }
    }
    merged
}

pub(crate) fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

pub(crate) fn normalize_path(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}
