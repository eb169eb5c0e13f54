//! Gateway configuration: per-service resilience settings and the optional central registry.
//!
//! Values come from built-in per-service defaults, then either environment
//! variables ([`GatewayConfig::from_env`]) or a YAML document
//! ([`GatewayConfig::from_yaml_str`]). Durations in YAML are written in milliseconds.

use crate::health::HealthCheckConfig;
use crate::resilience::{CircuitBreakerConfig, RetryPolicy};
use crate::{Error, ErrorContext, Result};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const SEGMENTATION: &str = "segmentation";
pub const RUNNER: &str = "runner";
pub const ARCHIVE: &str = "archive";

/// Resilience settings for one logical downstream service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub name: String,
    /// Fallback base URLs used when the registry yields nothing.
    pub static_urls: Vec<String>,
    /// Per-call timeout.
    pub timeout: Duration,
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub health_check_interval: Duration,
    pub health_endpoint: String,
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            static_urls: Vec::new(),
            timeout: Duration::from_secs(10),
            retry_count: 3,
            retry_delay: Duration::from_secs(1),
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(30),
            health_endpoint: "/health".to_string(),
        }
    }

    pub fn segmentation() -> Self {
        Self {
            static_urls: vec!["http://segmentation-service:3001".to_string()],
            ..Self::new(SEGMENTATION)
        }
    }

    pub fn runner() -> Self {
        Self {
            static_urls: vec!["http://runner-service:3002".to_string()],
            timeout: Duration::from_secs(15),
            retry_count: 2,
            retry_delay: Duration::from_secs(2),
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(60),
            ..Self::new(RUNNER)
        }
    }

    pub fn archive() -> Self {
        Self {
            static_urls: vec!["http://archive-service:3003".to_string()],
            timeout: Duration::from_secs(8),
            failure_threshold: 4,
            reset_timeout: Duration::from_secs(45),
            ..Self::new(ARCHIVE)
        }
    }

    pub fn with_static_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.static_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry_count: u32, retry_delay: Duration) -> Self {
        self.retry_count = retry_count;
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_breaker(mut self, failure_threshold: u32, reset_timeout: Duration) -> Self {
        self.failure_threshold = failure_threshold;
        self.reset_timeout = reset_timeout;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_count, self.retry_delay)
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new()
            .with_failure_threshold(self.failure_threshold)
            .with_reset_timeout(self.reset_timeout)
    }

    pub fn health_check_config(&self, probe_timeout: Duration) -> HealthCheckConfig {
        HealthCheckConfig::default()
            .with_interval(self.health_check_interval)
            .with_timeout(probe_timeout)
            .with_scope(self.name.clone())
    }

    fn apply(&mut self, overrides: ServiceOverrides) {
        if let Some(urls) = overrides.static_urls {
            self.static_urls = urls;
        }
        if let Some(ms) = overrides.timeout_ms {
            self.timeout = Duration::from_millis(ms);
        }
        if let Some(n) = overrides.retry_count {
            self.retry_count = n;
        }
        if let Some(ms) = overrides.retry_delay_ms {
            self.retry_delay = Duration::from_millis(ms);
        }
        if let Some(n) = overrides.failure_threshold {
            self.failure_threshold = n;
        }
        if let Some(ms) = overrides.reset_timeout_ms {
            self.reset_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = overrides.health_check_interval_ms {
            self.health_check_interval = Duration::from_millis(ms);
        }
        if let Some(path) = overrides.health_endpoint {
            self.health_endpoint = path;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(invalid("name", self.name.clone(), "service name must not be empty"));
        }
        for (i, raw) in self.static_urls.iter().enumerate() {
            let field = format!("{}.static_urls[{}]", self.name, i);
            let parsed = url::Url::parse(raw).map_err(|e| {
                invalid(&field, format!("{} ({})", raw, e), "static URL is not a valid URL")
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(invalid(&field, raw.clone(), "static URL must use http or https"));
            }
        }
        if self.failure_threshold == 0 {
            return Err(invalid(
                &format!("{}.failure_threshold", self.name),
                "0",
                "failure threshold must be at least 1",
            ));
        }
        for (field, value) in [
            ("timeout", self.timeout),
            ("reset_timeout", self.reset_timeout),
            ("health_check_interval", self.health_check_interval),
        ] {
            if value.is_zero() {
                return Err(invalid(
                    &format!("{}.{}", self.name, field),
                    "0",
                    "duration must be greater than zero",
                ));
            }
        }
        if !self.health_endpoint.starts_with('/') {
            return Err(invalid(
                &format!("{}.health_endpoint", self.name),
                self.health_endpoint.clone(),
                "health endpoint must start with '/'",
            ));
        }
        Ok(())
    }
}

/// Optional central service registry.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryConfig {
    pub enabled: bool,
    pub url: Option<String>,
    pub refresh_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            refresh_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub segmentation: ServiceConfig,
    pub runner: ServiceConfig,
    pub archive: ServiceConfig,
    pub registry: RegistryConfig,
    /// Per-probe bound shared by all health probers.
    pub health_check_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            segmentation: ServiceConfig::segmentation(),
            runner: ServiceConfig::runner(),
            archive: ServiceConfig::archive(),
            registry: RegistryConfig::default(),
            health_check_timeout: Duration::from_secs(5),
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from defaults plus whatever `lookup` returns for the known variable names.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config
            .segmentation
            .apply(ServiceOverrides::from_lookup(&lookup, "SEGMENTATION_SERVICE"));
        config
            .runner
            .apply(ServiceOverrides::from_lookup(&lookup, "RUNNER_SERVICE"));
        config
            .archive
            .apply(ServiceOverrides::from_lookup(&lookup, "ARCHIVE_SERVICE"));

        if let Some(enabled) = lookup("USE_SERVICE_REGISTRY") {
            config.registry.enabled = parse_bool(&enabled);
        }
        if let Some(url) = lookup("SERVICE_REGISTRY_URL").filter(|s| !s.trim().is_empty()) {
            config.registry.url = Some(url.trim().to_string());
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "SERVICE_REGISTRY_REFRESH_INTERVAL_MS") {
            config.registry.refresh_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "HEALTH_CHECK_TIMEOUT_MS") {
            config.health_check_timeout = Duration::from_millis(ms);
        }
        config
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: GatewayFile = serde_yaml::from_str(yaml).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid gateway configuration: {}", e),
                ErrorContext::new().with_source("config"),
            )
        })?;

        let mut config = Self::default();
        if let Some(o) = file.segmentation {
            config.segmentation.apply(o);
        }
        if let Some(o) = file.runner {
            config.runner.apply(o);
        }
        if let Some(o) = file.archive {
            config.archive.apply(o);
        }
        if let Some(r) = file.registry {
            if let Some(enabled) = r.enabled {
                config.registry.enabled = enabled;
            }
            if r.url.is_some() {
                config.registry.url = r.url;
            }
            if let Some(ms) = r.refresh_interval_ms {
                config.registry.refresh_interval = Duration::from_millis(ms);
            }
        }
        if let Some(ms) = file.health_check_timeout_ms {
            config.health_check_timeout = Duration::from_millis(ms);
        }
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    pub fn services(&self) -> [&ServiceConfig; 3] {
        [&self.segmentation, &self.runner, &self.archive]
    }

    /// Probing for services only the central registry knows about, at the default interval.
    pub fn unconfigured_health_check_config(&self) -> HealthCheckConfig {
        HealthCheckConfig::default()
            .with_timeout(self.health_check_timeout)
            .except(self.services().map(|s| s.name.clone()))
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for service in self.services() {
            service.validate()?;
            if !seen.insert(service.name.as_str()) {
                return Err(invalid(
                    &format!("{}.name", service.name),
                    service.name.clone(),
                    "service names must be distinct",
                ));
            }
        }
        if self.health_check_timeout.is_zero() {
            return Err(invalid(
                "health_check_timeout",
                "0",
                "duration must be greater than zero",
            ));
        }
        if self.registry.enabled {
            let raw = self.registry.url.as_deref().ok_or_else(|| {
                invalid(
                    "registry.url",
                    "<unset>",
                    "registry URL is required when the service registry is enabled",
                )
            })?;
            url::Url::parse(raw)
                .map_err(|e| invalid("registry.url", format!("{} ({})", raw, e), "invalid registry URL"))?;
            if self.registry.refresh_interval.is_zero() {
                return Err(invalid(
                    "registry.refresh_interval",
                    "0",
                    "duration must be greater than zero",
                ));
            }
        }
        Ok(())
    }
}

fn invalid(field: &str, details: impl Into<String>, message: &str) -> Error {
    Error::configuration_with_context(
        message,
        ErrorContext::new()
            .with_field_path(field)
            .with_details(details)
            .with_source("config"),
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServiceOverrides {
    static_urls: Option<Vec<String>>,
    timeout_ms: Option<u64>,
    retry_count: Option<u32>,
    retry_delay_ms: Option<u64>,
    failure_threshold: Option<u32>,
    reset_timeout_ms: Option<u64>,
    health_check_interval_ms: Option<u64>,
    health_endpoint: Option<String>,
}

impl ServiceOverrides {
    fn from_lookup<F>(lookup: &F, prefix: &str) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            static_urls: lookup(&format!("{}_URL", prefix))
                .map(|raw| split_urls(&raw))
                .filter(|urls| !urls.is_empty()),
            timeout_ms: parse_var(lookup, &format!("{}_TIMEOUT_MS", prefix)),
            retry_count: parse_var(lookup, &format!("{}_RETRY_COUNT", prefix)),
            retry_delay_ms: parse_var(lookup, &format!("{}_RETRY_DELAY_MS", prefix)),
            failure_threshold: parse_var(lookup, &format!("{}_FAILURE_THRESHOLD", prefix)),
            reset_timeout_ms: parse_var(lookup, &format!("{}_RESET_TIMEOUT_MS", prefix)),
            health_check_interval_ms: parse_var(
                lookup,
                &format!("{}_HEALTH_CHECK_INTERVAL_MS", prefix),
            ),
            health_endpoint: lookup(&format!("{}_HEALTH_ENDPOINT", prefix))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistryOverrides {
    enabled: Option<bool>,
    url: Option<String>,
    refresh_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct GatewayFile {
    segmentation: Option<ServiceOverrides>,
    runner: Option<ServiceOverrides>,
    archive: Option<ServiceOverrides>,
    registry: Option<RegistryOverrides>,
    health_check_timeout_ms: Option<u64>,
}

fn split_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.trim_end_matches('/').to_string())
        .collect()
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = raw.as_str(), "ignoring unparsable configuration value");
            None
        }
    }
}
