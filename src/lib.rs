//! # gateway-resilience
//!
//! Resilient service invocation for an API gateway fronting independent backend
//! services (segmentation, runner, archive).
//!
//! ## Overview
//!
//! The gateway calls its downstream services without knowing up front how many
//! instances exist or which of them are healthy, and without letting a failing
//! service drag the gateway down with it. Three shared pieces make that work:
//!
//! - an [`InstanceRegistry`] with round-robin selection over healthy instances,
//!   kept current by a background [`HealthProber`] and, optionally, a
//!   [`RegistryRefresher`] against a central registry
//! - one [`CircuitBreaker`] per logical service
//! - one [`ResilientClient`] per logical service, composing the two with
//!   per-service timeouts and fixed-delay retries
//!
//! Route handlers only see the typed facades in [`services`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gateway_resilience::{CallContext, Gateway, GatewayConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> gateway_resilience::Result<()> {
//!     let gateway = Gateway::start(GatewayConfig::from_env())?;
//!
//!     let ctx = CallContext::new().with_user_id("u-42");
//!     let task = gateway.runner().run_task("alt-1", json!({}), &ctx).await?;
//!     println!("{task}");
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`registry`] | Instance registry, registry sources and refresher |
//! | [`health`] | Background health probing |
//! | [`resilience`] | Circuit breaker and retry policy |
//! | [`client`] | Resilient HTTP client |
//! | [`services`] | Typed facades for segmentation, runner and archive |
//! | [`config`] | Per-service configuration from env or YAML |
//! | [`telemetry`] | Transition observers |
//! | [`gateway`] | Assembly and lifecycle of all of the above |

pub mod client;
pub mod config;
pub mod gateway;
pub mod health;
pub mod registry;
pub mod resilience;
pub mod services;
pub mod telemetry;
pub mod transport;

// Re-export main types for convenience
pub use client::{ResilientClient, ResilientClientBuilder, ServiceRequest, ServiceResponse};
pub use config::{GatewayConfig, RegistryConfig, ServiceConfig};
pub use gateway::{Gateway, GatewayStatus};
pub use health::{HealthCheckConfig, HealthProber, ProbeScope};
pub use registry::{
    InstanceRegistry, InstanceStatus, InstanceUpdate, RegistryRefresher, RegistrySource,
    ServiceInstance, ServiceSnapshot,
};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryPolicy};
pub use services::{ArchiveService, CallContext, RunnerService, SegmentationService, ServiceFacade};
pub use telemetry::{ResilienceObserver, TracingObserver};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
