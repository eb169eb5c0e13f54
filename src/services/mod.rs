//! Typed facades over the downstream services.
//!
//! Route handlers talk only to these facades. Each one owns a [`ResilientClient`]
//! and maps failures into the gateway's error taxonomy:
//! 404 becomes [`Error::NotFound`], circuit-open and unresolvable pass through,
//! everything else becomes [`Error::Service`] carrying the downstream message.

pub mod archive;
pub mod runner;
pub mod segmentation;

pub use archive::ArchiveService;
pub use runner::RunnerService;
pub use segmentation::SegmentationService;

use crate::client::core::join_url;
use crate::client::{ResilientClient, ServiceRequest, REQUEST_ID_HEADER};
use crate::transport::HttpCall;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, warn};

/// Caller identity forwarded to downstream services.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallContext {
    pub request_id: Option<String>,
    pub user_id: Option<String>,
    pub authorization: Option<String>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_user_id(mut self, id: impl Into<String>) -> Self {
        self.user_id = Some(id.into());
        self
    }

    pub fn with_authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }

    pub fn apply(&self, mut request: ServiceRequest) -> ServiceRequest {
        if let Some(id) = &self.request_id {
            request = request.header(REQUEST_ID_HEADER, id.clone());
        }
        if let Some(user) = &self.user_id {
            request = request.header("x-user-id", user.clone());
        }
        if let Some(auth) = &self.authorization {
            request = request.header("authorization", auth.clone());
        }
        request
    }
}

#[async_trait]
pub trait ServiceFacade: Send + Sync {
    fn service_name(&self) -> &str;

    fn client(&self) -> &ResilientClient;

    /// Call the service and return the response body, with facade error mapping.
    async fn invoke(&self, request: ServiceRequest, ctx: &CallContext) -> Result<Value> {
        let (method, path) = (request.method.clone(), request.path.clone());
        self.client()
            .invoke(ctx.apply(request))
            .await
            .map(|response| response.body)
            .map_err(|e| {
                let mapped = map_facade_error(self.service_name(), e);
                if !matches!(mapped, Error::NotFound { .. }) {
                    error!(
                        service = self.service_name(),
                        method = %method,
                        path = path.as_str(),
                        error = %mapped,
                        "downstream call failed"
                    );
                }
                mapped
            })
    }

    /// Whether the service is usable right now.
    ///
    /// Uses the registry view when the service is registered there, otherwise
    /// asks the service's configured health endpoint (healthy when `status` is absent or `"ok"`).
    async fn health_check(&self) -> bool {
        let client = self.client();
        if let Some(registry) = client.registry() {
            if registry.contains_service(self.service_name()) {
                return registry.is_service_healthy(self.service_name());
            }
        }

        let base_url = match client.resolve_base_url() {
            Ok(url) => url,
            Err(e) => {
                warn!(service = self.service_name(), error = %e, "health check could not resolve service");
                return false;
            }
        };
        let url = join_url(&base_url, client.health_endpoint());
        match client
            .transport()
            .execute(HttpCall::get(&url, client.timeout()))
            .await
        {
            Ok(response) if response.is_success() => matches!(
                response.body.get("status").and_then(Value::as_str),
                None | Some("ok")
            ),
            Ok(response) => {
                warn!(service = self.service_name(), status = response.status, "health check failed");
                false
            }
            Err(e) => {
                warn!(service = self.service_name(), error = %e, "health check failed");
                false
            }
        }
    }
}

/// Normalize a client error for route handlers.
pub fn map_facade_error(service: &str, err: Error) -> Error {
    match err {
        e @ (Error::NotFound { .. } | Error::CircuitOpen { .. } | Error::Unresolvable { .. }) => e,
        Error::ClientError {
            status, message, ..
        } => Error::Service {
            service: service.to_string(),
            status: Some(status),
            message,
        },
        Error::Transient {
            status, message, ..
        } => Error::Service {
            service: service.to_string(),
            status,
            message,
        },
        Error::Service { .. } => err,
        other => Error::Service {
            service: service.to_string(),
            status: other.status_code(),
            message: other.to_string(),
        },
    }
}

/// Rewrite a downstream 404 with a resource-specific message.
pub(crate) fn describe_not_found(err: Error, what: &str, id: &str) -> Error {
    match err {
        Error::NotFound { service, .. } => Error::NotFound {
            service,
            message: format!("{} not found: {}", what, id),
        },
        other => other,
    }
}

/// Percent-encode one path segment.
pub(crate) fn path_segment(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
