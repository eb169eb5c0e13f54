use crate::transport::TransportError;
use thiserror::Error;

/// Structured error context for configuration and runtime failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Configuration key or field that caused the error (e.g., "runner.static_urls[0]")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., the rejected value)
    pub details: Option<String>,
    /// Component that raised the error (e.g., "config", "health_prober")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Unified error type for the resilience layer.
///
/// The first six variants form the taxonomy route handlers map to response codes;
/// the remaining ones are ambient failures (bad configuration, I/O, serialization).
#[derive(Debug, Error)]
pub enum Error {
    #[error("Service {service} is unresolvable: {reason}")]
    Unresolvable { service: String, reason: String },

    #[error("Circuit open for service {service}")]
    CircuitOpen {
        service: String,
        retry_after_ms: Option<u64>,
    },

    #[error("Not found ({service}): {message}")]
    NotFound { service: String, message: String },

    #[error("Client error from {service}: HTTP {status}: {message}")]
    ClientError {
        service: String,
        status: u16,
        message: String,
    },

    #[error("Transient failure calling {service} after {attempts} attempt(s): {message}")]
    Transient {
        service: String,
        status: Option<u16>,
        message: String,
        attempts: u32,
    },

    #[error("{service} service error: {message}")]
    Service {
        service: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("Network transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn unresolvable(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Unresolvable {
            service: service.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Whether another attempt against the same service could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient { .. } | Error::Transport(_))
    }

    /// Downstream HTTP status carried by the error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::NotFound { .. } => Some(404),
            Error::ClientError { status, .. } => Some(*status),
            Error::Transient { status, .. } | Error::Service { status, .. } => *status,
            _ => None,
        }
    }

    /// Logical service the error originated from, if any.
    pub fn service(&self) -> Option<&str> {
        match self {
            Error::Unresolvable { service, .. }
            | Error::CircuitOpen { service, .. }
            | Error::NotFound { service, .. }
            | Error::ClientError { service, .. }
            | Error::Transient { service, .. }
            | Error::Service { service, .. } => Some(service),
            _ => None,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }
}
