//! Failure classification for downstream responses.

use crate::Error;
use serde_json::Value;

/// How a non-2xx downstream status is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureClass {
    /// 404: the resource does not exist. Never retried.
    NotFound,
    /// Any other 4xx: the request itself is wrong. Never retried.
    Client,
    /// 5xx and anything else unexpected. Retried.
    Transient,
}

impl FailureClass {
    pub(crate) fn is_retryable(self) -> bool {
        self == FailureClass::Transient
    }
}

/// One failed attempt: a non-2xx response or a transport failure (`status: None`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AttemptFailure {
    pub(crate) class: FailureClass,
    pub(crate) status: Option<u16>,
    pub(crate) message: String,
}

impl AttemptFailure {
    pub(crate) fn from_response(status: u16, body: &Value) -> Self {
        Self {
            class: classify_status(status),
            status: Some(status),
            message: extract_message(body, status),
        }
    }

    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Transient,
            status: None,
            message: message.into(),
        }
    }

    pub(crate) fn into_error(self, service: &str, attempts: u32) -> Error {
        let service = service.to_string();
        match (self.class, self.status) {
            (FailureClass::NotFound, _) => Error::NotFound {
                service,
                message: self.message,
            },
            (FailureClass::Client, Some(status)) => Error::ClientError {
                service,
                status,
                message: self.message,
            },
            _ => Error::Transient {
                service,
                status: self.status,
                message: self.message,
                attempts,
            },
        }
    }
}

pub(crate) fn classify_status(status: u16) -> FailureClass {
    match status {
        404 => FailureClass::NotFound,
        400..=499 => FailureClass::Client,
        _ => FailureClass::Transient,
    }
}

/// Best-effort human-readable message from a downstream error body.
///
/// Looks at `message`, then `error` (a string or an object with `message`),
/// then the raw text body.
pub(crate) fn extract_message(body: &Value, status: u16) -> String {
    let from_field = |v: &Value| -> Option<String> {
        v.as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    if let Some(msg) = body.get("message").and_then(from_field) {
        return msg;
    }
    if let Some(error) = body.get("error") {
        if let Some(msg) = from_field(error) {
            return msg;
        }
        if let Some(msg) = error.get("message").and_then(from_field) {
            return msg;
        }
    }
    if let Some(text) = from_field(body) {
        return text;
    }
    format!("request failed with HTTP {}", status)
}
