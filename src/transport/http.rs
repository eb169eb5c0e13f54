use reqwest::Method;
use serde_json::Value;
use std::env;
use std::time::Duration;

/// A single outbound HTTP call, fully resolved (absolute URL, explicit timeout).
#[derive(Debug, Clone)]
pub struct HttpCall<'a> {
    pub method: Method,
    pub url: &'a str,
    pub body: Option<&'a Value>,
    pub headers: &'a [(String, String)],
    pub query: &'a [(String, String)],
    pub timeout: Duration,
}

impl<'a> HttpCall<'a> {
    pub fn get(url: &'a str, timeout: Duration) -> Self {
        Self {
            method: Method::GET,
            url,
            body: None,
            headers: &[],
            query: &[],
            timeout,
        }
    }
}

/// Response of a call that reached the server, whatever its status.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Parsed JSON body; `Null` when empty, a JSON string when the body is not JSON.
    pub body: Value,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Pooled reqwest client shared by invocations, probes and registry refreshes.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        // Pool defaults are env-overridable; timeouts are always set per call.
        let builder = reqwest::Client::builder()
            .pool_max_idle_per_host(
                env::var("GATEWAY_HTTP_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(32),
            )
            .pool_idle_timeout(Some(Duration::from_secs(
                env::var("GATEWAY_HTTP_POOL_IDLE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(90),
            )));

        let client = builder
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;

        Ok(Self { client })
    }

    pub async fn execute(&self, call: HttpCall<'_>) -> Result<HttpResponse, TransportError> {
        let mut request = self
            .client
            .request(call.method.clone(), call.url)
            .timeout(call.timeout);

        if let Some(body) = call.body {
            request = request.json(body);
        }

        for (k, v) in call.headers {
            request = request.header(k.as_str(), v.as_str());
        }

        if !call.query.is_empty() {
            request = request.query(call.query);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(e, call.url, call.timeout))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(e, call.url, call.timeout))?;

        Ok(HttpResponse {
            status,
            body: parse_body(&text),
        })
    }
}

fn parse_body(text: &str) -> Value {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    fn from_reqwest(e: reqwest::Error, url: &str, timeout: Duration) -> Self {
        if e.is_timeout() {
            TransportError::Timeout {
                url: url.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }
        } else {
            TransportError::Http(e)
        }
    }
}
