//! HTTP upstream driver.
//!
//! One shared [`reqwest::Client`] with an idle-connection cache serves every
//! HTTP upstream. Requests carry the W3C trace context plus the caller's
//! correlation headers, run under a per-call deadline resolved by the router,
//! and are retried on transient failures according to the configured
//! [`RetryPolicy`].

use std::time::Duration;

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE},
    Client, ClientBuilder,
};
use serde_json::Value;
use tracing::{trace, warn};

use crate::{
    types::TraceContext,
    upstream::{errors::UpstreamError, retry::RetryPolicy},
};

/// Connection-pool and timeout settings for the shared HTTP client.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Idle connections kept per upstream host.
    pub pool_max_idle_per_host: usize,
    /// How long an idle connection stays in the pool.
    pub pool_idle_timeout: Duration,
    pub connect_timeout: Duration,
    /// Deadline applied when the router resolves a timeout of zero.
    pub default_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            pool_max_idle_per_host: 100,
            pool_idle_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            default_timeout: Duration::from_secs(30),
        }
    }
}

/// JSON-RPC HTTP driver with connection reuse and bounded retry.
pub struct HttpClient {
    client: Client,
    retry: RetryPolicy,
    default_timeout: Duration,
}

impl HttpClient {
    /// Creates a driver with default pool settings and retry policy.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying client fails to build.
    pub fn new() -> Result<Self, UpstreamError> {
        Self::with_config(HttpClientConfig::default(), RetryPolicy::default())
    }

    /// Creates a driver with explicit pool settings and retry policy.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying client fails to build.
    pub fn with_config(config: HttpClientConfig, retry: RetryPolicy) -> Result<Self, UpstreamError> {
        let client = ClientBuilder::new()
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout)
            .connect_timeout(config.connect_timeout)
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("jussi/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UpstreamError::ConnectionFailed(format!("client build failed: {e}")))?;

        Ok(Self { client, retry, default_timeout: config.default_timeout })
    }

    /// POSTs a JSON payload and returns the parsed JSON response.
    ///
    /// The outbound trace context is injected first, then `headers`, so a
    /// caller-supplied header wins on conflict. A `timeout` of zero selects
    /// the driver default. Transient failures (timeouts, connection errors,
    /// HTTP 5xx) are retried up to the policy bound; any other non-2xx status
    /// has its body parsed and returned verbatim, since upstreams signal
    /// JSON-RPC errors inside successful transports.
    ///
    /// # Errors
    ///
    /// [`UpstreamError::RequestTimeout`] / [`UpstreamError::ResponseTimeout`]
    /// on deadline expiry, [`UpstreamError::RetriesExhausted`] after the last
    /// transient failure, [`UpstreamError::InvalidResponse`] when the body is
    /// not JSON.
    pub async fn post_json(
        &self,
        url: &str,
        payload: &Value,
        trace: &TraceContext,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<Value, UpstreamError> {
        let timeout = if timeout.is_zero() { self.default_timeout } else { timeout };
        let header_map = self.build_headers(trace, headers);

        self.retry
            .retry(|| self.attempt(url, payload, header_map.clone(), timeout))
            .await
    }

    fn build_headers(&self, trace: &TraceContext, headers: &[(String, String)]) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(headers.len() + 2);
        map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(value) = HeaderValue::from_str(&trace.to_traceparent()) {
            map.insert(HeaderName::from_static("traceparent"), value);
        }
        for (name, value) in headers {
            match (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
                (Ok(name), Ok(value)) => {
                    map.insert(name, value);
                }
                _ => warn!(header = name.as_str(), "dropping unencodable upstream header"),
            }
        }
        map
    }

    async fn attempt(
        &self,
        url: &str,
        payload: &Value,
        headers: HeaderMap,
        timeout: Duration,
    ) -> Result<Value, UpstreamError> {
        let response = self
            .client
            .post(url)
            .headers(headers)
            .json(payload)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::HttpStatus(status.as_u16(), truncate(&body, 256)));
        }

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::ResponseTimeout
            } else {
                UpstreamError::Network(e)
            }
        })?;

        trace!(url, status = status.as_u16(), bytes = body.len(), "upstream response");

        serde_json::from_slice(&body)
            .map_err(|e| UpstreamError::InvalidResponse(format!("body is not JSON: {e}")))
    }
}

fn classify_send_error(e: reqwest::Error) -> UpstreamError {
    if e.is_timeout() {
        UpstreamError::RequestTimeout
    } else if e.is_connect() {
        // Covers refused/reset connections, DNS failures, TLS failures.
        UpstreamError::ConnectionFailed(sanitize(&e))
    } else {
        UpstreamError::Network(e)
    }
}

/// Reduces a client error to a category string so upstream addresses and
/// credentials never leak into client-visible error data.
fn sanitize(e: &reqwest::Error) -> String {
    if e.is_connect() {
        "connection refused or unreachable".to_owned()
    } else if e.is_timeout() {
        "connection timed out".to_owned()
    } else {
        "network error".to_owned()
    }
}

fn truncate(body: &str, limit: usize) -> String {
    if body.len() > limit {
        let mut end = limit;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &body[..end])
    } else {
        body.to_owned()
    }
}
