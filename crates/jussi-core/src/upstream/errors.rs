//! Transport error classification for upstream drivers.

use thiserror::Error;

/// Errors raised by the HTTP driver and the WebSocket pool.
///
/// Retry eligibility is decided structurally via [`UpstreamError::is_transient`],
/// never by matching on message text.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UpstreamError {
    /// The deadline elapsed before any response started.
    #[error("request timed out")]
    RequestTimeout,

    /// The upstream started a response but did not complete it in time.
    #[error("response timed out")]
    ResponseTimeout,

    /// Connection refused/reset, DNS failure, TLS failure.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Non-2xx HTTP status from an upstream (status, truncated body).
    #[error("http status {0}")]
    HttpStatus(u16, String),

    /// Other network-level failure from the HTTP client.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The upstream body was not parseable JSON. Never retried.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// WebSocket-level failure (connect, send, or receive).
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// The WebSocket pool has been shut down.
    #[error("connection pool closed")]
    PoolClosed,

    /// The retry budget ran out; carries the final attempt's error.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<UpstreamError>,
    },
}

impl UpstreamError {
    /// Whether another attempt against the same upstream may succeed.
    ///
    /// Timeouts, connection failures, WebSocket transport failures, and HTTP
    /// 5xx responses are transient. Everything else (4xx bodies are returned
    /// verbatim upstream of this check, malformed JSON, closed pool) is not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RequestTimeout
            | Self::ResponseTimeout
            | Self::ConnectionFailed(_)
            | Self::WebSocket(_) => true,
            Self::HttpStatus(status, _) => (500..=599).contains(status),
            Self::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::InvalidResponse(_) | Self::PoolClosed | Self::RetriesExhausted { .. } => false,
        }
    }

    /// Whether this error is one of the timeout kinds.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout | Self::ResponseTimeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_and_connection_failures_are_transient() {
        assert!(UpstreamError::RequestTimeout.is_transient());
        assert!(UpstreamError::ResponseTimeout.is_transient());
        assert!(UpstreamError::ConnectionFailed("refused".into()).is_transient());
        assert!(UpstreamError::WebSocket("broken pipe".into()).is_transient());
    }

    #[test]
    fn only_5xx_statuses_are_transient() {
        assert!(UpstreamError::HttpStatus(500, String::new()).is_transient());
        assert!(UpstreamError::HttpStatus(503, String::new()).is_transient());
        assert!(!UpstreamError::HttpStatus(404, String::new()).is_transient());
        assert!(!UpstreamError::HttpStatus(429, String::new()).is_transient());
    }

    #[test]
    fn parse_failures_and_closed_pool_are_permanent() {
        assert!(!UpstreamError::InvalidResponse("trailing garbage".into()).is_transient());
        assert!(!UpstreamError::PoolClosed.is_transient());
        let exhausted = UpstreamError::RetriesExhausted {
            attempts: 3,
            last: Box::new(UpstreamError::RequestTimeout),
        };
        assert!(!exhausted.is_transient());
    }
}
