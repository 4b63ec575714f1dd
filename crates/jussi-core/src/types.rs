//! Core type definitions for the JSON-RPC request pipeline.
//!
//! # Type Categories
//!
//! ## Protocol Types
//! - [`JussiRequest`]: a single parsed JSON-RPC call, carrying its canonical
//!   identifier and batch position
//! - [`JsonRpcError`]: the JSON-RPC 2.0 error object
//!
//! ## Correlation Types
//! - [`RequestContext`]: per-HTTP-request correlation state (jussi request id,
//!   trace context, optional upstream trace passthrough)
//! - [`TraceContext`]: W3C trace-context pair used for outbound propagation
//!
//! Responses from upstreams are deliberately kept as raw [`serde_json::Value`]
//! objects: the proxy returns upstream envelopes verbatim apart from the `id`
//! rewrite and error-data enrichment, so a typed response would only lose
//! information.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{borrow::Cow, sync::Arc};

use crate::urn::{Urn, UrnError};

/// JSON-RPC protocol version constant to avoid repeated allocations.
pub const JSONRPC_VERSION: &str = "2.0";

/// Pre-allocated `Cow` for the JSON-RPC version.
pub const JSONRPC_VERSION_COW: Cow<'static, str> = Cow::Borrowed(JSONRPC_VERSION);

/// Offset added to the batch index to form the upstream-side request id.
///
/// Keeps upstream ids disjoint from anything a client is likely to send, so
/// responses multiplexed over pooled connections cannot be confused with
/// client-visible ids.
pub const UPSTREAM_ID_OFFSET: i64 = 1_000_000;

/// JSON-RPC 2.0 error object.
///
/// Standard codes follow the JSON-RPC 2.0 convention (`-32700` parse error,
/// `-32600` invalid request, ...); jussi-specific codes live in the `1000`+
/// range. See [`crate::proxy::ProxyError`] for the full taxonomy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A single parsed JSON-RPC call.
///
/// Built from an already shape-validated request object (see
/// [`crate::validators::validate_single`]); carries the canonical identifier
/// used for routing and cache keys, and the position of the call within its
/// batch (`0` for non-batched requests).
#[derive(Debug, Clone)]
pub struct JussiRequest {
    /// The caller's `id`, exactly as sent. `None` when the key was absent;
    /// `Some(Value::Null)` when it was an explicit `null`.
    pub id: Option<Value>,
    pub method: String,
    pub params: Option<Value>,
    pub urn: Urn,
    pub batch_index: usize,
}

impl JussiRequest {
    /// Parses a raw request object into a `JussiRequest`.
    ///
    /// # Errors
    ///
    /// Returns [`UrnError`] when the method cannot be canonicalized (missing
    /// or non-string method, malformed `call` invocation, unknown numeric
    /// API selector).
    pub fn from_raw(raw: &Value, batch_index: usize) -> Result<Self, UrnError> {
        let urn = Urn::from_request(raw)?;
        let method = raw
            .get("method")
            .and_then(Value::as_str)
            .ok_or(UrnError::MethodNotString)?
            .to_owned();
        let params = raw.get("params").filter(|p| !p.is_null()).cloned();
        let id = raw.get("id").cloned();

        Ok(Self { id, method, params, urn, batch_index })
    }

    /// The id used on the upstream wire for this call.
    #[must_use]
    pub fn upstream_id(&self) -> i64 {
        self.batch_index as i64 + UPSTREAM_ID_OFFSET
    }

    /// The caller's id as it must appear in the response envelope.
    ///
    /// Absent ids are rendered as `null`, matching what upstreams do for
    /// requests without an id.
    #[must_use]
    pub fn response_id(&self) -> Value {
        self.id.clone().unwrap_or(Value::Null)
    }

    /// Rewrites the request into its upstream wire form.
    ///
    /// The method and params are forwarded verbatim; `params` is omitted
    /// entirely when the inbound call had none, and the id is replaced by
    /// [`Self::upstream_id`].
    #[must_use]
    pub fn upstream_payload(&self) -> Value {
        let mut payload = serde_json::json!({
            "jsonrpc": JSONRPC_VERSION,
            "method": self.method,
            "id": self.upstream_id(),
        });
        if let Some(params) = &self.params {
            payload["params"] = params.clone();
        }
        payload
    }
}

/// W3C trace-context pair propagated to HTTP upstreams.
///
/// Rendered as a `traceparent` header (`00-<trace-id>-<span-id>-01`). A fresh
/// context is generated at ingress unless the client supplied a parsable
/// `traceparent` of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    /// 32 lowercase hex digits.
    pub trace_id: String,
    /// 16 lowercase hex digits.
    pub span_id: String,
}

impl TraceContext {
    /// Generates a fresh random trace context.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().simple().to_string(),
            span_id: format!("{:016x}", rand::random::<u64>()),
        }
    }

    /// Parses an inbound `traceparent` header value.
    ///
    /// Only version-00 headers are accepted. The parent span id is replaced
    /// by a fresh one so the upstream call appears as a child span.
    #[must_use]
    pub fn from_traceparent(header: &str) -> Option<Self> {
        let mut parts = header.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let _parent_span = parts.next()?;
        let _flags = parts.next()?;

        if version != "00" || trace_id.len() != 32 {
            return None;
        }
        if !trace_id.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        // The W3C format forbids an all-zero trace id.
        if trace_id.bytes().all(|b| b == b'0') {
            return None;
        }

        Some(Self {
            trace_id: trace_id.to_ascii_lowercase(),
            span_id: format!("{:016x}", rand::random::<u64>()),
        })
    }

    /// Renders the outbound `traceparent` header value.
    #[must_use]
    pub fn to_traceparent(&self) -> String {
        format!("00-{}-{}-01", self.trace_id, self.span_id)
    }
}

/// Per-HTTP-request correlation state.
///
/// One context is built per inbound HTTP request and shared (by reference)
/// across every member of a batch. The jussi request id is echoed on the
/// response, attached to outbound upstream calls, and merged into the `data`
/// of every shaped error.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Client-supplied `x-jussi-request-id`, or a generated UUID v4 string.
    pub jussi_request_id: Arc<str>,
    /// Client-supplied `x-amzn-trace-id`, forwarded to HTTP upstreams as-is.
    pub amzn_trace_id: Option<String>,
    pub trace: TraceContext,
}

impl RequestContext {
    /// Builds a context from the optional inbound correlation headers.
    #[must_use]
    pub fn new(
        jussi_request_id: Option<&str>,
        amzn_trace_id: Option<&str>,
        traceparent: Option<&str>,
    ) -> Self {
        let jussi_request_id: Arc<str> = match jussi_request_id {
            Some(id) if !id.is_empty() => Arc::from(id),
            _ => Arc::from(uuid::Uuid::new_v4().to_string().as_str()),
        };
        let trace = traceparent
            .and_then(TraceContext::from_traceparent)
            .unwrap_or_else(TraceContext::generate);

        Self {
            jussi_request_id,
            amzn_trace_id: amzn_trace_id.map(str::to_owned),
            trace,
        }
    }

    /// Headers attached to every outbound upstream call for this request.
    #[must_use]
    pub fn upstream_headers(&self) -> Vec<(String, String)> {
        let mut headers =
            vec![("x-jussi-request-id".to_owned(), self.jussi_request_id.to_string())];
        if let Some(trace_id) = &self.amzn_trace_id {
            headers.push(("x-amzn-trace-id".to_owned(), trace_id.clone()));
        }
        headers
    }
}
