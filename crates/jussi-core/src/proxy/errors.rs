//! Error shaping: one taxonomy, one envelope.
//!
//! Every failure in the pipeline is mapped onto [`ProxyError`] and rendered
//! as a JSON-RPC error envelope with the caller's id. The shaper always
//! merges the jussi request id and the active trace id into `error.data`, so
//! a client-reported error can be correlated with server-side logs.

use serde_json::{json, Map, Value};

use crate::{
    types::{RequestContext, JSONRPC_VERSION},
    upstream::{errors::UpstreamError, router::RouterError},
    urn::UrnError,
    validators::{LimitError, ValidationError},
};

/// JSON-RPC and jussi-specific error codes.
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    pub const REQUEST_TIMEOUT: i32 = 1000;
    pub const RESPONSE_TIMEOUT: i32 = 1050;
    pub const UPSTREAM_RESPONSE_ERROR: i32 = 1100;
    pub const INVALID_NAMESPACE: i32 = 1200;
    pub const INVALID_UPSTREAM_HOST: i32 = 1400;
    pub const INVALID_UPSTREAM_URL: i32 = 1500;
    pub const BATCH_SIZE_ERROR: i32 = 1600;
    pub const LIMITS_ERROR: i32 = 1700;
    pub const ACCOUNT_HISTORY_LIMIT: i32 = 1701;
    pub const CUSTOM_JSON_OP_LENGTH: i32 = 1800;
}

/// The full error taxonomy of the request pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("method not found: {0}")]
    MethodNotFound(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("request timeout")]
    RequestTimeout,
    #[error("response timeout")]
    ResponseTimeout,
    #[error("upstream response error: {0}")]
    Upstream(String),
    #[error("invalid namespace: {0}")]
    InvalidNamespace(String),
    #[error("invalid upstream host: {0}")]
    InvalidUpstreamHost(String),
    #[error("invalid upstream url: {0}")]
    InvalidUpstreamUrl(String),
    #[error("batch size {size} exceeds limit {limit}")]
    BatchSize { size: usize, limit: usize },
    #[error("limits exceeded: {0}")]
    Limits(String),
    #[error("account history limit {requested} exceeds maximum {max}")]
    AccountHistoryLimit { requested: usize, max: usize },
    #[error("custom_json operation length {length} exceeds limit {max_length}")]
    CustomJsonLength { length: usize, max_length: usize },
}

impl ProxyError {
    /// The wire error code for this kind.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Parse(_) => codes::PARSE_ERROR,
            Self::InvalidRequest(_) => codes::INVALID_REQUEST,
            Self::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            Self::InvalidParams(_) => codes::INVALID_PARAMS,
            Self::Internal(_) => codes::INTERNAL_ERROR,
            Self::RequestTimeout => codes::REQUEST_TIMEOUT,
            Self::ResponseTimeout => codes::RESPONSE_TIMEOUT,
            Self::Upstream(_) => codes::UPSTREAM_RESPONSE_ERROR,
            Self::InvalidNamespace(_) => codes::INVALID_NAMESPACE,
            Self::InvalidUpstreamHost(_) => codes::INVALID_UPSTREAM_HOST,
            Self::InvalidUpstreamUrl(_) => codes::INVALID_UPSTREAM_URL,
            Self::BatchSize { .. } => codes::BATCH_SIZE_ERROR,
            Self::Limits(_) => codes::LIMITS_ERROR,
            Self::AccountHistoryLimit { .. } => codes::ACCOUNT_HISTORY_LIMIT,
            Self::CustomJsonLength { .. } => codes::CUSTOM_JSON_OP_LENGTH,
        }
    }

    /// The fixed, category-level wire message for this kind.
    ///
    /// Kind-specific detail goes into `error.data`, never into the message.
    #[must_use]
    pub fn message(&self) -> &'static str {
        match self {
            Self::Parse(_) => "Parse error",
            Self::InvalidRequest(_) => "Invalid Request",
            Self::MethodNotFound(_) => "Method not found",
            Self::InvalidParams(_) => "Invalid params",
            Self::Internal(_) => "Internal error",
            Self::RequestTimeout => "Request timeout",
            Self::ResponseTimeout => "Response timeout",
            Self::Upstream(_) => "Upstream response error",
            Self::InvalidNamespace(_) => "Invalid namespace",
            Self::InvalidUpstreamHost(_) => "Invalid upstream host",
            Self::InvalidUpstreamUrl(_) => "Invalid upstream URL",
            Self::BatchSize { .. } => "Batch size exceeded",
            Self::Limits(_) => "Request limit exceeded",
            Self::AccountHistoryLimit { .. } => "Account history limit exceeded",
            Self::CustomJsonLength { .. } => "Custom JSON op length exceeded",
        }
    }

    /// Kind-specific `error.data` fields, before correlation enrichment.
    fn details(&self) -> Map<String, Value> {
        let mut data = Map::new();
        match self {
            Self::Parse(details)
            | Self::InvalidRequest(details)
            | Self::InvalidParams(details)
            | Self::Internal(details)
            | Self::Upstream(details)
            | Self::Limits(details) => {
                data.insert("details".to_owned(), json!(details));
            }
            Self::MethodNotFound(method) => {
                data.insert("method".to_owned(), json!(method));
            }
            Self::InvalidNamespace(namespace) => {
                data.insert("namespace".to_owned(), json!(namespace));
            }
            Self::InvalidUpstreamHost(host) => {
                data.insert("host".to_owned(), json!(host));
            }
            Self::InvalidUpstreamUrl(url) => {
                data.insert("url".to_owned(), json!(url));
            }
            Self::BatchSize { size, limit } => {
                data.insert("size".to_owned(), json!(size));
                data.insert("limit".to_owned(), json!(limit));
            }
            Self::AccountHistoryLimit { requested, max } => {
                data.insert("requested_limit".to_owned(), json!(requested));
                data.insert("max_limit".to_owned(), json!(max));
            }
            Self::CustomJsonLength { length, max_length } => {
                data.insert("length".to_owned(), json!(length));
                data.insert("max_length".to_owned(), json!(max_length));
            }
            Self::RequestTimeout | Self::ResponseTimeout => {}
        }
        data
    }

    /// Renders the full JSON-RPC error envelope for this error.
    #[must_use]
    pub fn to_response(&self, id: &Value, ctx: &RequestContext) -> Value {
        let mut data = self.details();
        data.insert("jussi_request_id".to_owned(), json!(&*ctx.jussi_request_id));
        data.insert("trace_id".to_owned(), json!(ctx.trace.trace_id));

        json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id,
            "error": {
                "code": self.code(),
                "message": self.message(),
                "data": Value::Object(data),
            },
        })
    }
}

impl From<UrnError> for ProxyError {
    fn from(err: UrnError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

impl From<ValidationError> for ProxyError {
    fn from(err: ValidationError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

impl From<LimitError> for ProxyError {
    fn from(err: LimitError) -> Self {
        match err {
            LimitError::BatchSize { size, limit } => Self::BatchSize { size, limit },
            LimitError::CustomJsonLength { length, max_length } => {
                Self::CustomJsonLength { length, max_length }
            }
            LimitError::BlacklistedAccount(_) => Self::Limits(err.to_string()),
        }
    }
}

impl From<RouterError> for ProxyError {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::NoUpstream(namespace) => Self::InvalidNamespace(namespace),
            RouterError::InvalidUrl { url, .. } => Self::InvalidUpstreamUrl(url),
            RouterError::InvalidConfig(details) => Self::Internal(details),
        }
    }
}

impl From<UpstreamError> for ProxyError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::RequestTimeout => Self::RequestTimeout,
            UpstreamError::ResponseTimeout => Self::ResponseTimeout,
            UpstreamError::RetriesExhausted { ref last, .. } if last.is_timeout() => {
                match **last {
                    UpstreamError::ResponseTimeout => Self::ResponseTimeout,
                    _ => Self::RequestTimeout,
                }
            }
            other => Self::Upstream(other.to_string()),
        }
    }
}

/// Merges correlation ids into the `data` of an upstream error envelope.
///
/// Upstream semantic errors are returned to the client verbatim; this adds
/// `jussi_request_id` and `trace_id` so they can be traced. Pre-existing
/// non-object `data` is preserved under a `details` key.
pub fn enrich_error_data(response: &mut Value, ctx: &RequestContext) {
    let Some(error) = response.get_mut("error").and_then(Value::as_object_mut) else {
        return;
    };

    let data = error.entry("data".to_owned()).or_insert_with(|| Value::Object(Map::new()));
    if !data.is_object() {
        let original = data.take();
        let mut wrapped = Map::new();
        wrapped.insert("details".to_owned(), original);
        *data = Value::Object(wrapped);
    }
    if let Some(map) = data.as_object_mut() {
        map.insert("jussi_request_id".to_owned(), json!(&*ctx.jussi_request_id));
        map.insert("trace_id".to_owned(), json!(ctx.trace.trace_id));
    }
}
