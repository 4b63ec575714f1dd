//! Canonical method identifiers (URNs).
//!
//! Every JSON-RPC call is normalized into a `(namespace, api, method, params)`
//! tuple before anything else happens to it. The string form of that tuple is
//! both the routing key (prefix-matched against the upstream tries) and the
//! cache key, so its rendering must be stable: equal requests must produce
//! byte-identical strings regardless of how the client ordered mapping keys.
//!
//! Key stability falls out of `serde_json`'s default object representation:
//! without the `preserve_order` feature, `Map` is a `BTreeMap` and object keys
//! always serialize in lexicographic order. Arrays keep their order; scalars
//! are untouched.

use serde_json::Value;
use std::fmt;

/// Numeric API table used by the legacy `call` form.
///
/// `["call", 0, ...]` addresses `database_api`, `["call", 1, ...]`
/// addresses `login_api`; both live in the `steemd` namespace.
pub const STEEMD_NUMERIC_API_MAPPING: &[&str] = &["database_api", "login_api"];

/// Failures turning a raw request into a canonical identifier.
///
/// All of these surface to the client as `-32600 Invalid Request`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrnError {
    #[error("method must be a string")]
    MethodNotString,
    #[error("invalid method format: {0}")]
    InvalidMethodFormat(String),
    #[error("call requires array params")]
    CallParamsNotArray,
    #[error("call params must carry an api selector and a method name")]
    CallParamsTooShort,
    #[error("call method name must be a string")]
    CallMethodNotString,
    #[error("call api selector must be a string or an integer")]
    CallSelectorType,
    #[error("invalid api index: {0}")]
    InvalidApiIndex(i64),
}

/// Canonical identifier of a JSON-RPC call.
///
/// The string form is dot-joined non-empty parts of
/// `(namespace, api, method)` with a `.params=<json>` suffix appended when
/// params are present:
///
/// ```text
/// steemd.database_api.get_block.params=[1000]
/// appbase.condenser_api.get_block.params=[1000]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Urn {
    pub namespace: String,
    pub api: Option<String>,
    pub method: String,
    /// Params as sent, minus an explicit `null` (treated as absent).
    pub params: Option<Value>,
}

impl Urn {
    /// Parses a raw JSON-RPC request object into a URN.
    ///
    /// Three method shapes are accepted:
    ///
    /// 1. `"<api>_api.<method>"`, the appbase shorthand, e.g.
    ///    `condenser_api.get_block` → `(appbase, condenser_api, get_block)`.
    /// 2. `"<ns>.<method>"` or `"<ns>.<api>.<method>"` with an explicit namespace;
    ///    `jsonrpc.<method>` is coerced to `(appbase, jsonrpc, <method>)`.
    /// 3. A bare token. `"call"` is the legacy dispatch form and unpacks its
    ///    params; any other bare method lands in `steemd.database_api`.
    ///
    /// # Errors
    ///
    /// Returns [`UrnError`] when the method is missing or not a string, when
    /// a `call` invocation is malformed, or when the numeric API selector is
    /// out of range.
    pub fn from_request(request: &Value) -> Result<Self, UrnError> {
        let method = request
            .get("method")
            .and_then(Value::as_str)
            .ok_or(UrnError::MethodNotString)?;
        let params = request.get("params").filter(|p| !p.is_null()).cloned();

        let parts: Vec<&str> = method.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(UrnError::InvalidMethodFormat(method.to_owned()));
        }

        match parts.as_slice() {
            // Appbase shorthand: "<api>_api.<method>".
            [api, bare] if api.ends_with("_api") => Ok(Self {
                namespace: "appbase".to_owned(),
                api: Some((*api).to_owned()),
                method: (*bare).to_owned(),
                params,
            }),
            ["jsonrpc", bare] => Ok(Self {
                namespace: "appbase".to_owned(),
                api: Some("jsonrpc".to_owned()),
                method: (*bare).to_owned(),
                params,
            }),
            [namespace, bare] => Ok(Self {
                namespace: (*namespace).to_owned(),
                api: None,
                method: (*bare).to_owned(),
                params,
            }),
            ["jsonrpc", _, bare] => Ok(Self {
                namespace: "appbase".to_owned(),
                api: Some("jsonrpc".to_owned()),
                method: (*bare).to_owned(),
                params,
            }),
            [namespace, api, bare] => Ok(Self {
                namespace: (*namespace).to_owned(),
                api: Some((*api).to_owned()),
                method: (*bare).to_owned(),
                params,
            }),
            ["call"] => Self::from_call(params),
            [bare] => Ok(Self {
                namespace: "steemd".to_owned(),
                api: Some("database_api".to_owned()),
                method: (*bare).to_owned(),
                params,
            }),
            _ => Err(UrnError::InvalidMethodFormat(method.to_owned())),
        }
    }

    /// Unpacks the legacy `"call"` dispatch form.
    ///
    /// Params must be an array `[api_selector, method, inner_params?]`. An
    /// integer selector indexes [`STEEMD_NUMERIC_API_MAPPING`]; a string
    /// selector picks `appbase` when it names `condenser_api` or `jsonrpc`,
    /// or when the inner params are a mapping, and `steemd` otherwise.
    fn from_call(params: Option<Value>) -> Result<Self, UrnError> {
        let list = match params {
            Some(Value::Array(list)) => list,
            _ => return Err(UrnError::CallParamsNotArray),
        };
        if list.len() < 2 {
            return Err(UrnError::CallParamsTooShort);
        }

        let method = list[1]
            .as_str()
            .ok_or(UrnError::CallMethodNotString)?
            .to_owned();
        let inner = list.get(2).filter(|p| !p.is_null()).cloned();

        match &list[0] {
            Value::Number(n) => {
                let index = n.as_i64().ok_or(UrnError::CallSelectorType)?;
                let api = usize::try_from(index)
                    .ok()
                    .and_then(|i| STEEMD_NUMERIC_API_MAPPING.get(i))
                    .ok_or(UrnError::InvalidApiIndex(index))?;
                Ok(Self {
                    namespace: "steemd".to_owned(),
                    api: Some((*api).to_owned()),
                    method,
                    params: inner,
                })
            }
            Value::String(api) => {
                let namespace = if api == "condenser_api"
                    || api == "jsonrpc"
                    || inner.as_ref().is_some_and(Value::is_object)
                {
                    "appbase"
                } else {
                    "steemd"
                };
                Ok(Self {
                    namespace: namespace.to_owned(),
                    api: Some(api.clone()),
                    method,
                    params: inner,
                })
            }
            _ => Err(UrnError::CallSelectorType),
        }
    }

    /// The routing-and-cache key for this call.
    #[must_use]
    pub fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.namespace)?;
        if let Some(api) = &self.api {
            write!(f, ".{api}")?;
        }
        write!(f, ".{}", self.method)?;
        if let Some(params) = &self.params {
            let rendered = serde_json::to_string(params).map_err(|_| fmt::Error)?;
            write!(f, ".params={rendered}")?;
        }
        Ok(())
    }
}
