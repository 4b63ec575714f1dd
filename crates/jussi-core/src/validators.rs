//! JSON-RPC 2.0 shape validation, request limits, and response validation.
//!
//! Shape checks run on every inbound call before canonicalization. Limit
//! checks guard the broadcast path (`custom_json` size and account
//! blacklist). Response validation gates cache writes: only well-formed,
//! non-error responses that are consistent with their request may be cached.

use ahash::AHashSet;
use serde_json::Value;

use crate::{cache::block::block_num_from_id, urn::Urn};

/// Default UTF-8 byte ceiling for a single `custom_json` operation.
pub const DEFAULT_CUSTOM_JSON_SIZE_LIMIT: usize = 8192;

/// Top-level keys a request object may carry.
const REQUEST_KEYS: &[&str] = &["jsonrpc", "method", "params", "id"];

/// Methods subject to broadcast limit checks.
const BROADCAST_METHODS: &[&str] = &["broadcast_transaction", "broadcast_transaction_synchronous"];

/// Envelope shape violations; all surface as `-32600 Invalid Request`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("request must be an object or a non-empty array")]
    InvalidType,
    #[error("batch request cannot be empty")]
    EmptyBatch,
    #[error("jsonrpc must be \"2.0\"")]
    InvalidVersion,
    #[error("method must be a non-empty string")]
    InvalidMethod,
    #[error("id must be a string, number, or null")]
    InvalidId,
    #[error("params must be an array, object, or null")]
    InvalidParams,
    #[error("unexpected key: {0}")]
    UnexpectedKey(String),
}

/// Post-validation limit violations; these carry dedicated error codes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimitError {
    #[error("batch size {size} exceeds limit {limit}")]
    BatchSize { size: usize, limit: usize },
    #[error("custom_json operation length {length} exceeds limit {max_length}")]
    CustomJsonLength { length: usize, max_length: usize },
    #[error("account {0} is blacklisted")]
    BlacklistedAccount(String),
}

/// Limits applied to broadcast transactions.
#[derive(Debug, Clone)]
pub struct Limits {
    pub custom_json_size_limit: usize,
    pub accounts_blacklist: AHashSet<String>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            custom_json_size_limit: DEFAULT_CUSTOM_JSON_SIZE_LIMIT,
            accounts_blacklist: AHashSet::new(),
        }
    }
}

/// Validates one request object against the JSON-RPC 2.0 envelope rules.
///
/// # Errors
///
/// Returns the first violated rule: required `jsonrpc == "2.0"`, non-empty
/// string `method`, `id` of string/number/null, `params` of
/// array/object/null, and no unknown top-level keys.
pub fn validate_single(request: &Value) -> Result<(), ValidationError> {
    let object = request.as_object().ok_or(ValidationError::InvalidType)?;

    if object.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(ValidationError::InvalidVersion);
    }
    match object.get("method").and_then(Value::as_str) {
        Some(method) if !method.is_empty() => {}
        _ => return Err(ValidationError::InvalidMethod),
    }
    if let Some(id) = object.get("id") {
        if !(id.is_string() || id.is_number() || id.is_null()) {
            return Err(ValidationError::InvalidId);
        }
    }
    if let Some(params) = object.get("params") {
        if !(params.is_array() || params.is_object() || params.is_null()) {
            return Err(ValidationError::InvalidParams);
        }
    }
    for key in object.keys() {
        if !REQUEST_KEYS.contains(&key.as_str()) {
            return Err(ValidationError::UnexpectedKey(key.clone()));
        }
    }
    Ok(())
}

/// Validates the top-level request body: a single object or a non-empty
/// array. Batch members are validated individually by the processor so one
/// malformed member does not reject its siblings.
///
/// # Errors
///
/// [`ValidationError::EmptyBatch`] for `[]`, [`ValidationError::InvalidType`]
/// for scalars, and single-object violations for objects.
pub fn validate_body(body: &Value) -> Result<(), ValidationError> {
    match body {
        Value::Object(_) => validate_single(body),
        Value::Array(members) if members.is_empty() => Err(ValidationError::EmptyBatch),
        Value::Array(_) => Ok(()),
        _ => Err(ValidationError::InvalidType),
    }
}

/// Enforces the batch-size ceiling.
///
/// # Errors
///
/// [`LimitError::BatchSize`] when `size > limit`.
pub fn check_batch_size(size: usize, limit: usize) -> Result<(), LimitError> {
    if size > limit {
        Err(LimitError::BatchSize { size, limit })
    } else {
        Ok(())
    }
}

/// Whether this URN names a broadcast-transaction method.
#[must_use]
pub fn is_broadcast_transaction(urn: &Urn) -> bool {
    BROADCAST_METHODS.contains(&urn.method.as_str())
}

/// Enforces `custom_json` limits on broadcast transactions.
///
/// Walks every `custom_json` operation in the transaction: the `json` field
/// must fit `custom_json_size_limit` UTF-8 bytes, and no
/// `required_posting_auths` entry may be blacklisted. Non-broadcast methods
/// pass untouched.
///
/// # Errors
///
/// [`LimitError::CustomJsonLength`] or [`LimitError::BlacklistedAccount`] on
/// the first violating operation.
pub fn check_broadcast_limits(urn: &Urn, limits: &Limits) -> Result<(), LimitError> {
    if !is_broadcast_transaction(urn) {
        return Ok(());
    }

    for op in broadcast_operations(urn) {
        let Some((op_type, op_data)) = split_operation(op) else { continue };
        if op_type != "custom_json" {
            continue;
        }

        if let Some(json_field) = op_data.get("json").and_then(Value::as_str) {
            let length = json_field.len();
            if length > limits.custom_json_size_limit {
                return Err(LimitError::CustomJsonLength {
                    length,
                    max_length: limits.custom_json_size_limit,
                });
            }
        }

        if let Some(auths) = op_data.get("required_posting_auths").and_then(Value::as_array) {
            for auth in auths {
                if let Some(account) = auth.as_str() {
                    if limits.accounts_blacklist.contains(account) {
                        return Err(LimitError::BlacklistedAccount(account.to_owned()));
                    }
                }
            }
        }
    }

    Ok(())
}

/// Pulls the operation list out of a broadcast transaction's params.
///
/// Accepts both the positional form `[{.. operations: [..]}]` and the named
/// form `{trx: {operations: [..]}}`.
fn broadcast_operations(urn: &Urn) -> impl Iterator<Item = &Value> {
    let operations = match &urn.params {
        Some(Value::Array(list)) => list
            .first()
            .and_then(|trx| trx.get("operations"))
            .and_then(Value::as_array),
        Some(Value::Object(map)) => map
            .get("trx")
            .and_then(|trx| trx.get("operations"))
            .and_then(Value::as_array),
        _ => None,
    };
    operations.map(|ops| ops.iter()).into_iter().flatten()
}

/// Splits a `[op_type, op_data]` operation pair.
fn split_operation(op: &Value) -> Option<(&str, &Value)> {
    let list = op.as_array()?;
    if list.len() < 2 {
        return None;
    }
    Some((list[0].as_str()?, &list[1]))
}

/// Whether `response` is a structurally valid JSON-RPC 2.0 response:
/// `jsonrpc == "2.0"` (when present) and exactly one of `result` / `error`.
#[must_use]
pub fn is_valid_jsonrpc_response(response: &Value) -> bool {
    let Some(object) = response.as_object() else { return false };
    if let Some(version) = object.get("jsonrpc") {
        if version.as_str() != Some("2.0") {
            return false;
        }
    }
    object.contains_key("result") != object.contains_key("error")
}

/// Whether `response` is valid and carries a result rather than an error.
#[must_use]
pub fn is_valid_non_error_response(response: &Value) -> bool {
    is_valid_jsonrpc_response(response) && response.get("result").is_some()
}

/// Whether this URN names a `get_block` call whose responses must be
/// cross-checked before caching.
#[must_use]
pub fn is_get_block_request(urn: &Urn) -> bool {
    (urn.namespace == "steemd" || urn.namespace == "appbase") && urn.method == "get_block"
}

/// Consistency check for `get_block` responses.
///
/// The block number decoded from the response's `block_id` (or the nested
/// `block.block_id`) must equal the block number the request asked for,
/// positionally (`[n]`) or by name (`{"block_num": n}`). Anything that fails
/// to line up is cache-ineligible.
#[must_use]
pub fn is_valid_get_block_response(urn: &Urn, response: &Value) -> bool {
    if !is_valid_non_error_response(response) {
        return false;
    }
    let Some(result) = response.get("result") else { return false };

    let block_id = result
        .get("block_id")
        .and_then(Value::as_str)
        .or_else(|| result.get("block").and_then(|b| b.get("block_id")).and_then(Value::as_str));
    let Some(block_id) = block_id else { return false };
    let Some(response_block_num) = block_num_from_id(block_id) else { return false };

    let requested = match &urn.params {
        Some(Value::Array(list)) => list.first(),
        Some(Value::Object(map)) => map.get("block_num"),
        _ => None,
    };
    let requested_block_num = match requested {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    };

    requested_block_num == Some(response_block_num)
}
