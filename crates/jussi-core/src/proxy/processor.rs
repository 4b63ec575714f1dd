//! Per-request orchestration.
//!
//! The processor owns the full pipeline for one JSON-RPC call: validate →
//! canonicalize → route → cache read → dispatch (HTTP or WS) → TTL-governed
//! cache write → id rewrite → error-data enrichment. Batches fan the same
//! pipeline out concurrently and re-gather by original position; a failing
//! member never disturbs its siblings.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use futures_util::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    cache::{
        ttl::{is_cacheable, write_policy, CacheWrite},
        BlockTracker, CacheGroup,
    },
    types::{JussiRequest, RequestContext},
    upstream::{
        errors::UpstreamError,
        http_client::HttpClient,
        retry::RetryPolicy,
        router::{ResolvedUpstream, Router},
        ws_pool::{WsPool, WsPoolConfig},
    },
    validators::{
        check_batch_size, check_broadcast_limits, is_get_block_request,
        is_valid_get_block_response, is_valid_non_error_response, validate_single, Limits,
        ValidationError,
    },
};

use super::errors::{enrich_error_data, ProxyError};

/// Tunables for the processor.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub batch_size_limit: usize,
    pub limits: Limits,
    /// Retry schedule for WebSocket dispatch (HTTP retries live in the
    /// driver).
    pub ws_retry: RetryPolicy,
    pub ws_pool: WsPoolConfig,
    /// Deadline used when the router resolves a timeout of zero.
    pub default_timeout: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size_limit: 50,
            limits: Limits::default(),
            ws_retry: RetryPolicy::default(),
            ws_pool: WsPoolConfig::default(),
            default_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of processing one call.
pub struct SingleOutcome {
    pub response: Value,
    /// The cache key, when this response was served from cache.
    pub cache_hit: Option<String>,
}

/// Result of processing one HTTP body (single call or batch).
pub struct ProcessOutcome {
    pub body: Value,
    /// Set only for non-batched cache hits; reported via
    /// `x-jussi-cache-hit`.
    pub cache_hit: Option<String>,
}

/// The request pipeline.
///
/// Shared immutable state (router, tries, tracker) is held by `Arc`; the
/// processor itself is cheap to share across the server's connection tasks.
pub struct RequestProcessor {
    router: Arc<Router>,
    cache: Arc<CacheGroup>,
    http: Arc<HttpClient>,
    tracker: Arc<BlockTracker>,
    ws_pools: DashMap<String, Arc<WsPool>>,
    config: ProcessorConfig,
}

impl RequestProcessor {
    #[must_use]
    pub fn new(
        router: Arc<Router>,
        cache: Arc<CacheGroup>,
        http: Arc<HttpClient>,
        tracker: Arc<BlockTracker>,
        config: ProcessorConfig,
    ) -> Self {
        Self { router, cache, http, tracker, ws_pools: DashMap::new(), config }
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<BlockTracker> {
        &self.tracker
    }

    /// Processes a parsed HTTP body: a single request object or a batch.
    ///
    /// Never fails; every error is shaped into a JSON-RPC error envelope at
    /// the position it occurred.
    pub async fn process(&self, ctx: &RequestContext, body: &Value) -> ProcessOutcome {
        match body {
            Value::Object(_) => {
                let outcome = self.process_single(ctx, body, 0).await;
                ProcessOutcome { body: outcome.response, cache_hit: outcome.cache_hit }
            }
            Value::Array(members) => {
                if members.is_empty() {
                    let err = ProxyError::from(ValidationError::EmptyBatch);
                    return ProcessOutcome {
                        body: err.to_response(&Value::Null, ctx),
                        cache_hit: None,
                    };
                }
                if let Err(limit) = check_batch_size(members.len(), self.config.batch_size_limit) {
                    let err = ProxyError::from(limit);
                    return ProcessOutcome {
                        body: err.to_response(&Value::Null, ctx),
                        cache_hit: None,
                    };
                }

                let outcomes = join_all(
                    members
                        .iter()
                        .enumerate()
                        .map(|(index, raw)| self.process_single(ctx, raw, index)),
                )
                .await;

                ProcessOutcome {
                    body: Value::Array(outcomes.into_iter().map(|o| o.response).collect()),
                    cache_hit: None,
                }
            }
            _ => {
                let err = ProxyError::from(ValidationError::InvalidType);
                ProcessOutcome { body: err.to_response(&Value::Null, ctx), cache_hit: None }
            }
        }
    }

    /// Runs the full pipeline for one call.
    pub async fn process_single(
        &self,
        ctx: &RequestContext,
        raw: &Value,
        batch_index: usize,
    ) -> SingleOutcome {
        let caller_id = raw.get("id").cloned().unwrap_or(Value::Null);

        if let Err(e) = validate_single(raw) {
            return self.error_outcome(ProxyError::from(e), caller_id, ctx);
        }
        let request = match JussiRequest::from_raw(raw, batch_index) {
            Ok(request) => request,
            Err(e) => return self.error_outcome(ProxyError::from(e), caller_id, ctx),
        };
        if let Err(e) = check_broadcast_limits(&request.urn, &self.config.limits) {
            return self.error_outcome(ProxyError::from(e), caller_id, ctx);
        }

        let upstream = match self.router.resolve(&request.urn) {
            Ok(upstream) => upstream,
            Err(e) => return self.error_outcome(ProxyError::from(e), caller_id, ctx),
        };

        let cacheable = is_cacheable(upstream.ttl);
        let cache_key = request.urn.cache_key();

        if cacheable {
            if let Some(mut cached) = self.cache.get(&cache_key).await {
                debug!(key = %cache_key, "cache hit");
                set_response_id(&mut cached, request.response_id());
                return SingleOutcome { response: cached, cache_hit: Some(cache_key) };
            }
        }

        let mut response = match self.dispatch(ctx, &request, &upstream).await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    key = %cache_key,
                    url = %upstream.url,
                    error = %e,
                    "upstream dispatch failed"
                );
                return self.error_outcome(ProxyError::from(e), caller_id, ctx);
            }
        };

        self.tracker.observe_response(&response);

        if cacheable {
            self.write_through(&cache_key, &request, &upstream, &response).await;
        }

        set_response_id(&mut response, request.response_id());
        enrich_error_data(&mut response, ctx);

        SingleOutcome { response, cache_hit: None }
    }

    /// Sends the rewritten payload to the resolved upstream.
    async fn dispatch(
        &self,
        ctx: &RequestContext,
        request: &JussiRequest,
        upstream: &ResolvedUpstream,
    ) -> Result<Value, UpstreamError> {
        let payload = request.upstream_payload();

        if upstream.url.starts_with("ws://") || upstream.url.starts_with("wss://") {
            let deadline = if upstream.timeout.is_zero() {
                self.config.default_timeout
            } else {
                upstream.timeout
            };
            match tokio::time::timeout(deadline, self.call_websocket(&upstream.url, &payload))
                .await
            {
                Ok(result) => result,
                Err(_elapsed) => Err(UpstreamError::RequestTimeout),
            }
        } else {
            self.http
                .post_json(
                    &upstream.url,
                    &payload,
                    &ctx.trace,
                    &ctx.upstream_headers(),
                    upstream.timeout,
                )
                .await
        }
    }

    /// One WS request/response over a pooled session, with retry.
    ///
    /// The overall deadline is enforced by the caller; each attempt acquires
    /// a session, sends, receives, and releases. Failed sessions go back
    /// broken and are evicted by the pool.
    async fn call_websocket(&self, url: &str, payload: &Value) -> Result<Value, UpstreamError> {
        let pool = self.ws_pool_for(url).await;
        let acquire_deadline = self.config.default_timeout;

        self.config
            .ws_retry
            .retry(|| {
                let pool = Arc::clone(&pool);
                let payload = payload.clone();
                async move {
                    let mut session = pool.acquire(acquire_deadline).await?;
                    let outcome = match session.send(&payload).await {
                        Ok(()) => session.recv().await,
                        Err(e) => Err(e),
                    };
                    pool.release(session).await;
                    outcome
                }
            })
            .await
    }

    /// Returns the pool for `url`, creating it on first use.
    async fn ws_pool_for(&self, url: &str) -> Arc<WsPool> {
        if let Some(pool) = self.ws_pools.get(url) {
            return Arc::clone(&pool);
        }
        let pool = Arc::new(WsPool::connect(url, self.config.ws_pool.clone()).await);
        // A concurrent creator may have won the race; keep whichever landed.
        Arc::clone(&self.ws_pools.entry(url.to_owned()).or_insert(pool))
    }

    /// Applies the TTL write policy and writes through both cache tiers.
    ///
    /// Only well-formed non-error responses are eligible, and `get_block`
    /// responses must match the requested block number. The three outcomes
    /// (written, skipped by policy, skipped as not-irreversible) are logged
    /// distinctly.
    async fn write_through(
        &self,
        key: &str,
        request: &JussiRequest,
        upstream: &ResolvedUpstream,
        response: &Value,
    ) {
        if !is_valid_non_error_response(response) {
            debug!(key, "cache write skipped (error or malformed response)");
            return;
        }
        if is_get_block_request(&request.urn)
            && !is_valid_get_block_response(&request.urn, response)
        {
            debug!(key, "cache write skipped (get_block response mismatch)");
            return;
        }

        match write_policy(upstream.ttl, response, &self.tracker) {
            CacheWrite::Store(expiry) => match self.cache.set(key, response, expiry).await {
                Ok(()) => debug!(key, expiry = ?expiry, "cache write"),
                Err(e) => warn!(key, error = %e, "cache write failed"),
            },
            CacheWrite::SkipNoCache => debug!(key, "cache write skipped (no-cache ttl)"),
            CacheWrite::SkipNotIrreversible => {
                debug!(key, "cache write skipped (block not irreversible)");
            }
        }
    }

    fn error_outcome(&self, err: ProxyError, id: Value, ctx: &RequestContext) -> SingleOutcome {
        SingleOutcome { response: err.to_response(&id, ctx), cache_hit: None }
    }

    /// Closes every WS pool and both cache tiers.
    ///
    /// Shutdown errors are logged and ignored.
    pub async fn shutdown(&self) {
        let pools: Vec<Arc<WsPool>> =
            self.ws_pools.iter().map(|entry| Arc::clone(entry.value())).collect();
        for pool in pools {
            pool.close().await;
        }
        if let Err(e) = self.cache.close().await {
            warn!(error = %e, "cache close failed during shutdown");
        }
    }
}

/// Overwrites the envelope's `id` with the caller's id.
fn set_response_id(response: &mut Value, id: Value) {
    if let Some(object) = response.as_object_mut() {
        object.insert("id".to_owned(), id);
    }
}
