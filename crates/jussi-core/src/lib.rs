//! # jussi-core
//!
//! Core library for jussi, a caching JSON-RPC 2.0 reverse proxy in front of
//! a set of blockchain node upstreams.
//!
//! ## Request Flow
//!
//! ```text
//! Client POST /
//!       │
//!       ▼
//! ┌─────────────┐
//! │  Validation │ ─── malformed ──► error envelope
//! └──────┬──────┘
//!        ▼
//! ┌─────────────┐     ┌──────────────┐
//! │ Canonicalize│ ──► │    Router    │ ─── no namespace ──► error envelope
//! │   (URN)     │     │ prefix tries │
//! └─────────────┘     └──────┬───────┘
//!                            ▼
//!                     ┌─────────────┐
//!                     │ Cache read  │ ─── hit ──► id rewrite ──► response
//!                     └──────┬──────┘
//!                            ▼ miss
//!                  ┌───────────────────┐
//!                  │ HTTP / WS driver  │ (retry, pooling, deadlines)
//!                  └─────────┬─────────┘
//!                            ▼
//!                  ┌───────────────────┐
//!                  │ TTL engine write  │ (irreversibility-aware)
//!                  └─────────┬─────────┘
//!                            ▼
//!                  id rewrite + error enrichment ──► response
//! ```
//!
//! Batches fan out concurrently over the same pipeline and re-gather in
//! positional order.
//!
//! ## Modules
//!
//! - [`urn`]: canonical method identifiers and cache-key rendering
//! - [`upstream`]: prefix-trie router, HTTP driver, WebSocket pool
//! - [`cache`]: two-tier cache with the irreversibility-aware TTL engine
//! - [`proxy`]: the request processor and the error shaper
//! - [`validators`]: JSON-RPC shape checks and broadcast limits
//! - [`config`]: layered configuration and the upstreams document

pub mod cache;
pub mod config;
pub mod proxy;
pub mod types;
pub mod upstream;
pub mod urn;
pub mod validators;
