//! TTL codes and the cache-write policy.
//!
//! Configuration carries one signed integer per routing prefix:
//!
//! | code | meaning |
//! |------|---------|
//! | `-2` | cache forever iff the response block is irreversible, else skip |
//! | `-1` | never cache |
//! | `0`  | cache forever |
//! | `k > 0` | cache for `k` seconds |

use serde_json::Value;
use std::time::Duration;

use super::block::BlockTracker;

pub const TTL_NO_EXPIRE: i64 = 0;
pub const TTL_NO_CACHE: i64 = -1;
pub const TTL_EXPIRE_IF_IRREVERSIBLE: i64 = -2;

/// Whether a method with this TTL code participates in caching at all.
///
/// Only `-1` opts out entirely; `-2` still reads from cache and decides
/// writes per-response.
#[must_use]
pub fn is_cacheable(ttl: i64) -> bool {
    ttl != TTL_NO_CACHE
}

/// Outcome of the write-policy decision for one response.
///
/// The three skip/store cases are deliberately distinct so they can be logged
/// apart: a skipped write under `-2` is normal operation, not a bug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheWrite {
    /// Store with this expiry; `None` means no expiry.
    Store(Option<Duration>),
    /// The method is configured `-1`.
    SkipNoCache,
    /// The method is configured `-2` and the response block is not yet
    /// irreversible (or its block number could not be determined).
    SkipNotIrreversible,
}

/// Decides whether and how long to cache `response`, given the configured
/// TTL code and the current irreversibility watermark.
///
/// Under `-2` the response must carry an extractable block number `B` with
/// `B <= L` and `L > 0`; anything else skips the write. Unknown negative
/// codes are treated as no-cache.
#[must_use]
pub fn write_policy(ttl: i64, response: &Value, tracker: &BlockTracker) -> CacheWrite {
    match ttl {
        TTL_NO_EXPIRE => CacheWrite::Store(None),
        TTL_NO_CACHE => CacheWrite::SkipNoCache,
        TTL_EXPIRE_IF_IRREVERSIBLE => {
            let irreversible = super::block::block_num_from_response(response)
                .is_some_and(|block_num| tracker.is_irreversible(block_num));
            if irreversible {
                CacheWrite::Store(None)
            } else {
                CacheWrite::SkipNotIrreversible
            }
        }
        seconds if seconds > 0 => CacheWrite::Store(Some(Duration::from_secs(seconds as u64))),
        _ => CacheWrite::SkipNoCache,
    }
}
