//! Last-irreversible-block watermark and block-number extraction.
//!
//! The tracker is a single process-wide monotonically non-decreasing integer
//! `L`. It is fed in-band: every upstream response whose result carries
//! `last_irreversible_block_num` advances it. A response block `B` is
//! *irreversible* when `B <= L` and `L > 0`.

use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Process-wide last-irreversible-block watermark.
///
/// Owned by the server state and passed by shared handle into the processor;
/// updates preserve monotonicity via compare-and-set, so stale responses
/// arriving out of order can never move the watermark backwards.
#[derive(Debug, Default)]
pub struct BlockTracker {
    last_irreversible: AtomicU64,
}

impl BlockTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn last_irreversible(&self) -> u64 {
        self.last_irreversible.load(Ordering::Acquire)
    }

    /// Advances the watermark to `block_num` if it is higher.
    ///
    /// Returns `true` when the watermark moved.
    pub fn advance(&self, block_num: u64) -> bool {
        let mut current = self.last_irreversible.load(Ordering::Acquire);
        loop {
            if block_num <= current {
                return false;
            }
            match self.last_irreversible.compare_exchange_weak(
                current,
                block_num,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    trace!(block_num, "irreversible watermark advanced");
                    return true;
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Feeds the tracker from an upstream response.
    ///
    /// Probes `result.last_irreversible_block_num` (number or numeric
    /// string); anything else is silently ignored.
    pub fn observe_response(&self, response: &Value) {
        let Some(result) = response.get("result") else { return };
        let Some(raw) = result.get("last_irreversible_block_num") else { return };

        let block_num = match raw {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        };
        if let Some(block_num) = block_num {
            self.advance(block_num);
        }
    }

    /// Whether `block_num` is at or below the watermark. Always `false`
    /// while the watermark is unset.
    #[must_use]
    pub fn is_irreversible(&self, block_num: u64) -> bool {
        let last = self.last_irreversible();
        last > 0 && block_num <= last
    }
}

/// Extracts the block number a response refers to.
///
/// Probes, in order: `result.block_num`, `result.block.block_id`, and
/// `result.block_id`. Block ids encode their block number in the first 8 hex
/// digits.
#[must_use]
pub fn block_num_from_response(response: &Value) -> Option<u64> {
    let result = response.get("result")?;

    if let Some(raw) = result.get("block_num") {
        return match raw {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        };
    }

    if let Some(block_id) = result
        .get("block")
        .and_then(|block| block.get("block_id"))
        .and_then(Value::as_str)
    {
        return block_num_from_id(block_id);
    }

    result
        .get("block_id")
        .and_then(Value::as_str)
        .and_then(block_num_from_id)
}

/// Decodes the block number from the first 8 hex digits of a block id.
#[must_use]
pub fn block_num_from_id(block_id: &str) -> Option<u64> {
    let prefix = block_id.get(..8)?;
    u64::from_str_radix(prefix, 16).ok()
}
