// SPDX-License-Identifier: MIT
//! Latency instrumentation for retrieve and diff passes.

use std::time::Instant;
use tracing::{debug, info};

/// Elapsed time above which an operation is logged at info level.
const SLOW_OP_MS: u128 = 1000;

/// Track latency of one named operation and emit a structured log event.
pub struct LatencyTracker {
    operation: String,
    start: Instant,
}

impl LatencyTracker {
    /// Start tracking, e.g. `LatencyTracker::start("cache.load")`.
    pub fn start(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            start: Instant::now(),
        }
    }

    /// Finish and log the elapsed time.
    pub fn finish(self) {
        self.log(None);
    }

    /// Finish and log the elapsed time plus how many items the operation
    /// touched.
    pub fn finish_with_items(self, items: usize) {
        self.log(Some(items));
    }

    fn log(self, items: Option<usize>) {
        let elapsed_ms = self.start.elapsed().as_millis();
        match (elapsed_ms > SLOW_OP_MS, items) {
            (true, Some(items)) => {
                info!(operation = %self.operation, elapsed_ms, items, "slow operation")
            }
            (true, None) => info!(operation = %self.operation, elapsed_ms, "slow operation"),
            (false, Some(items)) => {
                debug!(operation = %self.operation, elapsed_ms, items, "operation complete")
            }
            (false, None) => debug!(operation = %self.operation, elapsed_ms, "operation complete"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trackers_can_finish_either_way() {
        LatencyTracker::start("test.op").finish();
        LatencyTracker::start("test.op").finish_with_items(3);
    }
}
