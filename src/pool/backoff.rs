// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

/// Bounded exponential growth of a node's dead window.
///
/// The window doubles with each consecutive failure and never exceeds the
/// configured ceiling, so a flapping node is excluded for longer and longer
/// but always becomes a candidate again.
#[derive(Debug, Clone, Copy)]
pub struct DeadBackoff {
    initial: Duration,
    max: Duration,
}

impl DeadBackoff {
    /// Create a backoff with the given initial window and ceiling.
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Dead window for a node with `failed_attempts` consecutive failures.
    ///
    /// The first failure yields the initial window; zero is treated as one.
    #[must_use]
    pub fn window(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(16);
        let millis = (self.initial.as_millis() as u64).saturating_mul(1 << exponent);
        Duration::from_millis(millis).min(self.max)
    }
}

impl Default for DeadBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(30 * 60))
    }
}
