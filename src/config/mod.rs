// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport-wide defaults and per-call request overrides.

use std::time::Duration;

/// Transport-wide configuration applied to every call unless a
/// [`RequestConfig`] overrides it.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Initial dead window applied to a node on its first failure.
    pub dead_timeout: Duration,
    /// Ceiling for the exponentially growing dead window.
    pub max_dead_timeout: Duration,
    /// How long a liveness probe may take before it counts as a failure.
    pub ping_timeout: Duration,
    /// Default deadline for a whole logical call. `None` means no deadline.
    pub request_timeout: Option<Duration>,
    /// Refresh the topology after a node is marked dead.
    pub sniff_on_connection_failure: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            dead_timeout: Duration::from_secs(60),
            max_dead_timeout: Duration::from_secs(30 * 60),
            ping_timeout: Duration::from_secs(2),
            request_timeout: None,
            sniff_on_connection_failure: true,
        }
    }
}

impl TransportConfig {
    /// Create a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial dead window for failing nodes.
    #[must_use]
    pub fn with_dead_timeout(mut self, timeout: Duration) -> Self {
        self.dead_timeout = timeout;
        self
    }

    /// Set the ceiling for the dead window.
    #[must_use]
    pub fn with_max_dead_timeout(mut self, timeout: Duration) -> Self {
        self.max_dead_timeout = timeout;
        self
    }

    /// Set the liveness probe timeout.
    #[must_use]
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// Set the default per-call deadline.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Disable topology refresh on connection failures.
    #[must_use]
    pub fn disable_sniff_on_connection_failure(mut self) -> Self {
        self.sniff_on_connection_failure = false;
        self
    }
}

/// Per-call overrides attached to a single logical request.
///
/// Immutable once the request starts; every field falls back to the
/// transport/pool default when unset.
#[derive(Debug, Clone, Default)]
pub struct RequestConfig {
    /// Override the retry budget for this call.
    pub max_retries: Option<u32>,
    /// Override the call deadline.
    pub timeout: Option<Duration>,
    /// Retain the fully buffered response bytes for diagnostics.
    pub keep_raw_response: bool,
    /// Turn a structured server error into a returned `Err` instead of a
    /// failed response.
    pub throw_on_server_error: bool,
    /// Non-2xx status codes that count as a valid outcome for this call
    /// (e.g. 404 on a lookup-by-id).
    pub allowed_status_codes: Vec<u16>,
}

impl RequestConfig {
    /// Create an empty per-call configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retry budget for this call.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set the deadline for this call.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Retain the raw response bytes alongside the typed result.
    #[must_use]
    pub fn keep_raw_response(mut self) -> Self {
        self.keep_raw_response = true;
        self
    }

    /// Fail the call with a [`crate::TransportError::Server`] when the node
    /// reports a structured error.
    #[must_use]
    pub fn throw_on_server_error(mut self) -> Self {
        self.throw_on_server_error = true;
        self
    }

    /// Treat the given non-2xx status as a valid outcome.
    #[must_use]
    pub fn with_allowed_status(mut self, status: u16) -> Self {
        self.allowed_status_codes.push(status);
        self
    }

    /// Treat each of the given non-2xx statuses as a valid outcome.
    #[must_use]
    pub fn with_allowed_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.allowed_status_codes.extend(statuses);
        self
    }
}
