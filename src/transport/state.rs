// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use url::Url;

use crate::config::RequestConfig;
use crate::connection::HttpVerb;
use crate::error::AttemptFailure;
use crate::pool::Node;

/// What a recorded attempt actually was on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptKind {
    /// Liveness probe before dispatch.
    Ping,
    /// The request itself.
    Request,
}

/// One entry in a call's audit trail.
#[derive(Debug, Clone)]
pub struct Attempt {
    /// Ping or dispatch.
    pub kind: AttemptKind,
    /// Node the attempt targeted.
    pub node: Url,
    /// HTTP status, when a response came back.
    pub status: Option<u16>,
    /// Whether the attempt was accepted.
    pub success: bool,
    /// Wall time the attempt took.
    pub elapsed: Duration,
}

/// Mutable per-call state threaded through the retry loop.
pub(crate) struct RequestState {
    pub verb: HttpVerb,
    pub path: String,
    pub body: Option<Bytes>,
    pub config: RequestConfig,
    /// Retries consumed so far; the first attempt is free.
    pub retried: u32,
    pub failures: Vec<AttemptFailure>,
    pub current_node: Option<Arc<Node>>,
    pub attempts: Vec<Attempt>,
    pub timeout: Option<Duration>,
    pub deadline: Option<Instant>,
}

impl RequestState {
    pub fn new(
        verb: HttpVerb,
        path: impl Into<String>,
        body: Option<Bytes>,
        config: RequestConfig,
        default_timeout: Option<Duration>,
    ) -> Self {
        let timeout = config.timeout.or(default_timeout);
        Self {
            verb,
            path: path.into(),
            body,
            config,
            retried: 0,
            failures: Vec::new(),
            current_node: None,
            attempts: Vec::new(),
            timeout,
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    pub fn record_attempt(
        &mut self,
        kind: AttemptKind,
        node: Url,
        status: Option<u16>,
        success: bool,
        elapsed: Duration,
    ) {
        self.attempts.push(Attempt {
            kind,
            node,
            status,
            success,
            elapsed,
        });
    }

    pub fn record_failure(&mut self, node: Url, error: crate::error::TransportError) {
        self.failures.push(AttemptFailure { node, error });
    }
}
