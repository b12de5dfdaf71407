// SPDX-License-Identifier: MIT OR Apache-2.0

//! The node directory: candidate endpoints with liveness state.
//!
//! This module provides:
//! - [`Node`]: one endpoint with dead-until / failure-count bookkeeping
//! - [`NodePool`]: selection, dead/alive marking, staleness tracking
//! - [`NodeSelector`]: strategies for choosing the next node
//!
//! Node state is held in atomics so selection and liveness mutations from
//! concurrent in-flight calls never tear: a node marked dead is dead for
//! the very next selection.

mod backoff;

pub use backoff::DeadBackoff;

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, warn};
use url::Url;

use crate::config::RequestConfig;
use crate::error::{Result, TransportError};

/// One candidate endpoint.
///
/// Owned exclusively by the pool; liveness is mutated only through
/// [`NodePool::mark_dead`] and [`NodePool::mark_alive`]. Timestamps are
/// millis relative to the pool epoch, with 0 meaning "never".
#[derive(Debug)]
pub struct Node {
    url: Url,
    /// End of the current dead window; stays set after expiry until the
    /// node is marked alive again, which is what flags a revived node.
    dead_until_ms: AtomicU64,
    /// Last time the node answered successfully.
    last_seen_ms: AtomicU64,
    consecutive_failures: AtomicU32,
}

impl Node {
    fn new(url: Url) -> Self {
        Self {
            url,
            dead_until_ms: AtomicU64::new(0),
            last_seen_ms: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// The endpoint this node answers on.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Number of consecutive failures since the node last answered.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    fn is_dead(&self, now_ms: u64) -> bool {
        self.dead_until_ms.load(Ordering::Acquire) > now_ms
    }
}

/// Strategy for choosing the next node among the alive ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeSelector {
    /// Round-robin across alive nodes.
    #[default]
    RoundRobin,
    /// Random pick among alive nodes.
    Random,
}

/// Configuration for the node pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// A node answered within this window is trusted without a ping.
    pub ping_after: Duration,
    /// Refresh topology when the last sniff is older than this.
    /// `None` disables staleness-driven sniffing.
    pub sniff_interval: Option<Duration>,
    /// Default retry budget. `None` means one attempt per other node.
    pub max_retries: Option<u32>,
    /// Selection strategy.
    pub selector: NodeSelector,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            ping_after: Duration::from_secs(60),
            sniff_interval: None,
            max_retries: None,
            selector: NodeSelector::RoundRobin,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how recently a node must have answered to skip the ping.
    #[must_use]
    pub fn with_ping_after(mut self, ping_after: Duration) -> Self {
        self.ping_after = ping_after;
        self
    }

    /// Enable staleness-driven topology refresh.
    #[must_use]
    pub fn with_sniff_interval(mut self, interval: Duration) -> Self {
        self.sniff_interval = Some(interval);
        self
    }

    /// Set the default retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set the selection strategy.
    #[must_use]
    pub fn with_selector(mut self, selector: NodeSelector) -> Self {
        self.selector = selector;
        self
    }
}

/// Directory of candidate nodes, safe for concurrent use by many
/// in-flight calls.
pub struct NodePool {
    config: PoolConfig,
    nodes: RwLock<Vec<Arc<Node>>>,
    round_robin: AtomicUsize,
    epoch: Instant,
    last_sniff_ms: AtomicU64,
}

impl NodePool {
    /// Create a pool over the given endpoints with default settings.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no endpoints are given.
    pub fn new(urls: Vec<Url>) -> Result<Self> {
        Self::with_config(urls, PoolConfig::default())
    }

    /// Create a pool over the given endpoints.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no endpoints are given.
    pub fn with_config(urls: Vec<Url>, config: PoolConfig) -> Result<Self> {
        if urls.is_empty() {
            return Err(TransportError::Config(
                "At least one node is required".to_string(),
            ));
        }
        let nodes = urls.into_iter().map(|u| Arc::new(Node::new(u))).collect();
        Ok(Self {
            config,
            nodes: RwLock::new(nodes),
            round_robin: AtomicUsize::new(0),
            epoch: Instant::now(),
            last_sniff_ms: AtomicU64::new(0),
        })
    }

    // Millis since the pool epoch, offset so 0 can mean "never".
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64 + 1
    }

    /// Pick the next node and report whether it needs a liveness probe
    /// before it can be trusted.
    ///
    /// Alive nodes are taken per the configured strategy, skipping any
    /// inside a dead window. When every node is dead, the one whose
    /// window expires soonest is revived as a candidate (ping required).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NoNodes`] when the pool is empty.
    pub fn select_next(&self) -> Result<(Arc<Node>, bool)> {
        let nodes = self.nodes.read().clone();
        if nodes.is_empty() {
            return Err(TransportError::NoNodes);
        }
        let now = self.now_ms();

        match self.config.selector {
            NodeSelector::RoundRobin => {
                let start = self.round_robin.fetch_add(1, Ordering::Relaxed);
                for i in 0..nodes.len() {
                    let node = &nodes[(start + i) % nodes.len()];
                    if !node.is_dead(now) {
                        return Ok((node.clone(), self.ping_required(node, now)));
                    }
                }
            }
            NodeSelector::Random => {
                let alive: Vec<&Arc<Node>> = nodes.iter().filter(|n| !n.is_dead(now)).collect();
                if !alive.is_empty() {
                    let node = alive[rand::random_range(0..alive.len())].clone();
                    let ping = self.ping_required(&node, now);
                    return Ok((node, ping));
                }
            }
        }

        // Every node is inside a dead window; revive the soonest one.
        let revived = nodes
            .iter()
            .min_by_key(|n| n.dead_until_ms.load(Ordering::Acquire))
            .cloned();
        match revived {
            Some(node) => Ok((node, true)),
            None => Err(TransportError::NoNodes),
        }
    }

    fn ping_required(&self, node: &Node, now_ms: u64) -> bool {
        let last_seen = node.last_seen_ms.load(Ordering::Acquire);
        if last_seen == 0 {
            return true;
        }
        // A node coming out of a dead window is not trusted until it answers.
        if node.dead_until_ms.load(Ordering::Acquire) != 0 {
            return true;
        }
        now_ms.saturating_sub(last_seen) > self.config.ping_after.as_millis() as u64
    }

    /// Exclude a node for an exponentially growing, bounded window.
    pub fn mark_dead(&self, node: &Node, initial_timeout: Duration, max_timeout: Duration) {
        let failures = node.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        let window = DeadBackoff::new(initial_timeout, max_timeout).window(failures);
        let until = self.now_ms() + window.as_millis() as u64;
        node.dead_until_ms.store(until, Ordering::Release);
        warn!(
            target: "cluster_transport::pool",
            node = %node.url,
            failures,
            dead_for = ?window,
            "node marked dead"
        );
    }

    /// Reinstate a node after a successful answer.
    pub fn mark_alive(&self, node: &Node) {
        node.consecutive_failures.store(0, Ordering::Release);
        node.dead_until_ms.store(0, Ordering::Release);
        node.last_seen_ms.store(self.now_ms(), Ordering::Release);
        debug!(target: "cluster_transport::pool", node = %node.url, "node marked alive");
    }

    /// Whether a node is currently inside a dead window.
    #[must_use]
    pub fn is_dead(&self, node: &Node) -> bool {
        node.is_dead(self.now_ms())
    }

    /// Whether topology information is old enough to warrant a sniff.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        match self.config.sniff_interval {
            None => false,
            Some(interval) => {
                let last = self.last_sniff_ms.load(Ordering::Acquire);
                self.now_ms().saturating_sub(last) > interval.as_millis() as u64
            }
        }
    }

    /// Record that a topology refresh completed.
    pub fn record_sniff(&self) {
        self.last_sniff_ms.store(self.now_ms(), Ordering::Release);
    }

    /// Resolve the retry budget for a call: per-call override, then the
    /// pool default, then one attempt per remaining node.
    #[must_use]
    pub fn max_retries(&self, config: &RequestConfig) -> u32 {
        config
            .max_retries
            .or(self.config.max_retries)
            .unwrap_or_else(|| (self.len() as u32).saturating_sub(1))
    }

    /// Replace the node set with a freshly sniffed topology, preserving
    /// the liveness state of nodes that survive. An empty list is ignored.
    pub fn replace_nodes(&self, urls: Vec<Url>) {
        if urls.is_empty() {
            return;
        }
        let mut nodes = self.nodes.write();
        let next = urls
            .into_iter()
            .map(|url| {
                nodes
                    .iter()
                    .find(|n| n.url == url)
                    .cloned()
                    .unwrap_or_else(|| Arc::new(Node::new(url)))
            })
            .collect::<Vec<_>>();
        debug!(
            target: "cluster_transport::pool",
            nodes = next.len(),
            "topology replaced"
        );
        *nodes = next;
    }

    /// Number of nodes currently in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Whether the pool has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Number of nodes outside any dead window.
    #[must_use]
    pub fn alive_count(&self) -> usize {
        let now = self.now_ms();
        self.nodes.read().iter().filter(|n| !n.is_dead(now)).count()
    }

    /// Snapshot of the current node set.
    #[must_use]
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().clone()
    }

    /// Look up a node by endpoint.
    #[must_use]
    pub fn find(&self, url: &Url) -> Option<Arc<Node>> {
        self.nodes.read().iter().find(|n| &n.url == url).cloned()
    }
}

impl std::fmt::Debug for NodePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodePool")
            .field("nodes", &self.len())
            .field("alive", &self.alive_count())
            .field("selector", &self.config.selector)
            .finish()
    }
}
