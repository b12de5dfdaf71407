// SPDX-License-Identifier: MIT OR Apache-2.0

use async_trait::async_trait;
use url::Url;

use crate::error::Result;

/// Discovers the current cluster topology.
///
/// Sniffing is best effort: a failed sniff is logged and the pool keeps
/// its current view, so implementations should return an error rather
/// than panic when discovery is unavailable.
#[async_trait]
pub trait Sniffer: Send + Sync {
    /// Return the node URLs the cluster currently advertises.
    async fn sniff(&self) -> Result<Vec<Url>>;
}
