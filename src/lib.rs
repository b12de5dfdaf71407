// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resilient request execution over a pool of cluster nodes.
//!
//! One logical call becomes a sequence of HTTP attempts: the transport
//! picks a node, pings it when its liveness is unknown, dispatches,
//! classifies the outcome, and retries on the next candidate with
//! exponential dead-node backoff until the call succeeds or the retry
//! budget is spent.

pub mod classify;
pub mod config;
pub mod connection;
pub mod error;
pub mod pool;
pub mod response;
pub mod testkit;
pub mod transport;

pub use config::{RequestConfig, TransportConfig};
pub use connection::{BodyReader, Connection, HttpConnection, HttpVerb, ResponseEnvelope};
pub use error::{Result, ServerError, TransportError};
pub use pool::{Node, NodePool, NodeSelector, PoolConfig};
pub use response::{CallResponse, JsonSerializer, ResponseMeta, Serializer};
pub use transport::{Attempt, AttemptKind, Sniffer, Transport};
