// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scriptable fakes for exercising the transport without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use parking_lot::Mutex;
use url::Url;

use crate::config::RequestConfig;
use crate::connection::{BodyReader, Connection, HttpVerb, ResponseEnvelope};
use crate::error::{Result, TransportError};
use crate::transport::Sniffer;

/// A readable body over in-memory bytes.
pub fn reader(bytes: impl Into<Bytes>) -> BodyReader {
    Box::pin(std::io::Cursor::new(bytes.into()))
}

/// One scripted wire outcome.
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: Option<StatusCode>,
    body: Option<Bytes>,
    fault: Option<String>,
}

impl MockResponse {
    /// A completed response with the given status and no body.
    #[must_use]
    pub fn status(status: StatusCode) -> Self {
        Self {
            status: Some(status),
            body: None,
            fault: None,
        }
    }

    /// Attach a body to a completed response.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// A transport fault that produced no status at all.
    #[must_use]
    pub fn fault(message: impl Into<String>) -> Self {
        Self {
            status: None,
            body: None,
            fault: Some(message.into()),
        }
    }

    fn into_envelope(self, uri: Url) -> ResponseEnvelope {
        match (self.status, self.fault) {
            (Some(status), _) => {
                ResponseEnvelope::received(uri, status, self.body.map(reader))
            }
            (None, fault) => ResponseEnvelope::faulted(
                uri,
                TransportError::Connection(
                    fault.unwrap_or_else(|| "mock fault".to_string()),
                ),
            ),
        }
    }
}

/// One call the mock connection observed.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub verb: HttpVerb,
    pub uri: Url,
    pub body: Option<Bytes>,
}

/// A [`Connection`] that replays a scripted sequence of outcomes.
///
/// Requests consume the request script in order; pings consume their own
/// script and succeed once it is exhausted. An exhausted request script
/// yields a fault, so an over-long retry loop fails loudly instead of
/// hanging a test.
#[derive(Debug, Default)]
pub struct MockConnection {
    responses: Mutex<VecDeque<MockResponse>>,
    pings: Mutex<VecDeque<MockResponse>>,
    calls: Mutex<Vec<MockCall>>,
    ping_count: AtomicUsize,
}

impl MockConnection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next scripted request outcome.
    pub fn enqueue(&self, response: MockResponse) {
        self.responses.lock().push_back(response);
    }

    /// Append the next scripted ping outcome.
    pub fn enqueue_ping(&self, response: MockResponse) {
        self.pings.lock().push_back(response);
    }

    /// Script the next ping to fault.
    pub fn enqueue_ping_failure(&self) {
        self.enqueue_ping(MockResponse::fault("ping refused"));
    }

    /// Every request the connection has seen, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    #[must_use]
    pub fn request_count(&self) -> usize {
        self.calls.lock().len()
    }

    #[must_use]
    pub fn ping_count(&self) -> usize {
        self.ping_count.load(Ordering::Relaxed)
    }

    fn respond(&self, verb: HttpVerb, uri: Url, body: Option<Bytes>) -> ResponseEnvelope {
        self.calls.lock().push(MockCall {
            verb,
            uri: uri.clone(),
            body,
        });
        match self.responses.lock().pop_front() {
            Some(response) => response.into_envelope(uri),
            None => ResponseEnvelope::faulted(
                uri,
                TransportError::Connection("mock script exhausted".to_string()),
            ),
        }
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn head(&self, uri: Url, _config: &RequestConfig) -> ResponseEnvelope {
        self.respond(HttpVerb::Head, uri, None)
    }

    async fn get(&self, uri: Url, _config: &RequestConfig) -> ResponseEnvelope {
        self.respond(HttpVerb::Get, uri, None)
    }

    async fn post(&self, uri: Url, body: Bytes, _config: &RequestConfig) -> ResponseEnvelope {
        self.respond(HttpVerb::Post, uri, Some(body))
    }

    async fn put(&self, uri: Url, body: Bytes, _config: &RequestConfig) -> ResponseEnvelope {
        self.respond(HttpVerb::Put, uri, Some(body))
    }

    async fn delete(&self, uri: Url, _config: &RequestConfig) -> ResponseEnvelope {
        self.respond(HttpVerb::Delete, uri, None)
    }

    async fn delete_with_body(
        &self,
        uri: Url,
        body: Bytes,
        _config: &RequestConfig,
    ) -> ResponseEnvelope {
        self.respond(HttpVerb::Delete, uri, Some(body))
    }

    async fn ping(&self, uri: Url, _config: &RequestConfig) -> ResponseEnvelope {
        self.ping_count.fetch_add(1, Ordering::Relaxed);
        match self.pings.lock().pop_front() {
            Some(response) => response.into_envelope(uri),
            None => ResponseEnvelope::received(uri, StatusCode::OK, None),
        }
    }
}

/// A sniffer that returns a fixed topology, or always fails.
#[derive(Debug)]
pub struct StaticSniffer {
    nodes: Option<Vec<Url>>,
    sniff_count: AtomicUsize,
}

impl StaticSniffer {
    #[must_use]
    pub fn new(nodes: Vec<Url>) -> Self {
        Self {
            nodes: Some(nodes),
            sniff_count: AtomicUsize::new(0),
        }
    }

    /// A sniffer whose every call fails.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            nodes: None,
            sniff_count: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn sniff_count(&self) -> usize {
        self.sniff_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Sniffer for StaticSniffer {
    async fn sniff(&self) -> Result<Vec<Url>> {
        self.sniff_count.fetch_add(1, Ordering::Relaxed);
        self.nodes
            .clone()
            .ok_or_else(|| TransportError::Connection("sniffer unavailable".to_string()))
    }
}
