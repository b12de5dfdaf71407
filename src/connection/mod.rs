// SPDX-License-Identifier: MIT OR Apache-2.0

//! The wire seam: an HTTP verb call against one node, producing a
//! [`ResponseEnvelope`] with a streamed body.
//!
//! The transport never talks HTTP directly; it goes through the
//! [`Connection`] trait so the wire layer can be swapped out (see
//! [`crate::testkit::MockConnection`]). [`HttpConnection`] is the
//! reqwest-backed default.

mod http_connection;

pub use http_connection::{HttpConnection, HttpConnectionConfig};

use std::fmt;
use std::pin::Pin;
use std::str::FromStr;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use tokio::io::AsyncRead;
use url::Url;

use crate::config::RequestConfig;
use crate::error::{Result, TransportError};

/// A readable response body stream. Dropping it releases the underlying
/// connection resource.
pub type BodyReader = Pin<Box<dyn AsyncRead + Send>>;

/// The HTTP verbs the transport dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVerb {
    Head,
    Get,
    Post,
    Put,
    Delete,
}

impl HttpVerb {
    /// Parse a verb case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for anything other than
    /// HEAD/GET/POST/PUT/DELETE.
    pub fn parse(method: &str) -> Result<Self> {
        match method.to_ascii_lowercase().as_str() {
            "head" => Ok(Self::Head),
            "get" => Ok(Self::Get),
            "post" => Ok(Self::Post),
            "put" => Ok(Self::Put),
            "delete" => Ok(Self::Delete),
            _ => Err(TransportError::Config(format!(
                "Unknown HTTP method {method}"
            ))),
        }
    }

    /// Canonical upper-case name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Head => "HEAD",
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpVerb {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// What one wire-level attempt produced.
///
/// Consumed exactly once per attempt; the body stream is dropped before
/// any retry so a connection is never left open across attempts.
pub struct ResponseEnvelope {
    /// The full request URI this envelope answers.
    pub uri: Url,
    /// HTTP status, absent when the call faulted before a response.
    pub status: Option<StatusCode>,
    /// Readable body stream; absent for faulted or bodiless responses.
    pub body: Option<BodyReader>,
    /// True only for a completed call with a 2xx status.
    pub success: bool,
    /// The captured transport-level fault, if any.
    pub error: Option<TransportError>,
}

impl ResponseEnvelope {
    /// Envelope for a completed HTTP exchange.
    #[must_use]
    pub fn received(uri: Url, status: StatusCode, body: Option<BodyReader>) -> Self {
        Self {
            uri,
            status: Some(status),
            body,
            success: status.is_success(),
            error: None,
        }
    }

    /// Envelope for a call that faulted before any status was received.
    #[must_use]
    pub fn faulted(uri: Url, error: TransportError) -> Self {
        Self {
            uri,
            status: None,
            body: None,
            success: false,
            error: Some(error),
        }
    }

    /// Status as a bare code, if one was received.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        self.status.map(|s| s.as_u16())
    }
}

impl fmt::Debug for ResponseEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseEnvelope")
            .field("uri", &self.uri.as_str())
            .field("status", &self.status)
            .field("body", &self.body.as_ref().map(|_| "<stream>"))
            .field("success", &self.success)
            .field("error", &self.error)
            .finish()
    }
}

/// Performs raw HTTP verb calls against a single URI.
///
/// Implementations never return errors directly: every fault, including
/// synchronous ones, is captured into a faulted [`ResponseEnvelope`] so the
/// orchestrator can classify it like any other outcome.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn head(&self, uri: Url, config: &RequestConfig) -> ResponseEnvelope;

    async fn get(&self, uri: Url, config: &RequestConfig) -> ResponseEnvelope;

    async fn post(&self, uri: Url, body: Bytes, config: &RequestConfig) -> ResponseEnvelope;

    async fn put(&self, uri: Url, body: Bytes, config: &RequestConfig) -> ResponseEnvelope;

    /// Body-less DELETE.
    async fn delete(&self, uri: Url, config: &RequestConfig) -> ResponseEnvelope;

    async fn delete_with_body(&self, uri: Url, body: Bytes, config: &RequestConfig)
        -> ResponseEnvelope;

    /// Lightweight liveness probe. Defaults to a HEAD against the node root.
    async fn ping(&self, uri: Url, config: &RequestConfig) -> ResponseEnvelope {
        self.head(uri, config).await
    }
}

#[async_trait]
impl<C: Connection + ?Sized> Connection for std::sync::Arc<C> {
    async fn head(&self, uri: Url, config: &RequestConfig) -> ResponseEnvelope {
        (**self).head(uri, config).await
    }

    async fn get(&self, uri: Url, config: &RequestConfig) -> ResponseEnvelope {
        (**self).get(uri, config).await
    }

    async fn post(&self, uri: Url, body: Bytes, config: &RequestConfig) -> ResponseEnvelope {
        (**self).post(uri, body, config).await
    }

    async fn put(&self, uri: Url, body: Bytes, config: &RequestConfig) -> ResponseEnvelope {
        (**self).put(uri, body, config).await
    }

    async fn delete(&self, uri: Url, config: &RequestConfig) -> ResponseEnvelope {
        (**self).delete(uri, config).await
    }

    async fn delete_with_body(
        &self,
        uri: Url,
        body: Bytes,
        config: &RequestConfig,
    ) -> ResponseEnvelope {
        (**self).delete_with_body(uri, body, config).await
    }

    async fn ping(&self, uri: Url, config: &RequestConfig) -> ResponseEnvelope {
        (**self).ping(uri, config).await
    }
}
