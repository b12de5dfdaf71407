// SPDX-License-Identifier: MIT OR Apache-2.0

//! Response handling: streamed body reading, the serializer seam, and the
//! [`CallResponse`] handed back to callers.
//!
//! How a body is consumed is decided once per call at the caller boundary
//! (typed, raw bytes, open stream, void, or a per-call override) rather
//! than inspected at runtime; see the `request_*` methods on
//! [`crate::transport::Transport`].

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use tokio::io::AsyncReadExt;
use url::Url;

use crate::connection::{BodyReader, HttpVerb};
use crate::error::{Result, ServerError};
use crate::transport::Attempt;

/// Chunk size for the incremental body read.
pub const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Drain a body stream into a growable buffer, one fixed-size chunk at a
/// time, until a zero-length read signals end of stream.
///
/// The buffered bytes replay the body byte for byte. Any read fault fails
/// the whole read; the stream is released in every exit path once the
/// reader is dropped by the caller.
///
/// # Errors
///
/// Returns an I/O error when a chunk read fails.
pub async fn read_to_end(body: &mut BodyReader) -> Result<Vec<u8>> {
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    let mut buffer = Vec::new();
    loop {
        let read = body.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
    }
    Ok(buffer)
}

/// Distinguish a bodiless stream from one carrying content.
///
/// Some transports surface an empty body as a present-but-empty stream
/// (no content length on a chunked response). One chunk is probed: end
/// of stream on the first read yields `None`, otherwise the stream is
/// returned with the probed chunk replayed ahead of the rest.
///
/// # Errors
///
/// Returns an I/O error when the probe read fails.
pub async fn non_empty(mut body: BodyReader) -> Result<Option<BodyReader>> {
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    let read = body.read(&mut chunk).await?;
    if read == 0 {
        return Ok(None);
    }
    let head = std::io::Cursor::new(chunk[..read].to_vec());
    Ok(Some(Box::pin(head.chain(body))))
}

/// Converts a readable body stream into a typed value.
///
/// Implementations must accept an arbitrary stream and not assume
/// seekability; they own the stream and are responsible for draining it.
#[async_trait]
pub trait Serializer: Send + Sync {
    async fn deserialize<T>(&self, body: BodyReader) -> Result<T>
    where
        T: DeserializeOwned + Send + 'static;
}

/// serde_json-backed default serializer.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

#[async_trait]
impl Serializer for JsonSerializer {
    async fn deserialize<T>(&self, mut body: BodyReader) -> Result<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let bytes = read_to_end(&mut body).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Envelope metadata handed to a per-call response override.
#[derive(Debug, Clone)]
pub struct ResponseMeta {
    /// Verb of the originating request.
    pub verb: HttpVerb,
    /// Path fragment of the originating request.
    pub path: String,
    /// HTTP status of the accepted attempt.
    pub status: u16,
    /// Node that answered.
    pub node: Option<Url>,
}

/// The resolved outcome of one logical call.
#[derive(Debug)]
pub struct CallResponse<T> {
    /// Verb of the originating request.
    pub verb: HttpVerb,
    /// Path fragment of the originating request.
    pub path: String,
    /// Node that produced the accepted response.
    pub node: Option<Url>,
    /// HTTP status of the accepted response.
    pub status: Option<u16>,
    /// The typed payload, when one was produced.
    pub body: Option<T>,
    /// Buffered response bytes, when retention was requested or forced.
    pub raw: Option<Bytes>,
    /// Structured server error extracted from an invalid response.
    pub server_error: Option<ServerError>,
    /// True when the status is 2xx or explicitly allowed for this call.
    pub success: bool,
    /// True when `success` holds or the status is a known, non-retryable
    /// server answer.
    pub success_or_known_error: bool,
    /// Audit trail of every ping and dispatch made for this call.
    pub attempts: Vec<Attempt>,
}

impl<T> CallResponse<T> {
    /// Number of real dispatches (pings excluded) made for this call.
    #[must_use]
    pub fn dispatch_count(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.kind == crate::transport::AttemptKind::Request)
            .count()
    }

    /// Map the typed payload, keeping every other field.
    #[must_use]
    pub fn map_body<U>(self, f: impl FnOnce(T) -> U) -> CallResponse<U> {
        CallResponse {
            verb: self.verb,
            path: self.path,
            node: self.node,
            status: self.status,
            body: self.body.map(f),
            raw: self.raw,
            server_error: self.server_error,
            success: self.success,
            success_or_known_error: self.success_or_known_error,
            attempts: self.attempts,
        }
    }
}
