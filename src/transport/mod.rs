// SPDX-License-Identifier: MIT OR Apache-2.0

//! The request orchestrator.
//!
//! [`Transport`] turns one logical API call into a sequence of wire
//! attempts against the node pool: select a node, ping it when its
//! liveness is unknown, dispatch, classify the outcome, and either hand
//! the response to the caller or mark the node dead and retry on the
//! next candidate. Attempts within one call are strictly sequential and
//! every body stream is released before the next attempt starts.

mod state;

pub mod sniff;

use std::mem;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::Future;
use http::StatusCode;
use serde::de::DeserializeOwned;
use tokio::time::{timeout, timeout_at};
use tracing::{debug, warn};
use url::Url;

use crate::classify::{is_retryable, is_valid, parse_server_error};
use crate::config::{RequestConfig, TransportConfig};
use crate::connection::{BodyReader, Connection, HttpVerb, ResponseEnvelope};
use crate::error::{Result, ServerError, TransportError};
use crate::pool::{Node, NodePool};
use crate::response::{non_empty, read_to_end, CallResponse, JsonSerializer, ResponseMeta, Serializer};

pub use sniff::Sniffer;
pub use state::{Attempt, AttemptKind};

use state::RequestState;

/// Coordinates retries, pings, and sniffs over a shared node pool.
///
/// Cheap to share behind an [`Arc`]; all per-call state lives on the
/// stack of the call itself, so any number of logical calls may be in
/// flight concurrently.
pub struct Transport<C, S = JsonSerializer> {
    connection: C,
    serializer: S,
    pool: Arc<NodePool>,
    sniffer: Option<Arc<dyn Sniffer>>,
    config: TransportConfig,
}

impl<C: Connection> Transport<C, JsonSerializer> {
    /// Transport with the JSON serializer and default settings.
    pub fn new(connection: C, pool: NodePool) -> Self {
        Self::with_parts(connection, JsonSerializer, pool, TransportConfig::default())
    }
}

impl<C: Connection, S: Serializer> Transport<C, S> {
    /// Transport from explicit parts.
    pub fn with_parts(connection: C, serializer: S, pool: NodePool, config: TransportConfig) -> Self {
        Self {
            connection,
            serializer,
            pool: Arc::new(pool),
            sniffer: None,
            config,
        }
    }

    /// Attach a topology sniffer.
    ///
    /// Enables scheduled refreshes when the pool is configured with a
    /// sniff interval, and refreshes after connection failures unless
    /// disabled in [`TransportConfig`].
    #[must_use]
    pub fn with_sniffer(mut self, sniffer: Arc<dyn Sniffer>) -> Self {
        self.sniffer = Some(sniffer);
        self
    }

    /// The shared node pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<NodePool> {
        &self.pool
    }

    /// Dispatch and deserialize the body into `T` via the serializer.
    ///
    /// A bodiless success yields `body: None`. With
    /// [`RequestConfig::keep_raw_response`] the body is buffered first
    /// and deserialized from the buffer, and the bytes are retained on
    /// the response.
    pub async fn request<T>(
        &self,
        verb: HttpVerb,
        path: &str,
        body: Option<Bytes>,
        config: RequestConfig,
    ) -> Result<CallResponse<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let (state, status, body) = self.run(verb, path, body, config).await?;
        if !is_valid(status, &state.config) {
            return self.resolve_error(state, status, body).await;
        }
        if state.config.keep_raw_response {
            let raw = self.within_deadline(&state, Self::buffer(body)).await??;
            let typed = if raw.is_empty() {
                None
            } else {
                let replay: BodyReader = Box::pin(std::io::Cursor::new(raw.clone()));
                Some(self.serializer.deserialize(replay).await?)
            };
            return Ok(self.resolve(state, status, typed, Some(raw), None));
        }
        // An empty stream is a bodiless response, same as on the
        // buffered path; the serializer only ever sees actual content.
        let typed = match body {
            Some(stream) => match self.within_deadline(&state, non_empty(stream)).await?? {
                Some(stream) => Some(
                    self.within_deadline(&state, self.serializer.deserialize(stream))
                        .await??,
                ),
                None => None,
            },
            None => None,
        };
        Ok(self.resolve(state, status, typed, None, None))
    }

    /// Dispatch and buffer the body as raw bytes.
    pub async fn request_raw(
        &self,
        verb: HttpVerb,
        path: &str,
        body: Option<Bytes>,
        config: RequestConfig,
    ) -> Result<CallResponse<Bytes>> {
        let (state, status, body) = self.run(verb, path, body, config).await?;
        if !is_valid(status, &state.config) {
            return self.resolve_error(state, status, body).await;
        }
        let raw = self.within_deadline(&state, Self::buffer(body)).await??;
        Ok(self.resolve(state, status, Some(raw.clone()), Some(raw), None))
    }

    /// Dispatch and buffer the body as UTF-8 text.
    pub async fn request_text(
        &self,
        verb: HttpVerb,
        path: &str,
        body: Option<Bytes>,
        config: RequestConfig,
    ) -> Result<CallResponse<String>> {
        let (state, status, body) = self.run(verb, path, body, config).await?;
        if !is_valid(status, &state.config) {
            return self.resolve_error(state, status, body).await;
        }
        let raw = self.within_deadline(&state, Self::buffer(body)).await??;
        let text = String::from_utf8(raw.to_vec())
            .map_err(|e| TransportError::Deserialization(format!("response is not UTF-8: {e}")))?;
        Ok(self.resolve(state, status, Some(text), Some(raw), None))
    }

    /// Dispatch and hand back the body as an unread stream.
    ///
    /// The stream is returned as received, for any status: no bytes are
    /// read and no server error is extracted, so the caller owns
    /// draining or dropping it and inspecting `status` themselves.
    pub async fn request_stream(
        &self,
        verb: HttpVerb,
        path: &str,
        body: Option<Bytes>,
        config: RequestConfig,
    ) -> Result<CallResponse<BodyReader>> {
        let (state, status, body) = self.run(verb, path, body, config).await?;
        Ok(self.resolve(state, status, body, None, None))
    }

    /// Dispatch for status only, discarding any body immediately.
    pub async fn request_void(
        &self,
        verb: HttpVerb,
        path: &str,
        body: Option<Bytes>,
        config: RequestConfig,
    ) -> Result<CallResponse<()>> {
        let (state, status, body) = self.run(verb, path, body, config).await?;
        drop(body);
        if !is_valid(status, &state.config) {
            return Ok(self.resolve(state, status, None, None, None));
        }
        Ok(self.resolve(state, status, Some(()), None, None))
    }

    /// Dispatch with a per-call reader override.
    ///
    /// On a valid status the override receives the attempt metadata and
    /// the unread body stream and produces the typed value; any other
    /// status takes the standard error path. With
    /// [`RequestConfig::keep_raw_response`] the body is buffered first,
    /// retained on the response, and the override reads a replay.
    pub async fn request_with<T, F, Fut>(
        &self,
        verb: HttpVerb,
        path: &str,
        body: Option<Bytes>,
        config: RequestConfig,
        read: F,
    ) -> Result<CallResponse<T>>
    where
        F: FnOnce(ResponseMeta, Option<BodyReader>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (state, status, body) = self.run(verb, path, body, config).await?;
        if !is_valid(status, &state.config) {
            return self.resolve_error(state, status, body).await;
        }
        let meta = ResponseMeta {
            verb: state.verb,
            path: state.path.clone(),
            status: status.as_u16(),
            node: state.current_node.as_ref().map(|n| n.url().clone()),
        };
        if state.config.keep_raw_response {
            let raw = self.within_deadline(&state, Self::buffer(body)).await??;
            let replay: BodyReader = Box::pin(std::io::Cursor::new(raw.clone()));
            let typed = self.within_deadline(&state, read(meta, Some(replay))).await??;
            return Ok(self.resolve(state, status, Some(typed), Some(raw), None));
        }
        let typed = self.within_deadline(&state, read(meta, body)).await??;
        Ok(self.resolve(state, status, Some(typed), None, None))
    }

    /// Shared prologue: run the retry loop and split the accepted
    /// envelope.
    async fn run(
        &self,
        verb: HttpVerb,
        path: &str,
        body: Option<Bytes>,
        config: RequestConfig,
    ) -> Result<(RequestState, StatusCode, Option<BodyReader>)> {
        let mut state = RequestState::new(verb, path, body, config, self.config.request_timeout);
        let envelope = self.execute(&mut state).await?;
        let (status, body) = Self::split_envelope(envelope)?;
        Ok((state, status, body))
    }

    /// The attempt loop: select, ping when required, dispatch, classify;
    /// returns the first accepted envelope or the terminal error.
    async fn execute(&self, state: &mut RequestState) -> Result<ResponseEnvelope> {
        loop {
            if self.pool.is_stale() {
                self.sniff_best_effort().await;
            }
            let (node, ping_required) = self.pool.select_next()?;
            state.current_node = Some(Arc::clone(&node));
            if ping_required {
                if let Err(error) = self.ping_node(state, &node).await {
                    if matches!(error, TransportError::Timeout(_)) {
                        return Err(error);
                    }
                    warn!(
                        target: "cluster_transport::transport",
                        node = %node.url(),
                        %error,
                        "ping failed"
                    );
                    state.record_failure(node.url().clone(), error);
                    self.prepare_retry(state, &node).await?;
                    continue;
                }
            }
            let mut envelope = self.dispatch(state, &node).await?;
            if done_processing(&envelope, &state.config) {
                return Ok(envelope);
            }
            let error = attempt_error(&mut envelope);
            // Close the body stream before the next attempt starts.
            drop(envelope);
            state.record_failure(node.url().clone(), error);
            self.prepare_retry(state, &node).await?;
        }
    }

    /// Probe a node whose liveness is unknown.
    ///
    /// The probe runs under its own short timeout inside the overall
    /// call deadline. A deadline expiry is terminal; a probe failure or
    /// probe timeout is an ordinary attempt failure.
    async fn ping_node(&self, state: &mut RequestState, node: &Arc<Node>) -> Result<()> {
        let url = node.url().clone();
        let started = Instant::now();
        let probe = timeout(
            self.config.ping_timeout,
            self.connection.ping(url.clone(), &state.config),
        );
        let outcome = self.within_deadline(state, probe).await?;
        let mut envelope = match outcome {
            Ok(envelope) => envelope,
            Err(_) => {
                state.record_attempt(AttemptKind::Ping, url, None, false, started.elapsed());
                return Err(TransportError::Connection(format!(
                    "ping timed out after {:?}",
                    self.config.ping_timeout
                )));
            }
        };
        let status = envelope.status_code();
        let success = envelope.success;
        let error = envelope.error.take();
        drop(envelope);
        state.record_attempt(AttemptKind::Ping, url.clone(), status, success, started.elapsed());
        if success {
            debug!(target: "cluster_transport::transport", node = %url, "ping ok");
            return Ok(());
        }
        Err(error.unwrap_or_else(|| match status {
            Some(code) => TransportError::Connection(format!("ping returned status {code}")),
            None => TransportError::Connection("ping received no response".into()),
        }))
    }

    /// One wire attempt against a node, recorded in the audit trail.
    async fn dispatch(&self, state: &mut RequestState, node: &Node) -> Result<ResponseEnvelope> {
        let uri = match node.url().join(&state.path) {
            Ok(uri) => uri,
            Err(error) => {
                let fault = TransportError::Config(format!(
                    "invalid request path {:?}: {error}",
                    state.path
                ));
                return Ok(ResponseEnvelope::faulted(node.url().clone(), fault));
            }
        };
        let started = Instant::now();
        let envelope = self.within_deadline(state, self.send(uri.clone(), state)).await?;
        let accepted = done_processing(&envelope, &state.config);
        debug!(
            target: "cluster_transport::transport",
            verb = %state.verb,
            uri = %uri,
            status = ?envelope.status_code(),
            accepted,
            "dispatched"
        );
        state.record_attempt(
            AttemptKind::Request,
            node.url().clone(),
            envelope.status_code(),
            accepted,
            started.elapsed(),
        );
        Ok(envelope)
    }

    async fn send(&self, uri: Url, state: &RequestState) -> ResponseEnvelope {
        match state.verb {
            HttpVerb::Head => self.connection.head(uri, &state.config).await,
            HttpVerb::Get => self.connection.get(uri, &state.config).await,
            HttpVerb::Post => {
                let body = state.body.clone().unwrap_or_default();
                self.connection.post(uri, body, &state.config).await
            }
            HttpVerb::Put => {
                let body = state.body.clone().unwrap_or_default();
                self.connection.put(uri, body, &state.config).await
            }
            HttpVerb::Delete => match &state.body {
                Some(body) => {
                    self.connection
                        .delete_with_body(uri, body.clone(), &state.config)
                        .await
                }
                None => self.connection.delete(uri, &state.config).await,
            },
        }
    }

    /// Bookkeeping after a failed attempt: mark the node dead, refresh
    /// the topology when configured, and stop once the retry budget is
    /// spent.
    async fn prepare_retry(&self, state: &mut RequestState, node: &Node) -> Result<()> {
        self.pool
            .mark_dead(node, self.config.dead_timeout, self.config.max_dead_timeout);
        if self.config.sniff_on_connection_failure {
            self.sniff_best_effort().await;
        }
        let max_retries = self.pool.max_retries(&state.config);
        if state.retried >= max_retries {
            return Err(TransportError::RetriesExhausted {
                attempts: mem::take(&mut state.failures),
            });
        }
        state.retried += 1;
        Ok(())
    }

    /// Refresh the pool from the sniffer, keeping the current view on
    /// failure.
    async fn sniff_best_effort(&self) {
        let Some(sniffer) = &self.sniffer else {
            return;
        };
        match sniffer.sniff().await {
            Ok(urls) => {
                self.pool.replace_nodes(urls);
                self.pool.record_sniff();
                debug!(
                    target: "cluster_transport::transport",
                    nodes = self.pool.len(),
                    "refreshed node pool from sniff"
                );
            }
            Err(error) => {
                debug!(
                    target: "cluster_transport::transport",
                    %error,
                    "sniff failed; keeping current node view"
                );
            }
        }
    }

    /// Run a future under the call deadline; expiry is terminal.
    async fn within_deadline<F, T>(&self, state: &RequestState, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        match state.deadline {
            Some(deadline) => timeout_at(deadline, fut)
                .await
                .map_err(|_| TransportError::Timeout(state.timeout.unwrap_or_default())),
            None => Ok(fut.await),
        }
    }

    /// Buffer the body error path: extract a structured server error,
    /// throw it when the call asks for that, and otherwise surface it on
    /// the response with the buffered bytes.
    async fn resolve_error<T>(
        &self,
        state: RequestState,
        status: StatusCode,
        body: Option<BodyReader>,
    ) -> Result<CallResponse<T>> {
        let raw = self.within_deadline(&state, Self::buffer(body)).await??;
        let server_error = parse_server_error(Some(status), &raw);
        if state.config.throw_on_server_error {
            if let Some(error) = server_error {
                return Err(TransportError::Server(error));
            }
        }
        Ok(self.resolve(state, status, None, Some(raw), server_error))
    }

    async fn buffer(body: Option<BodyReader>) -> Result<Bytes> {
        match body {
            Some(mut stream) => Ok(Bytes::from(read_to_end(&mut stream).await?)),
            None => Ok(Bytes::new()),
        }
    }

    /// Build the caller-facing response, marking the answering node
    /// alive. Runs only when a response is actually handed back, so a
    /// thrown server error never revives the node.
    fn resolve<T>(
        &self,
        state: RequestState,
        status: StatusCode,
        body: Option<T>,
        raw: Option<Bytes>,
        server_error: Option<ServerError>,
    ) -> CallResponse<T> {
        if let Some(node) = &state.current_node {
            self.pool.mark_alive(node);
        }
        let success = is_valid(status, &state.config);
        CallResponse {
            verb: state.verb,
            path: state.path,
            node: state.current_node.as_ref().map(|n| n.url().clone()),
            status: Some(status.as_u16()),
            body,
            raw,
            server_error,
            success,
            success_or_known_error: success || !is_retryable(status),
            attempts: state.attempts,
        }
    }

    fn split_envelope(mut envelope: ResponseEnvelope) -> Result<(StatusCode, Option<BodyReader>)> {
        match envelope.status {
            Some(status) => Ok((status, envelope.body.take())),
            None => Err(envelope
                .error
                .take()
                .unwrap_or_else(|| TransportError::Connection("no response received".into()))),
        }
    }
}

impl<C, S> std::fmt::Debug for Transport<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("nodes", &self.pool.len())
            .field("sniffer", &self.sniffer.is_some())
            .field("config", &self.config)
            .finish()
    }
}

/// An attempt is accepted when it completed without a transport fault
/// and its status is either valid for the call or not worth retrying.
fn done_processing(envelope: &ResponseEnvelope, config: &RequestConfig) -> bool {
    if envelope.error.is_some() {
        return false;
    }
    match envelope.status {
        Some(status) => is_valid(status, config) || !is_retryable(status),
        None => false,
    }
}

/// The failure to record for a rejected attempt.
fn attempt_error(envelope: &mut ResponseEnvelope) -> TransportError {
    if let Some(error) = envelope.error.take() {
        return error;
    }
    match envelope.status {
        Some(status) => TransportError::Server(ServerError::from_status(status)),
        None => TransportError::Connection("no response received".into()),
    }
}
