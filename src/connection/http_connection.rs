// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

use bytes::Bytes;
use futures::TryStreamExt;
use tokio_util::io::StreamReader;
use url::Url;

use crate::config::RequestConfig;
use crate::error::{Result, TransportError};

use super::{BodyReader, Connection, ResponseEnvelope};

/// Configuration for the reqwest-backed connection.
#[derive(Debug, Clone)]
pub struct HttpConnectionConfig {
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Skip TLS certificate verification (insecure).
    pub insecure: bool,
}

impl Default for HttpConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            insecure: false,
        }
    }
}

impl HttpConnectionConfig {
    /// Create a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the TCP connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Skip TLS verification (insecure).
    #[must_use]
    pub fn insecure(mut self) -> Self {
        self.insecure = true;
        self
    }
}

/// Default [`Connection`] implementation over a shared reqwest client.
///
/// Response bodies are surfaced as live streams; nothing is buffered here.
#[derive(Debug, Clone)]
pub struct HttpConnection {
    client: reqwest::Client,
}

impl HttpConnection {
    /// Create a connection with default settings.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the underlying client cannot be
    /// built.
    pub fn new() -> Result<Self> {
        Self::with_config(HttpConnectionConfig::default())
    }

    /// Create a connection with the given settings.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the underlying client cannot be
    /// built.
    pub fn with_config(config: HttpConnectionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .danger_accept_invalid_certs(config.insecure)
            .build()
            .map_err(|e| TransportError::Config(e.to_string()))?;
        Ok(Self { client })
    }

    async fn execute(
        &self,
        method: reqwest::Method,
        uri: Url,
        body: Option<Bytes>,
        config: &RequestConfig,
    ) -> ResponseEnvelope {
        let mut request = self.client.request(method, uri.clone());
        if let Some(body) = body {
            request = request.body(body);
        }
        if let Some(timeout) = config.timeout {
            request = request.timeout(timeout);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                let body = if response.content_length() == Some(0) {
                    None
                } else {
                    let stream = response.bytes_stream().map_err(std::io::Error::other);
                    Some(Box::pin(StreamReader::new(stream)) as BodyReader)
                };
                ResponseEnvelope::received(uri, status, body)
            }
            Err(error) => {
                ResponseEnvelope::faulted(uri, TransportError::Connection(error.to_string()))
            }
        }
    }
}

#[async_trait::async_trait]
impl Connection for HttpConnection {
    async fn head(&self, uri: Url, config: &RequestConfig) -> ResponseEnvelope {
        self.execute(reqwest::Method::HEAD, uri, None, config).await
    }

    async fn get(&self, uri: Url, config: &RequestConfig) -> ResponseEnvelope {
        self.execute(reqwest::Method::GET, uri, None, config).await
    }

    async fn post(&self, uri: Url, body: Bytes, config: &RequestConfig) -> ResponseEnvelope {
        self.execute(reqwest::Method::POST, uri, Some(body), config)
            .await
    }

    async fn put(&self, uri: Url, body: Bytes, config: &RequestConfig) -> ResponseEnvelope {
        self.execute(reqwest::Method::PUT, uri, Some(body), config)
            .await
    }

    async fn delete(&self, uri: Url, config: &RequestConfig) -> ResponseEnvelope {
        self.execute(reqwest::Method::DELETE, uri, None, config)
            .await
    }

    async fn delete_with_body(
        &self,
        uri: Url,
        body: Bytes,
        config: &RequestConfig,
    ) -> ResponseEnvelope {
        self.execute(reqwest::Method::DELETE, uri, Some(body), config)
            .await
    }
}
