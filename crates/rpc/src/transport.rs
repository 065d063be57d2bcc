//! HTTP transport for RPC envelopes.
//!
//! The [`Transport`] trait is the seam between the session logic and the
//! network: [`HttpTransport`] posts JSON envelopes with [`reqwest`], while
//! tests plug in a scripted in-memory device.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use camview_core::device::DeviceIdentity;

use crate::codec::{decode_response, Endpoint, Request, Response};
use crate::error::TransportError;

/// Sends one request envelope and returns the decoded response envelope.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, endpoint: Endpoint, request: &Request) -> Result<Response, TransportError>;
}

/// Builds the transport for a device. Used by the connection cache.
pub trait Connector: Send + Sync {
    fn connect(&self, identity: &DeviceIdentity) -> Arc<dyn Transport>;
}

/// JSON-over-HTTP transport for a single device.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport with its own connection pool.
    ///
    /// * `base_url` - e.g. `http://192.168.1.108`.
    /// * `timeout`  - bound on each request, connect included.
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TransportError::from)?;
        Ok(Self { client, base_url })
    }

    /// Create a transport reusing an existing [`reqwest::Client`]
    /// (connection pooling across devices).
    pub fn with_client(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        endpoint: Endpoint,
        request: &Request,
    ) -> Result<Response, TransportError> {
        let url = format!("{}{}", self.base_url, endpoint.path());

        let response = self.client.post(&url).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        decode_response(&body).map_err(|e| TransportError::Body(e.to_string()))
    }
}

/// [`Connector`] producing [`HttpTransport`]s that share one pooled client.
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TransportError::from)?;
        Ok(Self { client })
    }
}

impl Connector for HttpConnector {
    fn connect(&self, identity: &DeviceIdentity) -> Arc<dyn Transport> {
        Arc::new(HttpTransport::with_client(
            self.client.clone(),
            identity.base_url(),
        ))
    }
}
