//! Delivery of envelopes to the collector
//!
//! [`Transport`] is the seam between the dispatcher and the wire. The only
//! implementation here is [`HttpTransport`], a reqwest client speaking the
//! collector's REST routes.

use std::fmt;
use std::net::{IpAddr, UdpSocket};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use tracing::{debug, trace};

use crate::envelope::{Endpoint, Envelope, sign};

/// Header carrying the agent's outbound address
pub const REAL_IP_HEADER: &str = "X-Real-IP";

#[derive(Debug)]
pub enum TransportError {
    /// The collector address cannot be turned into a URL
    InvalidAddress(String),

    /// Connection refused, reset, timed out, ...
    Connection(String),

    /// The collector answered with a non-success status
    Status { status: u16, body: String },
}

impl TransportError {
    /// Whether another attempt may succeed
    ///
    /// Network failures and every non-2xx answer are retried; an address
    /// that does not parse never will.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::InvalidAddress(_))
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::InvalidAddress(msg) => write!(f, "invalid collector address: {}", msg),
            TransportError::Connection(msg) => write!(f, "request failed: {}", msg),
            TransportError::Status { status, body } => {
                write!(f, "collector responded with {}: {}", status, body.trim())
            }
        }
    }
}

impl std::error::Error for TransportError {}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Connection(err.to_string())
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, envelope: &Envelope) -> Result<(), TransportError>;
}

/// REST transport
pub struct HttpTransport {
    client: reqwest::Client,
    base: Url,
    real_ip: Option<IpAddr>,
}

impl HttpTransport {
    /// Client for the collector at `address` (`host:port` or a full URL)
    ///
    /// Every request is bounded by `timeout`.
    pub fn new(address: &str, timeout: Duration) -> Result<Self, TransportError> {
        let base = base_url(address)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::InvalidAddress(e.to_string()))?;

        let real_ip = outbound_ip(&base);
        debug!("collector at {base}, outbound address {:?}", real_ip);

        Ok(Self {
            client,
            base,
            real_ip,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn url_for(&self, endpoint: &Endpoint) -> Result<Url, TransportError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::InvalidAddress(self.base.to_string()))?
            .pop_if_empty()
            .extend(endpoint.segments());
        Ok(url)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let url = self.url_for(&envelope.endpoint)?;

        let mut request = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, envelope.content_type)
            .body(envelope.body.clone());

        if let Some(encoding) = envelope.content_encoding {
            request = request.header(CONTENT_ENCODING, encoding);
        }
        if let Some(signature) = &envelope.signature {
            request = request.header(sign::HEADER, signature);
        }
        if let Some(ip) = self.real_ip {
            request = request.header(REAL_IP_HEADER, ip.to_string());
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        trace!("delivered {} metrics to {url}", envelope.metric_count);
        Ok(())
    }
}

fn base_url(address: &str) -> Result<Url, TransportError> {
    let raw = if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{address}/")
    };

    let url = Url::parse(&raw).map_err(|e| TransportError::InvalidAddress(format!("{address}: {e}")))?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(TransportError::InvalidAddress(address.to_string()));
    }
    Ok(url)
}

/// Local address the OS would use to reach the collector
///
/// Connecting a UDP socket sends nothing; it only selects a route.
fn outbound_ip(base: &Url) -> Option<IpAddr> {
    let host = base.host_str()?;
    let port = base.port_or_known_default()?;

    let socket = UdpSocket::bind(("0.0.0.0", 0)).ok()?;
    socket.connect((host, port)).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}
