//! Turning store contents into delivery units
//!
//! An [`Envelope`] is one request's worth of metrics: the endpoint it goes
//! to, the body bytes exactly as they travel, and the headers that describe
//! them. The body is produced in a fixed order:
//!
//! 1. serialize (JSON) or encode into the path (plain text)
//! 2. seal with RSA-OAEP when a recipient key is configured
//! 3. sign the sealed, uncompressed bytes with HMAC-SHA-256
//! 4. gzip when compression is enabled
//!
//! A receiver undoes it in reverse: gunzip, verify, open, parse.

pub mod gzip;
pub mod seal;
pub mod sign;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::storage::Snapshot;
use crate::{Metric, MetricKind};

pub use seal::{PrivateKey, PublicKey, SealError};

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_TEXT: &str = "text/plain";

/// One request per cycle, or one request per metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    #[default]
    Batch,
    Single,
}

/// Encoding of single-metric requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    #[default]
    Json,
    Text,
}

impl fmt::Display for ContentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentFormat::Json => f.write_str("json"),
            ContentFormat::Text => f.write_str("text"),
        }
    }
}

/// Where an envelope is delivered
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    /// `POST /updates/` with a JSON array body
    Batch,
    /// `POST /update/` with one JSON metric body
    Single,
    /// `POST /update/{type}/{name}/{value}` with no body
    Text {
        kind: MetricKind,
        name: String,
        value: String,
    },
}

impl Endpoint {
    /// Path segments relative to the collector's base URL
    ///
    /// JSON endpoints end with an empty segment, giving the trailing slash
    /// the collector routes on.
    pub fn segments(&self) -> Vec<&str> {
        match self {
            Endpoint::Batch => vec!["updates", ""],
            Endpoint::Single => vec!["update", ""],
            Endpoint::Text { kind, name, value } => {
                vec!["update", kind.as_str(), name.as_str(), value.as_str()]
            }
        }
    }
}

/// A fully prepared delivery unit
#[derive(Debug, Clone)]
pub struct Envelope {
    pub endpoint: Endpoint,
    pub body: Vec<u8>,
    pub content_type: &'static str,
    /// `Some("gzip")` when the body is compressed
    pub content_encoding: Option<&'static str>,
    /// Hex `HashSHA256` header value
    pub signature: Option<String>,
    /// Number of metrics carried
    pub metric_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct EnvelopeConfig {
    pub mode: DeliveryMode,
    pub format: ContentFormat,
    pub compress: bool,
    /// Shared HMAC secret; empty means unsigned
    pub key: Option<String>,
    pub public_key: Option<PublicKey>,
}

#[derive(Debug)]
pub enum EnvelopeError {
    Serialize(serde_json::Error),
    Compress(std::io::Error),
    Seal(SealError),
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeError::Serialize(err) => write!(f, "failed to encode metrics: {}", err),
            EnvelopeError::Compress(err) => write!(f, "failed to compress body: {}", err),
            EnvelopeError::Seal(err) => write!(f, "failed to seal body: {}", err),
        }
    }
}

impl std::error::Error for EnvelopeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EnvelopeError::Serialize(err) => Some(err),
            EnvelopeError::Compress(err) => Some(err),
            EnvelopeError::Seal(err) => Some(err),
        }
    }
}

impl From<serde_json::Error> for EnvelopeError {
    fn from(err: serde_json::Error) -> Self {
        EnvelopeError::Serialize(err)
    }
}

impl From<SealError> for EnvelopeError {
    fn from(err: SealError) -> Self {
        EnvelopeError::Seal(err)
    }
}

#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    config: EnvelopeConfig,
}

impl EnvelopeBuilder {
    pub fn new(config: EnvelopeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EnvelopeConfig {
        &self.config
    }

    fn key(&self) -> Option<&str> {
        self.config.key.as_deref().filter(|key| !key.is_empty())
    }

    /// Envelopes for everything in `snapshot`
    ///
    /// Batch mode yields at most one envelope and always uses JSON. An empty
    /// snapshot yields none.
    pub fn build(&self, snapshot: &Snapshot) -> Result<Vec<Envelope>, EnvelopeError> {
        if snapshot.is_empty() {
            return Ok(Vec::new());
        }

        let metrics = snapshot.to_metrics();

        match (self.config.mode, self.config.format) {
            (DeliveryMode::Batch, _) => {
                let body = serde_json::to_vec(&metrics)?;
                Ok(vec![self.json_envelope(Endpoint::Batch, body, metrics.len())?])
            }
            (DeliveryMode::Single, ContentFormat::Json) => metrics
                .iter()
                .map(|metric| {
                    let body = serde_json::to_vec(metric)?;
                    self.json_envelope(Endpoint::Single, body, 1)
                })
                .collect(),
            (DeliveryMode::Single, ContentFormat::Text) => {
                Ok(metrics.iter().map(|metric| self.text_envelope(metric)).collect())
            }
        }
    }

    fn json_envelope(
        &self,
        endpoint: Endpoint,
        body: Vec<u8>,
        metric_count: usize,
    ) -> Result<Envelope, EnvelopeError> {
        let body = match &self.config.public_key {
            Some(public_key) => public_key.seal(&body)?,
            None => body,
        };

        let signature = self.key().map(|key| sign::sign(&body, key));

        let (body, content_encoding) = if self.config.compress {
            let compressed = gzip::compress(&body).map_err(EnvelopeError::Compress)?;
            (compressed, Some(gzip::ENCODING))
        } else {
            (body, None)
        };

        trace!(
            "built {:?} envelope: {} metrics, {} bytes",
            endpoint,
            metric_count,
            body.len()
        );

        Ok(Envelope {
            endpoint,
            body,
            content_type: CONTENT_TYPE_JSON,
            content_encoding,
            signature,
            metric_count,
        })
    }

    /// Plain-text envelopes carry no body, so nothing is sealed or
    /// compressed; the signature covers the empty body.
    fn text_envelope(&self, metric: &Metric) -> Envelope {
        Envelope {
            endpoint: Endpoint::Text {
                kind: metric.kind(),
                name: metric.id.clone(),
                value: metric.value.to_string(),
            },
            body: Vec::new(),
            content_type: CONTENT_TYPE_TEXT,
            content_encoding: None,
            signature: self.key().map(|key| sign::sign(&[], key)),
            metric_count: 1,
        }
    }
}
