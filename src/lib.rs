pub mod agent;
pub mod api;
pub mod config;
pub mod envelope;
pub mod storage;
pub mod util;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The two update semantics a metric can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Latest value replaces the previous one
    Gauge,
    /// Reported deltas are summed
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            other => Err(MetricError::UnknownKind(other.to_string())),
        }
    }
}

/// Payload of a metric; the variant decides the kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }

    /// Parse the plain-text representation used in update paths.
    pub fn parse(kind: MetricKind, raw: &str) -> Result<Self, MetricError> {
        match kind {
            MetricKind::Gauge => {
                let value: f64 = raw
                    .parse()
                    .map_err(|_| MetricError::InvalidValue(raw.to_string()))?;
                if !value.is_finite() {
                    return Err(MetricError::InvalidValue(raw.to_string()));
                }
                Ok(MetricValue::Gauge(value))
            }
            MetricKind::Counter => raw
                .parse()
                .map(MetricValue::Counter)
                .map_err(|_| MetricError::InvalidValue(raw.to_string())),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Gauge(value) => write!(f, "{value}"),
            MetricValue::Counter(delta) => write!(f, "{delta}"),
        }
    }
}

/// A single named metric as it travels on the wire.
///
/// Serializes to `{"id", "type", "value"}` for gauges and
/// `{"id", "type", "delta"}` for counters; exactly one payload field is
/// ever present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireMetric", into = "WireMetric")]
pub struct Metric {
    pub id: String,
    pub value: MetricValue,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Gauge(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Counter(delta),
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMetric {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<f64>,
}

impl From<Metric> for WireMetric {
    fn from(metric: Metric) -> Self {
        let (delta, value) = match metric.value {
            MetricValue::Gauge(value) => (None, Some(value)),
            MetricValue::Counter(delta) => (Some(delta), None),
        };

        Self {
            id: metric.id,
            kind: metric.value.kind().to_string(),
            delta,
            value,
        }
    }
}

impl TryFrom<WireMetric> for Metric {
    type Error = MetricError;

    fn try_from(wire: WireMetric) -> Result<Self, Self::Error> {
        if wire.id.is_empty() {
            return Err(MetricError::MissingId);
        }

        let kind: MetricKind = wire.kind.parse()?;
        let value = match (kind, wire.value, wire.delta) {
            (_, Some(_), Some(_)) => return Err(MetricError::AmbiguousPayload(wire.id)),
            (MetricKind::Gauge, Some(value), None) if value.is_finite() => {
                MetricValue::Gauge(value)
            }
            (MetricKind::Gauge, Some(value), None) => {
                return Err(MetricError::InvalidValue(value.to_string()));
            }
            (MetricKind::Counter, None, Some(delta)) => MetricValue::Counter(delta),
            (kind, _, _) => return Err(MetricError::MissingPayload { id: wire.id, kind }),
        };

        Ok(Metric { id: wire.id, value })
    }
}

/// Body of a JSON value lookup (`POST /value/`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricQuery {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Errors raised while interpreting metrics from the wire
#[derive(Debug, Clone, PartialEq)]
pub enum MetricError {
    /// The `type` field is neither `gauge` nor `counter`
    UnknownKind(String),

    /// The payload field required by the kind is absent
    MissingPayload { id: String, kind: MetricKind },

    /// Both `value` and `delta` were supplied
    AmbiguousPayload(String),

    /// The metric has an empty identifier
    MissingId,

    /// A plain-text value could not be parsed for its kind
    InvalidValue(String),
}

impl fmt::Display for MetricError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricError::UnknownKind(kind) => write!(f, "unsupported metric type: {kind}"),
            MetricError::MissingPayload { id, kind: MetricKind::Gauge } => {
                write!(f, "value is missing for gauge {id}")
            }
            MetricError::MissingPayload { id, kind: MetricKind::Counter } => {
                write!(f, "delta is missing for counter {id}")
            }
            MetricError::AmbiguousPayload(id) => {
                write!(f, "metric {id} carries both value and delta")
            }
            MetricError::MissingId => write!(f, "metric id is empty"),
            MetricError::InvalidValue(raw) => write!(f, "invalid metric value: {raw}"),
        }
    }
}

impl std::error::Error for MetricError {}
