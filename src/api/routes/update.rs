//! Metric ingestion endpoints

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::api::{ApiError, ApiResult, ApiState};
use crate::storage::{StorageBackend, StorageResult};
use crate::{Metric, MetricKind, MetricValue};

/// Apply one metric and return it as stored (counters carry the new total)
pub(crate) async fn apply(storage: &dyn StorageBackend, metric: Metric) -> StorageResult<Metric> {
    match metric.value {
        MetricValue::Gauge(value) => {
            storage.update_gauge(&metric.id, value).await?;
            Ok(metric)
        }
        MetricValue::Counter(delta) => {
            let total = storage.add_counter(&metric.id, delta).await?;
            Ok(Metric::counter(metric.id, total))
        }
    }
}

/// POST /update/:type/:name/:value
#[instrument(skip_all)]
pub async fn update_text(
    State(state): State<ApiState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    if name.is_empty() {
        return Err(ApiError::NotFound("metric name is missing".to_string()));
    }
    let kind: MetricKind = kind.parse()?;
    let value = MetricValue::parse(kind, &value)?;

    let stored = apply(state.storage.as_ref(), Metric { id: name, value }).await?;
    debug!("{} {} = {}", stored.kind(), stored.id, stored.value);

    Ok(StatusCode::OK)
}

/// POST /update/
///
/// Body is one wire metric; the response is the metric as stored.
#[instrument(skip_all)]
pub async fn update_json(State(state): State<ApiState>, body: Bytes) -> ApiResult<Json<Metric>> {
    let body = state.open(&body)?;
    let metric: Metric = serde_json::from_slice(&body)?;

    let stored = apply(state.storage.as_ref(), metric).await?;
    debug!("{} {} = {}", stored.kind(), stored.id, stored.value);

    Ok(Json(stored))
}

/// POST /updates/
///
/// Body is a JSON array of wire metrics, applied through the backend's
/// batch contract.
#[instrument(skip_all)]
pub async fn update_batch(State(state): State<ApiState>, body: Bytes) -> ApiResult<Json<Value>> {
    let body = state.open(&body)?;
    let metrics: Vec<Metric> = serde_json::from_slice(&body)?;
    let count = metrics.len();

    state.storage.insert_batch(metrics).await?;
    debug!("applied batch of {count} metrics");

    Ok(Json(json!({ "updated": count })))
}
