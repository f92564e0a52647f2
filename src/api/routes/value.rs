//! Metric lookup endpoints

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
};

use crate::api::{ApiError, ApiResult, ApiState};
use crate::storage::StorageBackend;
use crate::{Metric, MetricKind, MetricQuery};

async fn lookup(storage: &dyn StorageBackend, kind: MetricKind, name: &str) -> ApiResult<Metric> {
    let metric = match kind {
        MetricKind::Gauge => storage
            .get_gauge(name)
            .await?
            .map(|value| Metric::gauge(name, value)),
        MetricKind::Counter => storage
            .get_counter(name)
            .await?
            .map(|delta| Metric::counter(name, delta)),
    };

    metric.ok_or_else(|| ApiError::NotFound(format!("{kind} {name} not found")))
}

/// GET /value/:type/:name
///
/// Plain-text value of a single metric.
pub async fn value_text(
    State(state): State<ApiState>,
    Path((kind, name)): Path<(String, String)>,
) -> ApiResult<String> {
    let kind: MetricKind = kind.parse()?;
    let metric = lookup(state.storage.as_ref(), kind, &name).await?;
    Ok(metric.value.to_string())
}

/// POST /value/
///
/// Body `{"id", "type"}`; responds with the full wire metric.
pub async fn value_json(State(state): State<ApiState>, body: Bytes) -> ApiResult<Json<Metric>> {
    let query: MetricQuery = serde_json::from_slice(&body)?;
    let kind: MetricKind = query.kind.parse()?;
    Ok(Json(lookup(state.storage.as_ref(), kind, &query.id).await?))
}
