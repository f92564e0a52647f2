//! Health check endpoint

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::api::{ApiError, ApiResult, ApiState};

/// GET /ping
///
/// 200 with backend metadata when the store is reachable, 500 otherwise
pub async fn ping(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    let health = state.storage.health_check().await?;

    if !health.healthy {
        return Err(ApiError::StorageError(health.message));
    }

    Ok(Json(json!({
        "status": "ok",
        "message": health.message,
        "backend": health.metadata,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}
