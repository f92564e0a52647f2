//! Ingestion HTTP API of the collector
//!
//! ## Architecture
//!
//! - **Axum** router over a shared [`ApiState`] holding a `dyn StorageBackend`
//! - **Tower middleware**: request tracing, response gzip, trusted-subnet
//!   check, envelope unwrapping (gunzip + `HashSHA256`)
//!
//! ## Endpoints
//!
//! - `POST /update/:type/:name/:value` - Plain-text update
//! - `POST /update/` - JSON update of one metric
//! - `POST /updates/` - JSON batch update
//! - `GET /value/:type/:name` - Plain-text value
//! - `POST /value/` - JSON value lookup
//! - `GET /` - HTML list of all metrics
//! - `GET /ping` - Storage health

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;

use std::net::SocketAddr;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "localhost:8080", "127.0.0.1:0")
    pub bind_addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "localhost:8080".to_string(),
        }
    }
}

/// Build the router with every route and middleware layer
pub fn router(state: ApiState) -> Router {
    let mut app = Router::new()
        .route("/", get(routes::list::list_metrics))
        .route("/ping", get(routes::health::ping))
        .route("/update/", post(routes::update::update_json))
        .route("/update/:type/:name/:value", post(routes::update::update_text))
        .route("/updates/", post(routes::update::update_batch))
        .route("/value/", post(routes::value::value_json))
        .route("/value/:type/:name", get(routes::value::value_text))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::envelope::envelope_middleware,
        ));

    if let Some(subnet) = state.trusted_subnet {
        app = app.layer(axum::middleware::from_fn_with_state(
            subnet,
            middleware::subnet::trusted_subnet_middleware,
        ));
    }

    app.with_state(state)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Spawn the API server
///
/// The server runs in a background task until `cancel` fires, then drains
/// in-flight requests. Returns the bound address and the task handle.
pub async fn spawn_api_server(
    config: ApiConfig,
    state: ApiState,
    cancel: CancellationToken,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    let handle = tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("API server error: {}", e);
        }
        info!("API server stopped");
    });

    Ok((addr, handle))
}
