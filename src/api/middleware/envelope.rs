//! Inbound envelope unwrapping and response signing
//!
//! Requests: a gzip `Content-Encoding` is undone, then the `HashSHA256`
//! header (when present and a key is configured) is checked against the
//! decompressed body. Responses: the body is signed with the same key.
//! Compression of responses is left to the outer `CompressionLayer`, so the
//! signature always covers the uncompressed bytes.

use axum::{
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{
        HeaderName, HeaderValue,
        header::{CONTENT_ENCODING, CONTENT_LENGTH},
    },
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use crate::api::{ApiError, ApiResult, ApiState};
use crate::envelope::{gzip, sign};

/// Upper bound on a request body, both before and after decompression
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

static HASH_HEADER: HeaderName = HeaderName::from_static("hashsha256");

pub async fn envelope_middleware(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> ApiResult<Response> {
    let (mut parts, body) = request.into_parts();
    let mut bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::InvalidRequest(format!("failed to read body: {e}")))?
        .to_vec();

    let gzipped = parts
        .headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case(gzip::ENCODING));

    if gzipped {
        bytes = gzip::decompress_limited(&bytes, MAX_BODY_BYTES)
            .map_err(|e| ApiError::InvalidRequest(format!("invalid gzip body: {e}")))?;
        parts.headers.remove(CONTENT_ENCODING);
        parts.headers.remove(CONTENT_LENGTH);
        debug!("decompressed request body to {} bytes", bytes.len());
    }

    if let Some(key) = state.key()
        && let Some(digest) = parts.headers.get(&HASH_HEADER)
    {
        let digest = digest.to_str().unwrap_or_default();
        if !sign::verify(&bytes, key, digest) {
            warn!("rejecting request to {}: hash mismatch", parts.uri.path());
            return Err(ApiError::InvalidRequest("hash mismatch".to_string()));
        }
    }

    let response = next.run(Request::from_parts(parts, Body::from(bytes))).await;

    match state.key() {
        Some(key) => sign_response(response, key).await,
        None => Ok(response),
    }
}

async fn sign_response(response: Response, key: &str) -> ApiResult<Response> {
    let (mut parts, body) = response.into_parts();
    let bytes = to_bytes(body, usize::MAX)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to buffer response: {e}")))?;

    let digest = HeaderValue::from_str(&sign::sign(&bytes, key))
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    parts.headers.insert(HASH_HEADER.clone(), digest);

    Ok(Response::from_parts(parts, Body::from(bytes)))
}
