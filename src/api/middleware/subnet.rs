//! Trusted-subnet check on the agent's reported address

use std::net::IpAddr;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use ip_network::IpNetwork;
use tracing::warn;

use crate::agent::transport::REAL_IP_HEADER;
use crate::api::{ApiError, ApiResult};

/// Reject requests whose `X-Real-IP` is missing, unparsable or outside
/// `subnet`
pub async fn trusted_subnet_middleware(
    State(subnet): State<IpNetwork>,
    request: Request,
    next: Next,
) -> ApiResult<Response> {
    let ip = request
        .headers()
        .get(REAL_IP_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<IpAddr>().ok());

    match ip {
        Some(ip) if subnet.contains(ip) => Ok(next.run(request).await),
        Some(ip) => {
            warn!("rejecting request from {ip}: outside trusted subnet {subnet}");
            Err(ApiError::Forbidden(format!("{ip} is not in the trusted subnet")))
        }
        None => Err(ApiError::Forbidden(format!(
            "missing or invalid {REAL_IP_HEADER} header"
        ))),
    }
}

/// Parse a CIDR; host bits below the prefix are ignored
pub fn parse_subnet(raw: &str) -> Result<IpNetwork, String> {
    IpNetwork::from_str_truncate(raw.trim()).map_err(|e| format!("invalid trusted subnet {raw:?}: {e}"))
}
