use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Redirect,
    Json,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, error, info, warn};

use tunneld_registry::TunnelOptions;

use crate::models::*;
use crate::{AppState, DEFAULT_SERVER_TOKEN};

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message)))
}

/// Constant-time shared-token check; gates all mutating endpoints.
fn token_matches(expected: &str, presented: &str) -> bool {
    bool::from(expected.as_bytes().ct_eq(presented.as_bytes()))
}

/// Redirect to the landing page
pub async fn landing(State(state): State<Arc<AppState>>) -> Redirect {
    Redirect::temporary(&state.landing_page)
}

/// Control-plane status
#[utoipa::path(
    get,
    path = "/status",
    responses(
        (status = 200, description = "Tunnel count and process status", body = StatusResponse)
    ),
    tag = "status"
)]
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        tunnels: state.registry.count().await,
        uptime_secs: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Status of one live tunnel
#[utoipa::path(
    get,
    path = "/status/{internet_port}",
    params(
        ("internet_port" = u16, Path, description = "Public port of the tunnel")
    ),
    responses(
        (status = 200, description = "Port pair and creation time", body = TunnelStatusResponse),
        (status = 400, description = "Tunnel not found", body = ErrorResponse)
    ),
    tag = "status"
)]
pub async fn tunnel_status(
    State(state): State<Arc<AppState>>,
    Path(internet_port): Path<u16>,
) -> Result<Json<TunnelStatusResponse>, ApiError> {
    debug!(internet_port, "tunnel status requested");

    let (internet_port, relay_port, created_at) = state
        .registry
        .status(internet_port)
        .await
        .ok_or_else(|| bad_request("Tunnel not found"))?;

    Ok(Json(TunnelStatusResponse {
        internet_port,
        relay_port,
        created_at,
    }))
}

/// Create a tunnel
#[utoipa::path(
    post,
    path = "/create",
    request_body = CreateTunnelRequest,
    responses(
        (status = 200, description = "Tunnel created; response includes the one-time secret", body = CreateTunnelResponse),
        (status = 400, description = "Invalid token or creation failure", body = ErrorResponse)
    ),
    tag = "tunnels"
)]
pub async fn create_tunnel(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTunnelRequest>,
) -> Result<Json<CreateTunnelResponse>, ApiError> {
    if !token_matches(&state.server_token, &req.server_token) {
        info!("create rejected: invalid serverToken");
        return Err(bad_request("Invalid serverToken"));
    }

    let opts = if req.ssl {
        if state.cert_provider.is_self_signed() {
            warn!("client requested SSL but only self-signed certs are available");
        }
        // Failure detail stays in operator logs; the client sees a generic
        // creation failure.
        let materials = state.cert_provider.resolve().map_err(|e| {
            error!(error = %e, "TLS materials lookup failed");
            bad_request("Tunnel creation failed")
        })?;
        TunnelOptions {
            ssl: true,
            tls: Some(materials),
        }
    } else {
        TunnelOptions::default()
    };

    match state
        .registry
        .new_tunnel(req.internet_port, req.relay_port, opts)
        .await
    {
        Ok(tunnel) => {
            let uri = if tunnel.ssl_enabled {
                format!("https://{}:{}", state.domain, tunnel.internet_port)
            } else {
                format!("{}:{}", state.domain, tunnel.internet_port)
            };
            Ok(Json(CreateTunnelResponse {
                success: true,
                created_at: tunnel.created_at,
                relay_port: tunnel.relay_port,
                internet_port: tunnel.internet_port,
                secret: tunnel.secret,
                uri,
                expires_in: state.registry.max_age_secs(),
                ssl: tunnel.ssl_enabled.then_some(true),
                server_banner: default_token_banner(&state.server_token, &state.landing_page),
            }))
        }
        Err(e) => {
            error!(error = %e, "tunnel creation failed");
            Err(bad_request("Tunnel creation failed"))
        }
    }
}

/// Delete a tunnel
#[utoipa::path(
    post,
    path = "/delete",
    request_body = DeleteTunnelRequest,
    responses(
        (status = 200, description = "Delete result; success is false when nothing matched", body = DeleteTunnelResponse),
        (status = 400, description = "Invalid token", body = ErrorResponse)
    ),
    tag = "tunnels"
)]
pub async fn delete_tunnel(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeleteTunnelRequest>,
) -> Result<Json<DeleteTunnelResponse>, ApiError> {
    if !token_matches(&state.server_token, &req.server_token) {
        info!("delete rejected: invalid serverToken");
        return Err(bad_request("Invalid serverToken"));
    }

    let success = state.registry.remove(req.internet_port, &req.secret).await;
    let message = if success {
        "Tunnel removed".to_string()
    } else {
        "No matching tunnel".to_string()
    };

    Ok(Json(DeleteTunnelResponse { success, message }))
}

/// Nag banner returned on create while the deployment still runs the
/// default shared token.
fn default_token_banner(server_token: &str, landing_page: &str) -> Option<String> {
    (server_token == DEFAULT_SERVER_TOKEN).then(|| {
        format!(
            "You're using the default token. Change it for security reasons.\nContributions welcome: {landing_page}"
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_matches() {
        assert!(token_matches("T", "T"));
        assert!(!token_matches("T", "t"));
        assert!(!token_matches("T", ""));
        assert!(!token_matches("T", "TT"));
    }

    #[test]
    fn test_default_token_banner() {
        assert!(default_token_banner(DEFAULT_SERVER_TOKEN, "https://example.com").is_some());
        assert!(default_token_banner("a-real-token", "https://example.com").is_none());
    }
}
