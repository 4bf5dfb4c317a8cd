//! Wire models for the control API
//!
//! Field names are camelCase on the wire to match the protocol tunnel
//! clients already speak.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Request to create a new tunnel
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateTunnelRequest {
    /// Desired public port; 0 or absent means "any free port in range"
    #[serde(default)]
    pub internet_port: u16,
    /// Desired relay-side port; 0 or absent means "any free port in range"
    #[serde(default)]
    pub relay_port: u16,
    /// Deployment-wide shared token
    pub server_token: String,
    /// Provision the public listener with TLS materials
    #[serde(default)]
    pub ssl: bool,
}

/// Successful tunnel creation, including the one-time per-tunnel secret
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateTunnelResponse {
    pub success: bool,
    pub created_at: DateTime<Utc>,
    pub relay_port: u16,
    pub internet_port: u16,
    /// Required to delete this tunnel; returned only here
    pub secret: String,
    /// Connection URI; scheme depends on the ssl flag
    pub uri: String,
    /// Seconds until the expiration sweep may remove this tunnel
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_banner: Option<String>,
}

/// Request to delete a tunnel
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteTunnelRequest {
    pub internet_port: u16,
    /// Per-tunnel secret returned at creation
    pub secret: String,
    pub server_token: String,
}

/// Result of a delete; `success: false` is a normal "nothing matched"
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteTunnelResponse {
    pub success: bool,
    pub message: String,
}

/// Control-plane status
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// Number of live tunnels
    pub tunnels: usize,
    pub uptime_secs: u64,
    pub version: String,
}

/// Status of one live tunnel
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TunnelStatusResponse {
    pub internet_port: u16,
    pub relay_port: u16,
    pub created_at: DateTime<Utc>,
}

/// Error body; mirrors the `{success, message}` shape clients expect
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
