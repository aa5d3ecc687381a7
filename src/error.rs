//! Typed error hierarchy for the gateway.
//!
//! Every fallible operation inside the registries, the transport pool, and
//! the container adapter returns [`GatewayError`]. `main` and other startup
//! wiring keep using `anyhow::Result` as the teacher crate does; library
//! code never does.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("malformed frame: {0}")]
    InvalidFrame(String),

    #[error("unknown session")]
    UnknownSession,

    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("no container runtime available on this host")]
    NoRuntime,

    #[error("failed to pull image {image}: {reason}")]
    PullFailed { image: String, reason: String },

    #[error("failed to create container: {0}")]
    CreateFailed(String),

    #[error("failed to stop container: {0}")]
    StopFailed(String),

    #[error("host unreachable: {0}")]
    UnreachableHost(String),

    #[error("authentication failed")]
    AuthFailed,

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("failed to open remote shell: {0}")]
    RemoteOpenFailed(String),

    #[error("failed to persist state: {0}")]
    PersistFailed(String),
}

impl GatewayError {
    /// Human-readable message safe to echo back on the wire or to a peer.
    /// Never includes credential material; every variant above is built from
    /// data that has already been stripped of secrets by its caller.
    pub fn wire_message(&self) -> String {
        self.to_string()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::UnknownSession => StatusCode::NOT_FOUND,
            Self::InvalidFrame(_) => StatusCode::BAD_REQUEST,
            Self::PersistFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NoRuntime
            | Self::PullFailed { .. }
            | Self::CreateFailed(_)
            | Self::StopFailed(_)
            | Self::UnreachableHost(_)
            | Self::AuthFailed
            | Self::TransportError(_)
            | Self::RemoteOpenFailed(_)
            | Self::SpawnFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = ErrorBody {
            error: self.wire_message(),
        };

        (status, axum::Json(body)).into_response()
    }
}
