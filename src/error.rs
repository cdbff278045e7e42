//! Error types for the MaaS control-plane API.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable `AUTH_FAILURE` reference codes surfaced in §4.1 of the spec.
pub mod auth_failure {
    /// Missing or empty username header.
    pub const MISSING_USERNAME: &str = "001";
    /// Missing groups header.
    pub const MISSING_GROUPS: &str = "002";
    /// Groups header present but not valid JSON.
    pub const INVALID_GROUPS: &str = "003";
}

/// Control-plane errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration failed to load or validate.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Identity headers missing or malformed (C1). Carries the stable
    /// `AUTH_FAILURE/00N` reference code.
    #[error("auth misconfigured: {0}")]
    AuthFailure(&'static str),

    /// No tier's group set intersects the caller's groups (C2).
    #[error("no tier matches groups {groups:?}")]
    GroupNotFound {
        /// The caller's full group list, for diagnostics.
        groups: Vec<String>,
    },

    /// The tier document failed to parse or violated an invariant (C2).
    #[error("failed to load tier configuration: {0}")]
    TierConfig(String),

    /// Requested token expiration was invalid (§6.2).
    #[error("{message}")]
    InvalidDuration {
        /// User-facing message, matching the exact wording in §6.2.
        message: String,
        /// The raw value the caller provided, echoed back in the response.
        provided: Option<String>,
    },

    /// Requested duration parsed but fell below the 10 minute floor.
    #[error("token expiration must be at least 10 minutes")]
    DurationTooShort {
        /// The raw value the caller provided, echoed back in the response.
        provided: String,
    },

    /// Username sanitized to an empty DNS-1123 label.
    #[error("username {0:?} sanitizes to an empty label")]
    InvalidUsername(String),

    /// Underlying Kubernetes API call failed.
    #[error("orchestrator error: {0}")]
    Orchestrator(String),

    /// The minted token was missing a required claim.
    #[error("token missing required claim: {0}")]
    TokenClaims(&'static str),

    /// A probe response exceeded the body size ceiling (§4.6).
    #[error("probe response exceeded {0} bytes")]
    ProbeBodyTooLarge(usize),

    /// HTTP client error while probing the data plane.
    #[error("probe request failed: {0}")]
    Probe(#[from] reqwest::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for unexpected internal failures.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to the HTTP status/body shape described in spec §6/§7.
    fn to_status_and_body(&self) -> (StatusCode, serde_json::Value) {
        match self {
            Self::AuthFailure(ref_id) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": "Exception thrown while generating token",
                    "exceptionCode": "AUTH_FAILURE",
                    "refId": ref_id,
                }),
            ),
            Self::InvalidDuration { message, provided } => {
                let mut body = json!({ "error": message });
                if let Some(raw) = provided {
                    body["provided_expiration"] = json!(raw);
                }
                (StatusCode::BAD_REQUEST, body)
            }
            Self::DurationTooShort { provided } => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "token expiration must be at least 10 minutes",
                    "provided_expiration": provided,
                }),
            ),
            Self::GroupNotFound { .. } | Self::TierConfig(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "failed to load tier configuration" }),
            ),
            Self::Config(_)
            | Self::Orchestrator(_)
            | Self::TokenClaims(_)
            | Self::InvalidUsername(_)
            | Self::Internal(_)
            | Self::ProbeBodyTooLarge(_)
            | Self::Probe(_)
            | Self::Json(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Exception thrown while generating token" }),
            ),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "request failed");
        let (status, body) = self.to_status_and_body();
        (status, Json(body)).into_response()
    }
}
