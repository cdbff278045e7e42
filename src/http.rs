//! HTTP Handler Layer (C7): binds C1–C6 into the three REST endpoints
//! described in §4.7/§6.1 — `POST /v1/tokens`, `GET /v1/models`, and an
//! unauthenticated `GET /health`.

use std::sync::Arc;

use axum::extract::{FromRef, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, compression::CompressionLayer, trace::TraceLayer};

use crate::config::Config;
use crate::identity::Principal;
use crate::k8s::ControlPlane;
use crate::prober::ModelProber;
use crate::selector::LlmServiceSelector;
use crate::token::{Token, TokenIssuer, TokenRequestBody};
use crate::Result;

/// Shared application state threaded through every handler. Generic over
/// the orchestrator backend so the same router is exercised against a live
/// `KubeControlPlane` in production and a `FakeControlPlane` in tests
/// (SPEC_FULL.md §9's "tests should assert against the orchestrator's
/// state").
pub struct AppState<C: ControlPlane> {
    /// Resolved configuration, needed by the [`Principal`] extractor for
    /// header names and by handlers for the token audience.
    pub config: Config,
    /// Token Issuer (C2+C3+C4 composed).
    pub issuer: TokenIssuer<C>,
    /// LLM Service Selector (C5).
    pub selector: LlmServiceSelector<C>,
    /// Authorization-Gated Model Prober (C6).
    pub prober: ModelProber,
}

impl<C: ControlPlane> FromRef<Arc<AppState<C>>> for Config {
    fn from_ref(state: &Arc<AppState<C>>) -> Self {
        state.config.clone()
    }
}

/// Build the router: `/v1/tokens`, `/v1/models`, and `/health`. Identity
/// extraction (C1) happens per-handler via the `Principal` extractor rather
/// than a blanket middleware, so `/health` stays unauthenticated without an
/// explicit public-path allowlist (§4.7).
pub fn create_router<C: ControlPlane + 'static>(state: Arc<AppState<C>>) -> Router {
    Router::new()
        .route("/v1/tokens", post(issue_token::<C>))
        .route("/v1/models", get(list_models::<C>))
        .route("/health", get(health))
        .layer(CatchPanicLayer::new())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /health` — unauthenticated liveness (§4.7, §6.1).
async fn health() -> &'static str {
    "ok"
}

/// `POST /v1/tokens` (§6.1). Body may be empty or `{"expiration": ...}`.
async fn issue_token<C: ControlPlane>(
    State(state): State<Arc<AppState<C>>>,
    principal: Principal,
    body: Option<Json<TokenRequestBody>>,
) -> Result<(StatusCode, Json<Token>)> {
    let requested = body.and_then(|Json(b)| b.expiration);
    let token = state.issuer.issue(&principal, requested).await?;
    Ok((StatusCode::CREATED, Json(token)))
}

/// `GET /v1/models` (§6.1). Candidates are selected (C5), then probed in
/// parallel with the caller's own token (C6); the response contains exactly
/// the subset the caller is authorized to see.
async fn list_models<C: ControlPlane>(
    State(state): State<Arc<AppState<C>>>,
    principal: Principal,
) -> Result<Json<serde_json::Value>> {
    // Mint the same tier-scoped, audience-bound SA token C4 would issue via
    // `POST /v1/tokens` — the probe must carry the caller's actual RBAC
    // authority, not merely their identity headers (§4.6, §3.2).
    let token = state.issuer.issue(&principal, None).await?;

    let candidates = state.selector.candidates().await?;
    let models = state.prober.authorized_models(candidates, &token.token).await;

    Ok(Json(json!({
        "object": "list",
        "data": models,
    })))
}
