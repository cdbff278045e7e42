//! MaaS control-plane API
//!
//! The authentication, authorization, and model-discovery service that
//! fronts a multi-tenant Model-as-a-Service platform: it resolves an
//! authenticated caller to a subscription tier, mints ephemeral
//! namespace-scoped Service Account tokens, and performs
//! authorization-gated discovery of the LLM inference services that
//! caller may actually invoke.
//!
//! # Components
//!
//! - [`identity`] — Identity Extractor (C1): gateway-injected headers → `Principal`.
//! - [`tier`] — Tier Mapper (C2): group set → subscription tier.
//! - [`service_account`] — Service-Account Lifecycle (C3): namespace + SA ensure/revoke.
//! - [`token`] — Token Issuer (C4): ephemeral, audience-bound bearer tokens.
//! - [`selector`] — LLM Service Selector (C5): gateway-attached model candidates.
//! - [`prober`] — Authorization-Gated Model Prober (C6): per-candidate auth oracle.
//! - [`http`] — HTTP Handler Layer (C7): binds C1–C6 into REST endpoints.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod identity;
pub mod k8s;
pub mod prober;
pub mod selector;
pub mod service_account;
pub mod tier;
pub mod token;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Set up structured logging (A4): env-filtered, with optional JSON output.
///
/// # Errors
///
/// Returns an error if a subscriber has already been installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
