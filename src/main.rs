//! MaaS control-plane API — tier resolution, ephemeral token issuance, and
//! authorization-gated model discovery.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

use maas_api::cli::Cli;
use maas_api::config::Config;
use maas_api::http::{create_router, AppState};
use maas_api::k8s::KubeControlPlane;
use maas_api::prober::ModelProber;
use maas_api::selector::LlmServiceSelector;
use maas_api::token::TokenIssuer;
use maas_api::{setup_tracing, Error};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            if let Some(ref instance) = cli.instance {
                config.instance = instance.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => {
            info!("maas-api shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("maas-api error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> maas_api::Result<()> {
    let addr = SocketAddr::new(
        config
            .server
            .host
            .parse()
            .map_err(|e| Error::Config(format!("invalid host: {e}")))?,
        config.server.port,
    );

    let kube_client = Client::try_default()
        .await
        .map_err(|e| Error::Orchestrator(format!("failed to build Kubernetes client: {e}")))?;
    let control_plane = Arc::new(KubeControlPlane::new(kube_client));

    let issuer = TokenIssuer::new(
        control_plane.clone(),
        config.control_plane_namespace.clone(),
        config.instance.clone(),
        config.audience(),
        config.token.default_ttl,
        config.token.min_ttl,
    );
    let selector = LlmServiceSelector::new(
        control_plane.clone(),
        config.gateway_name.clone(),
        config.gateway_namespace.clone(),
    );
    let prober = ModelProber::new(config.probe.clone());
    let shutdown_timeout = config.server.shutdown_timeout;

    let state = Arc::new(AppState {
        config,
        issuer,
        selector,
        prober,
    });
    let app = create_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("failed to bind {addr}: {e}")))?;

    info!(%addr, "maas-api listening");
    info!("  POST /v1/tokens");
    info!("  GET  /v1/models");
    info!("  GET  /health");

    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    // No in-process mutable state to drain: every mutation lives in the
    // orchestrator (SPEC_FULL.md §9). `shutdown_timeout` only bounds how
    // long we wait for in-flight connections to close once the signal
    // fires.
    match tokio::time::timeout(shutdown_timeout, serve).await {
        Ok(result) => result.map_err(|e| Error::Internal(e.to_string())),
        Err(_) => {
            info!(timeout = ?shutdown_timeout, "graceful shutdown timed out, exiting anyway");
            Ok(())
        }
    }
}

/// Waits for Ctrl+C or SIGTERM, the same shutdown trigger shape as the
/// teacher's gateway server.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
}
