//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

/// MaaS control-plane API: tier resolution, ephemeral token issuance, and
/// authorization-gated model discovery.
#[derive(Parser, Debug)]
#[command(name = "maas-api")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "MAAS_API_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "MAAS_API_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "MAAS_API_HOST")]
    pub host: Option<String>,

    /// Deployment/tenant identifier (prefixes tier namespaces and the token audience)
    #[arg(long, env = "MAAS_API_INSTANCE")]
    pub instance: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "MAAS_API_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "MAAS_API_LOG_FORMAT")]
    pub log_format: Option<String>,
}
