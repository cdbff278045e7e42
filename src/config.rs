//! Configuration management

use std::{path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Top-level control-plane configuration (A1 in SPEC_FULL).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Deployment/tenant identifier. Prefixes tier namespaces and names the
    /// service-account token audience (`{instance}-sa`).
    pub instance: String,
    /// Namespace holding the `tier-to-group-mapping` `ConfigMap`.
    pub control_plane_namespace: String,
    /// Name of the data-plane Gateway that candidates must attach to.
    pub gateway_name: String,
    /// Namespace of the data-plane Gateway.
    pub gateway_namespace: String,
    /// Header carrying the authenticated username, injected by the ingress gateway.
    pub username_header: String,
    /// Header carrying the authenticated group list (JSON array), injected by the ingress gateway.
    pub groups_header: String,
    /// HTTP server configuration.
    pub server: ServerConfig,
    /// Structured logging configuration.
    pub log: LogConfig,
    /// Data-plane probe tuning (C6).
    pub probe: ProbeConfig,
    /// Token issuance bounds (C4).
    pub token: TokenConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instance: "maas".to_string(),
            control_plane_namespace: "maas-api".to_string(),
            gateway_name: "maas-default-gateway".to_string(),
            gateway_namespace: "openshift-ingress".to_string(),
            username_header: "X-User".to_string(),
            groups_header: "X-Groups".to_string(),
            server: ServerConfig::default(),
            log: LogConfig::default(),
            probe: ProbeConfig::default(),
            token: TokenConfig::default(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Graceful shutdown drain timeout.
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8443,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Structured logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `trace`/`debug`/`info`/`warn`/`error`, or an `EnvFilter` directive string.
    pub level: String,
    /// `text` or `json`.
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Authorization-gated model prober tuning (C6, spec §4.6/§5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Per-attempt HTTP timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Maximum attempts per address before moving to the next address.
    pub max_attempts: u32,
    /// Base backoff between retry attempts.
    #[serde(with = "humantime_serde")]
    pub base_backoff: Duration,
    /// Exponential backoff multiplier.
    pub backoff_factor: f64,
    /// Jitter fraction applied to each backoff delay (0.0-1.0).
    pub jitter: f64,
    /// Maximum response body size read from a probe, in bytes.
    pub max_body_bytes: usize,
    /// Skip TLS certificate verification for intra-cluster probe addresses.
    /// A deployment trade-off for self-signed data-plane endpoints; never
    /// appropriate for probes that cross the public Internet (spec §9).
    pub insecure_skip_tls_verify: bool,
    /// Upper bound on concurrently in-flight candidate probes.
    pub max_concurrent_candidates: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            max_attempts: 4,
            base_backoff: Duration::from_millis(100),
            backoff_factor: 2.0,
            jitter: 0.1,
            max_body_bytes: 4 * 1024 * 1024,
            insecure_skip_tls_verify: true,
            max_concurrent_candidates: 32,
        }
    }
}

/// Token issuance bounds (C4, spec §3.1/§6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Default TTL when the caller omits `expiration` or passes `0`.
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
    /// Minimum accepted TTL; anything shorter is rejected with a 400.
    #[serde(with = "humantime_serde")]
    pub min_ttl: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(4 * 3600),
            min_ttl: Duration::from_secs(10 * 60),
        }
    }
}

impl Config {
    /// Load configuration from an optional YAML file, then environment
    /// variables prefixed `MAAS_API_` (double-underscore nesting).
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("MAAS_API_").split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Audience bound into minted tokens: `{instance}-sa`.
    #[must_use]
    pub fn audience(&self) -> String {
        format!("{}-sa", self.instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.audience(), "maas-sa");
        assert_eq!(config.token.min_ttl, Duration::from_secs(600));
        assert_eq!(config.token.default_ttl, Duration::from_secs(14_400));
    }

    #[test]
    fn load_missing_file_errors() {
        let err = Config::load(Some(Path::new("/nonexistent/config.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn config_deserializes_from_yaml() {
        let yaml = r#"
instance: acme
control_plane_namespace: acme-maas
gateway_name: acme-gw
gateway_namespace: acme-ingress
probe:
  timeout: 3s
  max_attempts: 4
token:
  default_ttl: 4h
  min_ttl: 10m
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.instance, "acme");
        assert_eq!(config.probe.timeout, Duration::from_secs(3));
        assert_eq!(config.token.default_ttl, Duration::from_secs(14_400));
        assert_eq!(config.token.min_ttl, Duration::from_secs(600));
    }
}
