//! Authorization-Gated Model Prober (C6): the single source of
//! authorization truth for model discovery. Every candidate from C5 is
//! probed with the caller's own token; the data-plane gateway's response
//! decides what the caller can see (§4.6).

use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::ProbeConfig;
use crate::k8s::ModelDetails;
use crate::selector::Candidate;

/// A model a caller is authorized to see, merged from a single candidate's
/// probe response (§3.1 `Discovered Model`).
#[derive(Clone, Debug, Serialize)]
pub struct DiscoveredModel {
    /// Canonical model identifier (the first entry of the probe's `data` array).
    pub id: String,
    /// Fixed at `"model"`, matching the OpenAI models-list schema (§4.7, §6.1).
    pub object: &'static str,
    /// Remaining identifiers from the same probe response, in input order.
    pub aliases: Vec<String>,
    /// Owning namespace, from the probe response or the candidate's namespace.
    pub owned_by: String,
    /// Creation time, from the probe response or the candidate CR's creation time.
    pub created: i64,
    /// The exact address whose probe succeeded.
    pub url: String,
    /// Inherited from the candidate.
    pub ready: bool,
    /// Inherited from the candidate.
    #[serde(rename = "modelDetails", skip_serializing_if = "Option::is_none")]
    pub details: Option<ModelDetails>,
}

/// Shape of a data-plane `/v1/models` success response.
#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<RawModel>,
}

#[derive(Debug, Deserialize)]
struct RawModel {
    id: String,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    owned_by: String,
}

/// Outcome of probing a single address, folded from the §4.6 decision table.
enum AddressOutcome {
    /// 2xx with a parseable body — zero or more models, iteration over for this candidate.
    Authorized(Vec<RawModel>),
    /// 405 — authorized, but the endpoint only exposes the canonical model name.
    AuthorizedFallback,
    /// 401/403/404 or an unrecognized status — try the next address.
    Denied,
    /// Retries exhausted on a transient (5xx/429/network) failure — try the next address.
    Exhausted,
}

/// `authorizedModels(principal, token) → []DiscoveredModel` (C6).
pub struct ModelProber {
    client: reqwest::Client,
    config: ProbeConfig,
}

impl ModelProber {
    /// Build a prober with a pooled HTTP client tuned per `config` (§4.6,
    /// §9: TLS verification may be relaxed only for intra-cluster probes).
    #[must_use]
    pub fn new(config: ProbeConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.insecure_skip_tls_verify)
            .build()
            .expect("reqwest client configuration is static and always valid");
        Self { client, config }
    }

    /// Probe every candidate in parallel and return the accessible subset.
    /// Candidates the caller cannot reach are silently omitted — never an
    /// error (§4.6 "Fail-closed guarantee").
    pub async fn authorized_models(&self, candidates: Vec<Candidate>, token: &str) -> Vec<DiscoveredModel> {
        let (tx, mut rx) = mpsc::channel(candidates.len().max(1));
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.config.max_concurrent_candidates.max(1)));

        for candidate in candidates {
            let tx = tx.clone();
            let client = self.client.clone();
            let config = self.config.clone();
            let token = token.to_string();
            let semaphore = semaphore.clone();

            tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                if let Some(model) = probe_candidate(&client, &config, &candidate, &token).await {
                    let _ = tx.send(model).await;
                }
            });
        }
        drop(tx);

        let mut models = Vec::new();
        while let Some(model) = rx.recv().await {
            models.push(model);
        }
        models
    }
}

/// Iterate one candidate's addresses in priority order (external before
/// internal; §4.5/§4.6). Returns as soon as one address resolves to
/// authorized-or-fallback; otherwise the candidate is omitted.
async fn probe_candidate(
    client: &reqwest::Client,
    config: &ProbeConfig,
    candidate: &Candidate,
    token: &str,
) -> Option<DiscoveredModel> {
    for address in &candidate.addresses {
        let url = format!("{}/v1/models", address.url.trim_end_matches('/'));
        match probe_address(client, config, &url, token).await {
            AddressOutcome::Authorized(raw_models) => {
                return to_discovered_model(raw_models, candidate, &url);
            }
            AddressOutcome::AuthorizedFallback => {
                return Some(DiscoveredModel {
                    id: candidate.model_name.clone(),
                    object: "model",
                    aliases: Vec::new(),
                    owned_by: candidate.namespace.clone(),
                    created: candidate_creation_epoch(candidate),
                    url,
                    ready: candidate.ready,
                    details: candidate.details.clone(),
                });
            }
            AddressOutcome::Denied | AddressOutcome::Exhausted => continue,
        }
    }
    None
}

/// Issue one bearer-authenticated probe against `url`, retrying transient
/// failures with bounded exponential backoff before giving up on this
/// address (§4.6: ~4 attempts, base 100ms, factor 2, jitter 0.1).
async fn probe_address(client: &reqwest::Client, config: &ProbeConfig, url: &str, token: &str) -> AddressOutcome {
    let mut backoff = ExponentialBuilder::default()
        .with_min_delay(config.base_backoff)
        .with_factor(config.backoff_factor as f32)
        .with_max_times((config.max_attempts.saturating_sub(1)) as usize);
    if config.jitter > 0.0 {
        backoff = backoff.with_jitter();
    }

    let attempt = || async {
        let response = client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(ProbeError::Transport)?;
        classify(response, config.max_body_bytes).await
    };

    attempt
        .retry(backoff)
        .when(|e| matches!(e, ProbeError::Transient | ProbeError::Transport(_)))
        .await
        .unwrap_or_else(|e| e.into_outcome())
}

/// Transient-vs-terminal classification used to drive `backon`'s retry gate.
enum ProbeError {
    Transport(reqwest::Error),
    Transient,
}

impl ProbeError {
    fn into_outcome(self) -> AddressOutcome {
        match self {
            Self::Transport(_) | Self::Transient => AddressOutcome::Exhausted,
        }
    }
}

/// Fold an HTTP response into an [`AddressOutcome`] per the §4.6 decision table.
async fn classify(response: reqwest::Response, max_body_bytes: usize) -> Result<AddressOutcome, ProbeError> {
    let status = response.status();

    if status.is_success() {
        let body = match read_bounded(response, max_body_bytes).await {
            Ok(body) => body,
            Err(()) => return Ok(AddressOutcome::Denied),
        };
        let parsed: ModelsResponse = match serde_json::from_slice(&body) {
            Ok(parsed) => parsed,
            Err(_) => return Ok(AddressOutcome::Denied),
        };
        return Ok(AddressOutcome::Authorized(parsed.data));
    }

    match status.as_u16() {
        401 | 403 => Ok(AddressOutcome::Denied),
        404 => Ok(AddressOutcome::Denied),
        405 => Ok(AddressOutcome::AuthorizedFallback),
        429 => Err(ProbeError::Transient),
        code if (500..600).contains(&code) => Err(ProbeError::Transient),
        _ => Ok(AddressOutcome::Denied),
    }
}

/// Read at most `max_body_bytes` from `response`, rejecting larger bodies
/// outright instead of buffering them fully (§4.6, §8 property 9).
async fn read_bounded(response: reqwest::Response, max_body_bytes: usize) -> Result<Vec<u8>, ()> {
    use futures::StreamExt;

    if let Some(len) = response.content_length() {
        if len as usize > max_body_bytes {
            return Err(());
        }
    }

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|_| ())?;
        if body.len() + chunk.len() > max_body_bytes {
            return Err(());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Canonicalize a probe's `data` array into a `DiscoveredModel` (§4.6).
/// An empty array emits nothing for this candidate.
fn to_discovered_model(mut raw_models: Vec<RawModel>, candidate: &Candidate, url: &str) -> Option<DiscoveredModel> {
    if raw_models.is_empty() {
        return None;
    }
    let first = raw_models.remove(0);
    let aliases = raw_models.into_iter().map(|m| m.id).collect();

    let owned_by = if first.owned_by.is_empty() {
        candidate.namespace.clone()
    } else {
        first.owned_by
    };
    let created = if first.created == 0 {
        candidate_creation_epoch(candidate)
    } else {
        first.created
    };

    Some(DiscoveredModel {
        id: first.id,
        object: "model",
        aliases,
        owned_by,
        created,
        url: url.to_string(),
        ready: candidate.ready,
        details: candidate.details.clone(),
    })
}

/// The candidate CR's creation timestamp as Unix seconds, or `0` if unset.
fn candidate_creation_epoch(candidate: &Candidate) -> i64 {
    candidate
        .creation_timestamp
        .as_ref()
        .map(time_to_epoch_seconds)
        .unwrap_or(0)
}

fn time_to_epoch_seconds(t: &Time) -> i64 {
    t.0.timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::{AddressRole, ServiceAddress};
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn candidate(addresses: Vec<ServiceAddress>) -> Candidate {
        Candidate {
            namespace: "ns1".to_string(),
            name: "svc1".to_string(),
            model_name: "granite-3b-instruct".to_string(),
            addresses,
            ready: true,
            details: None,
            creation_timestamp: None,
        }
    }

    fn test_config() -> ProbeConfig {
        ProbeConfig {
            timeout: Duration::from_secs(1),
            max_attempts: 2,
            base_backoff: Duration::from_millis(1),
            backoff_factor: 2.0,
            jitter: 0.0,
            max_body_bytes: 4 * 1024 * 1024,
            insecure_skip_tls_verify: true,
            max_concurrent_candidates: 8,
        }
    }

    #[tokio::test]
    async fn authorized_2xx_merges_models_with_aliases() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .and(header("Authorization", "Bearer caller-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"id": "modelA"}, {"id": "modelA-alias"}]
            })))
            .mount(&server)
            .await;

        let candidate = candidate(vec![ServiceAddress { role: AddressRole::External, url: server.uri() }]);
        let prober = ModelProber::new(test_config());
        let models = prober.authorized_models(vec![candidate], "caller-token").await;

        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "modelA");
        assert_eq!(models[0].aliases, vec!["modelA-alias".to_string()]);
        assert_eq!(models[0].owned_by, "ns1");
    }

    #[tokio::test]
    async fn forbidden_at_every_address_omits_candidate() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let candidate = candidate(vec![ServiceAddress { role: AddressRole::External, url: server.uri() }]);
        let prober = ModelProber::new(test_config());
        let models = prober.authorized_models(vec![candidate], "caller-token").await;

        assert!(models.is_empty());
    }

    #[tokio::test]
    async fn external_denied_falls_back_to_internal() {
        let external = MockServer::start().await;
        let internal = MockServer::start().await;
        Mock::given(method("GET")).and(path("/v1/models")).respond_with(ResponseTemplate::new(403)).mount(&external).await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"id": "modelA"}]
            })))
            .mount(&internal)
            .await;

        let candidate = candidate(vec![
            ServiceAddress { role: AddressRole::External, url: external.uri() },
            ServiceAddress { role: AddressRole::Internal, url: internal.uri() },
        ]);
        let prober = ModelProber::new(test_config());
        let models = prober.authorized_models(vec![candidate], "caller-token").await;

        assert_eq!(models.len(), 1);
        assert_eq!(models[0].url, format!("{}/v1/models", internal.uri()));
    }

    #[tokio::test]
    async fn method_not_allowed_falls_back_to_candidate_model_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/v1/models")).respond_with(ResponseTemplate::new(405)).mount(&server).await;

        let candidate = candidate(vec![ServiceAddress { role: AddressRole::External, url: server.uri() }]);
        let prober = ModelProber::new(test_config());
        let models = prober.authorized_models(vec![candidate], "caller-token").await;

        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "granite-3b-instruct");
        assert!(models[0].aliases.is_empty());
    }

    #[tokio::test]
    async fn empty_data_array_omits_candidate() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": [] })))
            .mount(&server)
            .await;

        let candidate = candidate(vec![ServiceAddress { role: AddressRole::External, url: server.uri() }]);
        let prober = ModelProber::new(test_config());
        let models = prober.authorized_models(vec![candidate], "caller-token").await;

        assert!(models.is_empty());
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let server = MockServer::start().await;
        let big = "x".repeat(64);
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_string(big))
            .mount(&server)
            .await;

        let mut config = test_config();
        config.max_body_bytes = 8;
        let candidate = candidate(vec![ServiceAddress { role: AddressRole::External, url: server.uri() }]);
        let prober = ModelProber::new(config);
        let models = prober.authorized_models(vec![candidate], "caller-token").await;

        assert!(models.is_empty());
    }
}
