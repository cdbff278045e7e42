//! In-memory [`ControlPlane`] fake used by unit tests across C2–C5.
//!
//! This is the seam SPEC_FULL.md's Open-Question resolution relies on:
//! rather than standing up a live cluster, the tier/SA-lifecycle/selector
//! tests drive the same trait a `kube::Client`-backed implementation does.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{Error, Result};

use super::client::{ControlPlane, HttpRouteSummary};
use super::resources::LlmInferenceService;

/// In-memory orchestrator state, guarded by a single mutex (tests are not
/// performance sensitive; this keeps the fake trivially `Send + Sync`).
#[derive(Default)]
struct State {
    config_maps: BTreeMap<(String, String), BTreeMap<String, String>>,
    namespaces: BTreeMap<String, BTreeMap<String, String>>,
    service_accounts: BTreeMap<(String, String), BTreeMap<String, String>>,
    llm_inference_services: Vec<LlmInferenceService>,
    http_routes: BTreeMap<String, Vec<HttpRouteSummary>>,
    next_token_serial: u64,
}

/// An in-memory stand-in for [`KubeControlPlane`](super::client::KubeControlPlane).
pub struct FakeControlPlane {
    state: Mutex<State>,
}

impl FakeControlPlane {
    /// An empty fake.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Seed a `ConfigMap`.
    pub fn put_config_map(&self, namespace: &str, name: &str, data: BTreeMap<String, String>) {
        self.state
            .lock()
            .unwrap()
            .config_maps
            .insert((namespace.to_string(), name.to_string()), data);
    }

    /// Seed an `LlmInferenceService`.
    pub fn add_llm_inference_service(&self, cr: LlmInferenceService) {
        self.state.lock().unwrap().llm_inference_services.push(cr);
    }

    /// Seed `HTTPRoute`s for a namespace.
    pub fn put_http_routes(&self, namespace: &str, routes: Vec<HttpRouteSummary>) {
        self.state
            .lock()
            .unwrap()
            .http_routes
            .insert(namespace.to_string(), routes);
    }

    /// Whether a Service Account currently exists — used by SA-lifecycle tests
    /// to assert against orchestrator state rather than an in-process map
    /// (SPEC_FULL.md §9: "tests should assert against the orchestrator's state").
    #[must_use]
    pub fn service_account_present(&self, namespace: &str, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .service_accounts
            .contains_key(&(namespace.to_string(), name.to_string()))
    }

    /// Whether a namespace currently exists.
    #[must_use]
    pub fn namespace_present(&self, name: &str) -> bool {
        self.state.lock().unwrap().namespaces.contains_key(name)
    }
}

impl Default for FakeControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<BTreeMap<String, String>>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .config_maps
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().namespaces.contains_key(name))
    }

    async fn create_namespace(&self, name: &str, labels: BTreeMap<String, String>) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .namespaces
            .entry(name.to_string())
            .or_insert(labels);
        Ok(())
    }

    async fn service_account_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .service_accounts
            .contains_key(&(namespace.to_string(), name.to_string())))
    }

    async fn create_service_account(
        &self,
        namespace: &str,
        name: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .service_accounts
            .entry((namespace.to_string(), name.to_string()))
            .or_insert(labels);
        Ok(())
    }

    async fn delete_service_account(&self, namespace: &str, name: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .service_accounts
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn create_token(
        &self,
        namespace: &str,
        service_account: &str,
        audiences: Vec<String>,
        expiration_seconds: i64,
    ) -> Result<String> {
        if !self.service_account_exists(namespace, service_account).await? {
            return Err(Error::Orchestrator(format!(
                "service account {namespace}/{service_account} not found"
            )));
        }
        let serial = {
            let mut state = self.state.lock().unwrap();
            state.next_token_serial += 1;
            state.next_token_serial
        };
        Ok(fake_jwt(namespace, service_account, &audiences, expiration_seconds, serial))
    }

    async fn list_llm_inference_services(&self) -> Result<Vec<LlmInferenceService>> {
        Ok(self.state.lock().unwrap().llm_inference_services.clone())
    }

    async fn list_http_routes(&self, namespace: &str) -> Result<Vec<HttpRouteSummary>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .http_routes
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }
}

/// Build a syntactically valid, unsigned JWT carrying `iat`/`exp`/`jti`/`aud`
/// so C4's claims-parsing code exercises the exact same path it would
/// against a real orchestrator-minted token.
fn fake_jwt(namespace: &str, service_account: &str, audiences: &[String], expiration_seconds: i64, serial: u64) -> String {
    use base64::Engine;
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    let header = serde_json::json!({"alg": "RS256", "typ": "JWT"});
    let claims = serde_json::json!({
        "iss": "kubernetes/serviceaccount",
        "sub": format!("system:serviceaccount:{namespace}:{service_account}"),
        "aud": audiences,
        "iat": now,
        "exp": now + expiration_seconds,
        "jti": format!("{serial:032x}"),
    });
    let encode = |v: &serde_json::Value| {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(serde_json::to_vec(v).unwrap())
    };
    format!("{}.{}.fake-signature", encode(&header), encode(&claims))
}
