//! The orchestrator as the sole mutable store (SPEC_FULL §9): every
//! mutation goes through [`ControlPlane`], backed in production by a
//! `kube::Client`. Tests exercise C2–C5 against an in-memory fake
//! implementing the same trait instead of a live cluster — the standard
//! seam `kube`-based services test against (see DESIGN.md).

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::authentication::v1::{TokenRequest, TokenRequestSpec};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, ServiceAccount};
use kube::{
    Api, Client, Error as KubeError, ResourceExt,
    api::{ObjectMeta, PostParams},
    core::ErrorResponse,
};

use crate::{Error, Result};

use super::resources::LlmInferenceService;

/// A simplified view of a `gateway-api` `HTTPRoute`, reduced to what
/// attachment-rule matching needs (§4.5).
#[derive(Clone, Debug)]
pub struct HttpRouteSummary {
    /// `HTTPRoute` name.
    pub name: String,
    /// `HTTPRoute` namespace.
    pub namespace: String,
    /// Labels, used to find the managed route for attachment rule 4.
    pub labels: BTreeMap<String, String>,
    /// Parent Gateway references, `(name, namespace)` already defaulted.
    pub parent_refs: Vec<(String, String)>,
}

/// Everything C2–C5 need from the orchestrator, abstracted so the core
/// algorithms can be tested without a live cluster.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Read a `ConfigMap`'s `data` map, or `None` if it does not exist.
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<BTreeMap<String, String>>>;

    /// `true` if the namespace already exists.
    async fn namespace_exists(&self, name: &str) -> Result<bool>;

    /// Create the namespace with the given labels. Idempotent: an
    /// `AlreadyExists` response is treated as success (§4.3).
    async fn create_namespace(&self, name: &str, labels: BTreeMap<String, String>) -> Result<()>;

    /// `true` if the Service Account already exists in `namespace`.
    async fn service_account_exists(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Create the Service Account with the given labels. Idempotent.
    async fn create_service_account(
        &self,
        namespace: &str,
        name: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<()>;

    /// Delete the Service Account. A `NotFound` response is treated as success.
    async fn delete_service_account(&self, namespace: &str, name: &str) -> Result<()>;

    /// Mint a bound token for the Service Account via the `TokenRequest`
    /// subresource. Returns the raw (unverified) JWT.
    async fn create_token(
        &self,
        namespace: &str,
        service_account: &str,
        audiences: Vec<String>,
        expiration_seconds: i64,
    ) -> Result<String>;

    /// All `LlmInferenceService` custom resources cluster-wide.
    async fn list_llm_inference_services(&self) -> Result<Vec<LlmInferenceService>>;

    /// All `HTTPRoute`s in `namespace`.
    async fn list_http_routes(&self, namespace: &str) -> Result<Vec<HttpRouteSummary>>;
}

/// Production [`ControlPlane`] backed by a live `kube::Client`.
pub struct KubeControlPlane {
    client: Client,
}

impl KubeControlPlane {
    /// Build from an already-configured `kube::Client` (in-cluster config
    /// or kubeconfig, resolved by the caller via `Client::try_default`).
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// `true` if a `kube::Error` represents a 409 Conflict / AlreadyExists response.
fn is_already_exists(err: &KubeError) -> bool {
    matches!(err, KubeError::Api(ErrorResponse { code: 409, .. }))
}

/// `true` if a `kube::Error` represents a 404 Not Found response.
fn is_not_found(err: &KubeError) -> bool {
    matches!(err, KubeError::Api(ErrorResponse { code: 404, .. }))
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<BTreeMap<String, String>>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(cm) => Ok(Some(cm.data.unwrap_or_default().into_iter().collect())),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(Error::Orchestrator(e.to_string())),
        }
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(Error::Orchestrator(e.to_string())),
        }
    }

    async fn create_namespace(&self, name: &str, labels: BTreeMap<String, String>) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        };
        match api.create(&PostParams::default(), &ns).await {
            Ok(_) => Ok(()),
            Err(e) if is_already_exists(&e) => Ok(()),
            Err(e) => Err(Error::Orchestrator(e.to_string())),
        }
    }

    async fn service_account_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(Error::Orchestrator(e.to_string())),
        }
    }

    async fn create_service_account(
        &self,
        namespace: &str,
        name: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<()> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let sa = ServiceAccount {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        };
        match api.create(&PostParams::default(), &sa).await {
            Ok(_) => Ok(()),
            Err(e) if is_already_exists(&e) => Ok(()),
            Err(e) => Err(Error::Orchestrator(e.to_string())),
        }
    }

    async fn delete_service_account(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &Default::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(Error::Orchestrator(e.to_string())),
        }
    }

    async fn create_token(
        &self,
        namespace: &str,
        service_account: &str,
        audiences: Vec<String>,
        expiration_seconds: i64,
    ) -> Result<String> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let request = TokenRequest {
            spec: TokenRequestSpec {
                audiences,
                expiration_seconds: Some(expiration_seconds),
                ..Default::default()
            },
            ..Default::default()
        };
        let body = serde_json::to_vec(&request)?;
        let response: TokenRequest = api
            .create_subresource("token", service_account, &PostParams::default(), body)
            .await
            .map_err(|e| Error::Orchestrator(e.to_string()))?;

        response
            .status
            .map(|s| s.token)
            .ok_or_else(|| Error::Orchestrator("TokenRequest response carried no status".to_string()))
    }

    async fn list_llm_inference_services(&self) -> Result<Vec<LlmInferenceService>> {
        let api: Api<LlmInferenceService> = Api::all(self.client.clone());
        let list = api
            .list(&Default::default())
            .await
            .map_err(|e| Error::Orchestrator(e.to_string()))?;
        Ok(list.items)
    }

    async fn list_http_routes(&self, namespace: &str) -> Result<Vec<HttpRouteSummary>> {
        let api: Api<gateway_api::apis::standard::httproutes::HTTPRoute> =
            Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&Default::default())
            .await
            .map_err(|e| Error::Orchestrator(e.to_string()))?;

        Ok(list
            .items
            .into_iter()
            .map(|route| {
                let ns = route.namespace().unwrap_or_else(|| namespace.to_string());
                let parent_refs = route
                    .spec
                    .parent_refs
                    .unwrap_or_default()
                    .into_iter()
                    .map(|p| {
                        let parent_ns = p.namespace.unwrap_or_else(|| ns.clone());
                        (p.name, parent_ns)
                    })
                    .collect();
                HttpRouteSummary {
                    name: route.name_any(),
                    namespace: ns,
                    labels: route.labels().clone().into_iter().collect(),
                    parent_refs,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_exists_detection() {
        let err = KubeError::Api(ErrorResponse {
            status: "Failure".into(),
            message: "already exists".into(),
            reason: "AlreadyExists".into(),
            code: 409,
        });
        assert!(is_already_exists(&err));
    }

    #[test]
    fn not_found_detection() {
        let err = KubeError::Api(ErrorResponse {
            status: "Failure".into(),
            message: "not found".into(),
            reason: "NotFound".into(),
            code: 404,
        });
        assert!(is_not_found(&err));
    }
}
