//! Typed Kubernetes resources the control plane reads and writes.
//!
//! `LlmInferenceService` is hand-modeled as a [`kube::CustomResource`] the
//! same way the `other_examples` operator code models upstream CRDs: a
//! plain `#[derive(CustomResource, ...)]` struct rather than a hand-rolled
//! `Api` wrapper. `HTTPRoute` comes from the `gateway-api` crate's typed
//! bindings instead of being re-derived here.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// `llminferenceservices.serving.maas.io` — a model-serving workload whose
/// routing may or may not attach to the MaaS data-plane Gateway (C5).
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "serving.maas.io",
    version = "v1alpha1",
    kind = "LlmInferenceService",
    plural = "llminferenceservices",
    namespaced,
    status = "LlmInferenceServiceStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct LlmInferenceServiceSpec {
    /// Model identity and serving configuration.
    #[serde(default)]
    pub model: Option<ModelSpec>,
    /// Routing configuration: how this service is exposed.
    #[serde(default)]
    pub router: Option<RouterSpec>,
}

/// `spec.model`.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    /// The model's canonical name. Falls back to the CR name when unset.
    #[serde(default)]
    pub name: Option<String>,
}

/// `spec.router`.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RouterSpec {
    /// Gateway attachment and route configuration.
    #[serde(default)]
    pub route: Option<RouteSpec>,
    /// Direct Gateway reference (attachment rule 1).
    #[serde(default)]
    pub gateway: Option<GatewayRouterSpec>,
}

/// `spec.router.gateway`.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRouterSpec {
    /// Gateways this service's routing attaches to directly.
    #[serde(default)]
    pub refs: Vec<GatewayReference>,
}

/// An entry of `spec.router.gateway.refs`.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct GatewayReference {
    /// Gateway name.
    pub name: String,
    /// Gateway namespace. Unset defaults to the owning CR's namespace.
    #[serde(default)]
    pub namespace: Option<String>,
}

/// `spec.router.route`.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    /// HTTPRoute attachment — inline, referenced, or (if both are absent) managed.
    #[serde(default)]
    pub http: Option<HttpRouteAttachment>,
}

/// `spec.router.route.http`.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteAttachment {
    /// Inline `HTTPRoute` spec (attachment rule 2).
    #[serde(default)]
    pub spec: Option<InlineHttpRouteSpec>,
    /// References to existing `HTTPRoute` objects (attachment rule 3).
    #[serde(default)]
    pub refs: Vec<HttpRouteRef>,
}

/// `spec.router.route.http.spec` — the subset of an `HTTPRoute` spec that
/// matters for attachment: its `parentRefs`.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct InlineHttpRouteSpec {
    /// Parent Gateway references.
    #[serde(default)]
    pub parent_refs: Vec<GatewayReference>,
}

/// An entry of `spec.router.route.http.refs`.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct HttpRouteRef {
    /// Name of an `HTTPRoute` in the CR's own namespace.
    pub name: String,
}

/// `status` of an `LlmInferenceService`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LlmInferenceServiceStatus {
    /// Generation last reconciled by the controller.
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// Addresses this service is reachable at.
    #[serde(default)]
    pub addresses: Vec<ServiceAddress>,
    /// Standard Kubernetes-style status conditions.
    #[serde(default)]
    pub conditions: Vec<StatusCondition>,
}

/// One entry of `status.addresses`.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAddress {
    /// `external` or `internal`. External addresses are probed first (§4.5).
    pub role: AddressRole,
    /// The base URL to probe (`{url}/v1/models`).
    pub url: String,
}

/// Address role, ordered by probe priority.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AddressRole {
    /// Probed first — exercises the public auth surface.
    External,
    /// Probed only if all external addresses fail.
    Internal,
}

/// One entry of `status.conditions`.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct StatusCondition {
    /// Condition type (e.g. `Ready`).
    #[serde(rename = "type")]
    pub type_: String,
    /// `"True"`, `"False"`, or `"Unknown"`.
    pub status: String,
}

impl LlmInferenceService {
    /// `modelName`: `spec.model.name` if set, else the CR's own name (§3.1).
    #[must_use]
    pub fn model_name(&self) -> String {
        self.spec
            .model
            .as_ref()
            .and_then(|m| m.name.clone())
            .unwrap_or_else(|| self.metadata.name.clone().unwrap_or_default())
    }

    /// `ready`: no deletion timestamp, `observedGeneration` caught up (or
    /// unset/zero), and every condition reporting `status=true` (§4.5).
    #[must_use]
    pub fn is_ready(&self) -> bool {
        if self.metadata.deletion_timestamp.is_some() {
            return false;
        }
        let generation = self.metadata.generation.unwrap_or(0);
        let Some(status) = &self.status else {
            return false;
        };
        let observed = status.observed_generation.unwrap_or(0);
        if generation != 0 && observed != generation {
            return false;
        }
        status.conditions.iter().all(|c| c.status == "True")
    }

    /// Addresses in probe priority order: external first, then internal (§4.5).
    #[must_use]
    pub fn ordered_addresses(&self) -> Vec<ServiceAddress> {
        let mut addrs = self
            .status
            .as_ref()
            .map(|s| s.addresses.clone())
            .unwrap_or_default();
        addrs.sort_by_key(|a| a.role);
        addrs
    }

    /// Annotations surfaced as `DiscoveredModel.details` (§3.1).
    #[must_use]
    pub fn details(&self) -> Option<ModelDetails> {
        let annotations = &self.metadata.annotations.as_ref()?;
        let get = |key: &str| annotations.get(key).cloned();
        let details = ModelDetails {
            gen_ai_use_case: get("maas.io/genai-use-case"),
            description: get("maas.io/description"),
            display_name: get("maas.io/display-name"),
        };
        if details.gen_ai_use_case.is_none()
            && details.description.is_none()
            && details.display_name.is_none()
        {
            None
        } else {
            Some(details)
        }
    }

    /// The CR's own namespace-defaulted parent refs for attachment rule 1.
    #[must_use]
    pub fn direct_gateway_refs(&self) -> Vec<(String, String)> {
        self.spec
            .router
            .as_ref()
            .and_then(|r| r.gateway.as_ref())
            .map(|g| self.resolve_refs(&g.refs))
            .unwrap_or_default()
    }

    /// The CR's own namespace-defaulted parent refs for attachment rule 2.
    #[must_use]
    pub fn inline_route_parent_refs(&self) -> Vec<(String, String)> {
        self.spec
            .router
            .as_ref()
            .and_then(|r| r.route.as_ref())
            .and_then(|route| route.http.as_ref())
            .and_then(|http| http.spec.as_ref())
            .map(|spec| self.resolve_refs(&spec.parent_refs))
            .unwrap_or_default()
    }

    /// `HTTPRoute` names referenced by attachment rule 3.
    #[must_use]
    pub fn referenced_route_names(&self) -> Vec<String> {
        self.spec
            .router
            .as_ref()
            .and_then(|r| r.route.as_ref())
            .and_then(|route| route.http.as_ref())
            .map(|http| http.refs.iter().map(|r| r.name.clone()).collect())
            .unwrap_or_default()
    }

    /// True when `spec.router.route.http` is present but carries neither an
    /// inline `spec` nor `refs` — the platform auto-generates a route
    /// (attachment rule 4).
    #[must_use]
    pub fn uses_managed_route(&self) -> bool {
        self.spec
            .router
            .as_ref()
            .and_then(|r| r.route.as_ref())
            .and_then(|route| route.http.as_ref())
            .is_some_and(|http| http.spec.is_none() && http.refs.is_empty())
    }

    fn resolve_refs(&self, refs: &[GatewayReference]) -> Vec<(String, String)> {
        let own_ns = self.metadata.namespace.clone().unwrap_or_default();
        refs.iter()
            .map(|r| (r.name.clone(), r.namespace.clone().unwrap_or_else(|| own_ns.clone())))
            .collect()
    }

    /// Labels a managed `HTTPRoute` for this CR carries (attachment rule 4).
    #[must_use]
    pub fn managed_route_labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert("component".to_string(), "llminferenceservice-router".to_string());
        labels.insert(
            "name".to_string(),
            self.metadata.name.clone().unwrap_or_default(),
        );
        labels.insert("part-of".to_string(), "llminferenceservice".to_string());
        labels
    }

    /// CR creation timestamp, used as the fallback for `DiscoveredModel.created`.
    #[must_use]
    pub fn creation_timestamp(&self) -> Option<Time> {
        self.metadata.creation_timestamp.clone()
    }
}

/// Optional human-facing metadata surfaced on `DiscoveredModel` (§3.1).
#[derive(Clone, Debug, Default, Serialize)]
pub struct ModelDetails {
    /// `maas.io/genai-use-case` annotation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gen_ai_use_case: Option<String>,
    /// `maas.io/description` annotation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `maas.io/display-name` annotation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}
