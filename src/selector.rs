//! LLM Service Selector (C5): filters all model-serving custom resources
//! cluster-wide down to those whose routing attaches to the configured
//! MaaS data-plane gateway (§4.5).

use std::sync::Arc;

use crate::k8s::{ControlPlane, HttpRouteSummary, LlmInferenceService, ModelDetails, ServiceAddress};
use crate::Result;

/// A model-serving workload attached to the MaaS gateway (C5 output, §3.1).
#[derive(Clone, Debug)]
pub struct Candidate {
    /// CR namespace.
    pub namespace: String,
    /// CR name.
    pub name: String,
    /// `spec.model.name`, falling back to the CR name.
    pub model_name: String,
    /// Probe order: external-role addresses, then internal-role.
    pub addresses: Vec<ServiceAddress>,
    /// Aggregated readiness.
    pub ready: bool,
    /// Optional annotation-derived metadata.
    pub details: Option<ModelDetails>,
    /// CR creation time, used as the `created` fallback for discovered models.
    pub creation_timestamp: Option<k8s_openapi::apimachinery::pkg::apis::meta::v1::Time>,
}

/// `candidates() → []Candidate` (C5).
pub struct LlmServiceSelector<C: ControlPlane> {
    control_plane: Arc<C>,
    gateway_name: String,
    gateway_namespace: String,
}

impl<C: ControlPlane> LlmServiceSelector<C> {
    /// Build a selector targeting the given data-plane gateway.
    pub fn new(control_plane: Arc<C>, gateway_name: String, gateway_namespace: String) -> Self {
        Self {
            control_plane,
            gateway_name,
            gateway_namespace,
        }
    }

    /// List every `LlmInferenceService` cluster-wide and keep those attached
    /// to the configured gateway via any of the four attachment rules (§4.5).
    pub async fn candidates(&self) -> Result<Vec<Candidate>> {
        let crs = self.control_plane.list_llm_inference_services().await?;
        let mut out = Vec::new();

        for cr in crs {
            if self.is_attached(&cr).await? {
                out.push(Candidate {
                    namespace: cr.metadata.namespace.clone().unwrap_or_default(),
                    name: cr.metadata.name.clone().unwrap_or_default(),
                    model_name: cr.model_name(),
                    addresses: cr.ordered_addresses(),
                    ready: cr.is_ready(),
                    details: cr.details(),
                    creation_timestamp: cr.creation_timestamp(),
                });
            }
        }

        Ok(out)
    }

    /// Evaluate the four attachment rules for a single CR, short-circuiting
    /// as soon as one matches (§4.5).
    async fn is_attached(&self, cr: &LlmInferenceService) -> Result<bool> {
        if self.matches_gateway(&cr.direct_gateway_refs()) {
            return Ok(true);
        }
        if self.matches_gateway(&cr.inline_route_parent_refs()) {
            return Ok(true);
        }

        let namespace = cr.metadata.namespace.clone().unwrap_or_default();
        let routes = self.control_plane.list_http_routes(&namespace).await?;

        let referenced = cr.referenced_route_names();
        if !referenced.is_empty() {
            let attached = routes
                .iter()
                .filter(|r| referenced.contains(&r.name))
                .any(|r| self.matches_gateway(&r.parent_refs));
            if attached {
                return Ok(true);
            }
        }

        if cr.uses_managed_route() {
            let wanted_labels = cr.managed_route_labels();
            let attached = routes
                .iter()
                .filter(|r| self.labels_match(&r.labels, &wanted_labels))
                .any(|r| self.matches_gateway(&r.parent_refs));
            if attached {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn matches_gateway(&self, refs: &[(String, String)]) -> bool {
        refs.iter()
            .any(|(name, namespace)| name == &self.gateway_name && namespace == &self.gateway_namespace)
    }

    fn labels_match(
        &self,
        route_labels: &std::collections::BTreeMap<String, String>,
        wanted: &std::collections::BTreeMap<String, String>,
    ) -> bool {
        wanted.iter().all(|(k, v)| route_labels.get(k) == Some(v))
            && route_labels.len() == wanted.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::test_support::FakeControlPlane;
    use crate::k8s::{
        GatewayReference, GatewayRouterSpec, HttpRouteAttachment, HttpRouteRef,
        InlineHttpRouteSpec, LlmInferenceServiceSpec, ModelSpec, RouteSpec, RouterSpec,
    };
    use kube::core::ObjectMeta;
    use pretty_assertions::assert_eq;

    fn cr(name: &str, namespace: &str, router: Option<RouterSpec>) -> LlmInferenceService {
        LlmInferenceService {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                generation: Some(1),
                ..Default::default()
            },
            spec: LlmInferenceServiceSpec {
                model: Some(ModelSpec { name: None }),
                router,
            },
            status: None,
        }
    }

    fn selector(fake: Arc<FakeControlPlane>) -> LlmServiceSelector<FakeControlPlane> {
        LlmServiceSelector::new(fake, "maas-gw".to_string(), "maas-system".to_string())
    }

    #[tokio::test]
    async fn direct_gateway_ref_attaches() {
        let fake = Arc::new(FakeControlPlane::new());
        fake.add_llm_inference_service(cr(
            "svc1",
            "ns1",
            Some(RouterSpec {
                route: None,
                gateway: Some(GatewayRouterSpec {
                    refs: vec![GatewayReference { name: "maas-gw".to_string(), namespace: None }],
                }),
            }),
        ));
        let candidates = selector(fake).candidates().await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name, "svc1");
    }

    #[tokio::test]
    async fn direct_gateway_ref_to_other_gateway_is_excluded() {
        let fake = Arc::new(FakeControlPlane::new());
        fake.add_llm_inference_service(cr(
            "svc1",
            "ns1",
            Some(RouterSpec {
                route: None,
                gateway: Some(GatewayRouterSpec {
                    refs: vec![GatewayReference { name: "other-gw".to_string(), namespace: None }],
                }),
            }),
        ));
        let candidates = selector(fake).candidates().await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn inline_route_parent_attaches() {
        let fake = Arc::new(FakeControlPlane::new());
        fake.add_llm_inference_service(cr(
            "svc1",
            "ns1",
            Some(RouterSpec {
                gateway: None,
                route: Some(RouteSpec {
                    http: Some(HttpRouteAttachment {
                        spec: Some(InlineHttpRouteSpec {
                            parent_refs: vec![GatewayReference {
                                name: "maas-gw".to_string(),
                                namespace: Some("maas-system".to_string()),
                            }],
                        }),
                        refs: vec![],
                    }),
                }),
            }),
        ));
        let candidates = selector(fake).candidates().await.unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test]
    async fn referenced_route_attaches() {
        let fake = Arc::new(FakeControlPlane::new());
        fake.add_llm_inference_service(cr(
            "svc1",
            "ns1",
            Some(RouterSpec {
                gateway: None,
                route: Some(RouteSpec {
                    http: Some(HttpRouteAttachment {
                        spec: None,
                        refs: vec![HttpRouteRef { name: "svc1-route".to_string() }],
                    }),
                }),
            }),
        ));
        fake.put_http_routes(
            "ns1",
            vec![HttpRouteSummary {
                name: "svc1-route".to_string(),
                namespace: "ns1".to_string(),
                labels: Default::default(),
                parent_refs: vec![("maas-gw".to_string(), "maas-system".to_string())],
            }],
        );
        let candidates = selector(fake).candidates().await.unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test]
    async fn managed_route_attaches_only_with_exact_label_match() {
        let fake = Arc::new(FakeControlPlane::new());
        fake.add_llm_inference_service(cr(
            "svc1",
            "ns1",
            Some(RouterSpec {
                gateway: None,
                route: Some(RouteSpec {
                    http: Some(HttpRouteAttachment { spec: None, refs: vec![] }),
                }),
            }),
        ));
        let mut labels = std::collections::BTreeMap::new();
        labels.insert("component".to_string(), "llminferenceservice-router".to_string());
        labels.insert("name".to_string(), "svc1".to_string());
        labels.insert("part-of".to_string(), "llminferenceservice".to_string());
        fake.put_http_routes(
            "ns1",
            vec![HttpRouteSummary {
                name: "svc1-managed".to_string(),
                namespace: "ns1".to_string(),
                labels,
                parent_refs: vec![("maas-gw".to_string(), "maas-system".to_string())],
            }],
        );
        let candidates = selector(fake).candidates().await.unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test]
    async fn unattached_cr_is_excluded() {
        let fake = Arc::new(FakeControlPlane::new());
        fake.add_llm_inference_service(cr("svc1", "ns1", None));
        let candidates = selector(fake).candidates().await.unwrap();
        assert!(candidates.is_empty());
    }
}
