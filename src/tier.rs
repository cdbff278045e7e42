//! Tier Mapper (C2): resolves a caller's group set to exactly one
//! subscription tier from the `tier-to-group-mapping` `ConfigMap`.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::k8s::ControlPlane;
use crate::{Error, Result};

/// Name of the `ConfigMap` holding the tier document (§6.5).
pub const TIER_CONFIG_MAP_NAME: &str = "tier-to-group-mapping";
/// Key within the `ConfigMap`'s `data` holding the YAML tier list.
const TIER_CONFIG_MAP_KEY: &str = "tiers";

/// A subscription tier, as declared in the tier document (§3.1).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tier {
    /// Unique, stable identifier (e.g. `free`, `premium`).
    pub name: String,
    /// Precedence; higher wins when a caller's groups match more than one tier.
    pub level: i64,
    /// Groups that grant this tier.
    pub groups: Vec<String>,
    /// Optional human-readable name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Optional human-readable description.
    #[serde(default)]
    pub description: Option<String>,
}

/// Raw shape of the `tiers` YAML document.
#[derive(Debug, Deserialize)]
struct TierDocument {
    tiers: Vec<Tier>,
}

/// `tierFor(groups) → Tier | error` (C2).
pub struct TierMapper<C: ControlPlane> {
    control_plane: Arc<C>,
    control_plane_namespace: String,
    instance: String,
}

impl<C: ControlPlane> TierMapper<C> {
    /// Build a mapper reading the tier document from `control_plane_namespace`.
    pub fn new(control_plane: Arc<C>, control_plane_namespace: String, instance: String) -> Self {
        Self {
            control_plane,
            control_plane_namespace,
            instance,
        }
    }

    /// Load, validate, and synthetic-group-augment the current tier document.
    /// Re-reads the backing cache on every call; no in-process TTL (§4.2).
    async fn load_tiers(&self) -> Result<Vec<Tier>> {
        let data = self
            .control_plane
            .get_config_map(&self.control_plane_namespace, TIER_CONFIG_MAP_NAME)
            .await?
            .ok_or_else(|| Error::TierConfig(format!("{TIER_CONFIG_MAP_NAME} ConfigMap not found")))?;

        let raw = data
            .get(TIER_CONFIG_MAP_KEY)
            .ok_or_else(|| Error::TierConfig(format!("ConfigMap missing key {TIER_CONFIG_MAP_KEY:?}")))?;

        let doc: TierDocument =
            serde_yaml::from_str(raw).map_err(|e| Error::TierConfig(format!("invalid tier YAML: {e}")))?;

        self.validate(&doc.tiers)?;

        let mut tiers = doc.tiers;
        for tier in &mut tiers {
            tier.groups.push(format!(
                "system:serviceaccounts:{}-tier-{}",
                self.instance, tier.name
            ));
        }
        // Highest level wins; stable sort preserves document order among ties.
        tiers.sort_by(|a, b| b.level.cmp(&a.level));
        Ok(tiers)
    }

    fn validate(&self, tiers: &[Tier]) -> Result<()> {
        let mut seen = HashSet::new();
        for tier in tiers {
            if tier.name.trim().is_empty() {
                return Err(Error::TierConfig("tier name must be non-empty".to_string()));
            }
            if !seen.insert(tier.name.clone()) {
                return Err(Error::TierConfig(format!("duplicate tier name {:?}", tier.name)));
            }
            if let Some(display) = &tier.display_name {
                if display.trim().is_empty() {
                    return Err(Error::TierConfig(format!(
                        "tier {:?} has a whitespace-only displayName",
                        tier.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Resolve the highest-level tier whose group set intersects `groups`.
    pub async fn tier_for(&self, groups: &[String]) -> Result<Tier> {
        let tiers = self.load_tiers().await?;
        let caller: BTreeSet<&str> = groups.iter().map(String::as_str).collect();

        for tier in tiers {
            if tier.groups.iter().any(|g| caller.contains(g.as_str())) {
                return Ok(tier);
            }
        }

        Err(Error::GroupNotFound {
            groups: groups.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::test_support::FakeControlPlane;
    use pretty_assertions::assert_eq;

    fn mapper_with_doc(yaml: &str) -> TierMapper<FakeControlPlane> {
        let fake = FakeControlPlane::new();
        fake.put_config_map(
            "control-plane",
            TIER_CONFIG_MAP_NAME,
            [(TIER_CONFIG_MAP_KEY.to_string(), yaml.to_string())].into(),
        );
        TierMapper::new(Arc::new(fake), "control-plane".to_string(), "acme".to_string())
    }

    const DOC: &str = r#"
tiers:
  - name: free
    level: 1
    groups: ["system:authenticated"]
  - name: premium
    level: 10
    groups: ["premium-users"]
"#;

    #[tokio::test]
    async fn premium_wins_over_free() {
        let mapper = mapper_with_doc(DOC);
        let tier = mapper
            .tier_for(&["system:authenticated".to_string(), "premium-users".to_string()])
            .await
            .unwrap();
        assert_eq!(tier.name, "premium");
    }

    #[tokio::test]
    async fn free_tier_alone() {
        let mapper = mapper_with_doc(DOC);
        let tier = mapper
            .tier_for(&["system:authenticated".to_string()])
            .await
            .unwrap();
        assert_eq!(tier.name, "free");
    }

    #[tokio::test]
    async fn no_match_is_group_not_found() {
        let mapper = mapper_with_doc(DOC);
        let err = mapper.tier_for(&["nobody".to_string()]).await.unwrap_err();
        assert!(matches!(err, Error::GroupNotFound { .. }));
    }

    #[tokio::test]
    async fn synthetic_sa_group_resolves_own_tier() {
        let mapper = mapper_with_doc(DOC);
        let tier = mapper
            .tier_for(&["system:serviceaccounts:acme-tier-premium".to_string()])
            .await
            .unwrap();
        assert_eq!(tier.name, "premium");
    }

    #[tokio::test]
    async fn duplicate_names_rejected() {
        let mapper = mapper_with_doc(
            r#"
tiers:
  - name: free
    level: 1
    groups: ["a"]
  - name: free
    level: 2
    groups: ["b"]
"#,
        );
        let err = mapper.tier_for(&["a".to_string()]).await.unwrap_err();
        assert!(matches!(err, Error::TierConfig(_)));
    }

    #[tokio::test]
    async fn whitespace_display_name_rejected() {
        let mapper = mapper_with_doc(
            r#"
tiers:
  - name: free
    level: 1
    groups: ["a"]
    displayName: "   "
"#,
        );
        let err = mapper.tier_for(&["a".to_string()]).await.unwrap_err();
        assert!(matches!(err, Error::TierConfig(_)));
    }
}
