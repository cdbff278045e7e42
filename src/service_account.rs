//! Service-Account Lifecycle (C3): ensures a tier namespace and a per-user
//! Service Account exist, and revokes access by deleting the Service
//! Account.

use std::collections::BTreeMap;
use std::sync::Arc;

use sha1::{Digest, Sha1};

use crate::k8s::ControlPlane;
use crate::tier::Tier;
use crate::{Error, Result};

/// Standard label set applied to tier namespaces and Service Accounts (§3.1).
fn base_labels(instance: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("component".to_string(), "token-issuer".to_string());
    labels.insert("part-of".to_string(), "maas-api".to_string());
    labels.insert("instance".to_string(), instance.to_string());
    labels
}

/// Sanitize a username into a DNS-1123 label with a stable hash suffix, so
/// differently-cased or punctuated usernames that collide onto the same
/// base form still get distinct, collision-free Service Account names
/// (§3.1, §9 "do not drop the suffix").
///
/// # Errors
///
/// Returns [`Error::InvalidUsername`] if the sanitized base is empty.
pub fn sanitize_service_account_name(username: &str) -> Result<String> {
    let lower = username.to_lowercase();
    let mut cleaned = String::with_capacity(lower.len());
    let mut last_was_dash = false;
    for c in lower.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            cleaned.push(c);
            last_was_dash = false;
        } else if !last_was_dash {
            cleaned.push('-');
            last_was_dash = true;
        }
    }
    let base = cleaned.trim_matches('-');
    if base.is_empty() {
        return Err(Error::InvalidUsername(username.to_string()));
    }

    let mut hasher = Sha1::new();
    hasher.update(username.as_bytes());
    let digest = hasher.finalize();
    let suffix = hex::encode(&digest[..4]); // first 8 hex chars = 4 bytes

    // total length <= 63: base gets whatever's left after "-" + 8 hex chars.
    let max_base_len = 63 - 1 - suffix.len();
    let truncated_base: String = base.chars().take(max_base_len).collect();
    let truncated_base = truncated_base.trim_end_matches('-');
    if truncated_base.is_empty() {
        return Err(Error::InvalidUsername(username.to_string()));
    }

    Ok(format!("{truncated_base}-{suffix}"))
}

/// `ensureTierNamespace` + `ensureServiceAccount` + `revoke` (C3).
pub struct ServiceAccountLifecycle<C: ControlPlane> {
    control_plane: Arc<C>,
    instance: String,
}

impl<C: ControlPlane> ServiceAccountLifecycle<C> {
    /// Build a lifecycle manager for the given orchestrator and instance.
    pub fn new(control_plane: Arc<C>, instance: String) -> Self {
        Self {
            control_plane,
            instance,
        }
    }

    /// `{instance}-tier-{tier.name}`.
    #[must_use]
    pub fn tier_namespace_name(&self, tier: &Tier) -> String {
        format!("{}-tier-{}", self.instance, tier.name)
    }

    /// Ensure the tier namespace exists, creating it (with standard labels)
    /// if necessary. Idempotent under concurrent callers (§4.3, §5).
    pub async fn ensure_tier_namespace(&self, tier: &Tier) -> Result<String> {
        let name = self.tier_namespace_name(tier);
        if self.control_plane.namespace_exists(&name).await? {
            return Ok(name);
        }

        let mut labels = base_labels(&self.instance);
        labels.insert("tier".to_string(), tier.name.clone());
        labels.insert("tier-namespace".to_string(), "true".to_string());
        self.control_plane.create_namespace(&name, labels).await?;
        Ok(name)
    }

    /// Ensure a Service Account for `username` exists in `namespace`,
    /// creating it (with standard labels) if necessary. Idempotent; does
    /// not touch a pre-existing SA's ownership (§4.3).
    pub async fn ensure_service_account(
        &self,
        namespace: &str,
        username: &str,
        tier: &Tier,
    ) -> Result<String> {
        let sa_name = sanitize_service_account_name(username)?;
        if self
            .control_plane
            .service_account_exists(namespace, &sa_name)
            .await?
        {
            return Ok(sa_name);
        }

        let mut labels = base_labels(&self.instance);
        labels.insert("tier".to_string(), tier.name.clone());
        self.control_plane
            .create_service_account(namespace, &sa_name, labels)
            .await?;
        Ok(sa_name)
    }

    /// Revoke `username`'s access in `tier`: delete its Service Account
    /// (invalidating every token minted from it) and immediately recreate
    /// it, so the next token request does not race with SA creation in a
    /// hot-revoke loop (§4.3).
    pub async fn revoke(&self, username: &str, tier: &Tier) -> Result<()> {
        let namespace = self.ensure_tier_namespace(tier).await?;
        let sa_name = sanitize_service_account_name(username)?;

        if self
            .control_plane
            .service_account_exists(&namespace, &sa_name)
            .await?
        {
            self.control_plane
                .delete_service_account(&namespace, &sa_name)
                .await?;
        }

        self.ensure_service_account(&namespace, username, tier)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::test_support::FakeControlPlane;
    use pretty_assertions::assert_eq;

    fn tier(name: &str) -> Tier {
        Tier {
            name: name.to_string(),
            level: 1,
            groups: vec![],
            display_name: None,
            description: None,
        }
    }

    #[test]
    fn sanitize_lowercases_and_dashes() {
        let name = sanitize_service_account_name("Alice@Example.com").unwrap();
        assert!(name.starts_with("alice-example-com-"));
        assert!(name.len() <= 63);
    }

    #[test]
    fn sanitize_is_deterministic() {
        let a = sanitize_service_account_name("Bob.Smith").unwrap();
        let b = sanitize_service_account_name("Bob.Smith").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn sanitize_collapses_runs_and_trims() {
        let name = sanitize_service_account_name("--wild___user--").unwrap();
        assert!(!name.contains("__"));
        assert!(!name.starts_with('-'));
    }

    #[test]
    fn sanitize_rejects_empty_base() {
        let err = sanitize_service_account_name("???").unwrap_err();
        assert!(matches!(err, Error::InvalidUsername(_)));
    }

    #[test]
    fn sanitize_truncates_long_usernames_to_63_chars() {
        let long = "a".repeat(200);
        let name = sanitize_service_account_name(&long).unwrap();
        assert!(name.len() <= 63);
        assert!(name.ends_with(&hex::encode(&Sha1::digest(long.as_bytes())[..4])));
    }

    #[tokio::test]
    async fn ensure_namespace_is_idempotent() {
        let fake = Arc::new(FakeControlPlane::new());
        let lifecycle = ServiceAccountLifecycle::new(fake.clone(), "acme".to_string());
        let t = tier("free");

        let first = lifecycle.ensure_tier_namespace(&t).await.unwrap();
        let second = lifecycle.ensure_tier_namespace(&t).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, "acme-tier-free");
        assert!(fake.namespace_present("acme-tier-free"));
    }

    #[tokio::test]
    async fn ensure_service_account_is_idempotent() {
        let fake = Arc::new(FakeControlPlane::new());
        let lifecycle = ServiceAccountLifecycle::new(fake.clone(), "acme".to_string());
        let t = tier("free");
        let ns = lifecycle.ensure_tier_namespace(&t).await.unwrap();

        let a = lifecycle.ensure_service_account(&ns, "alice", &t).await.unwrap();
        let b = lifecycle.ensure_service_account(&ns, "alice", &t).await.unwrap();
        assert_eq!(a, b);
        assert!(fake.service_account_present(&ns, &a));
    }

    #[tokio::test]
    async fn revoke_deletes_then_recreates_sa() {
        let fake = Arc::new(FakeControlPlane::new());
        let lifecycle = ServiceAccountLifecycle::new(fake.clone(), "acme".to_string());
        let t = tier("free");
        let ns = lifecycle.ensure_tier_namespace(&t).await.unwrap();
        let sa = lifecycle.ensure_service_account(&ns, "alice", &t).await.unwrap();
        assert!(fake.service_account_present(&ns, &sa));

        lifecycle.revoke("alice", &t).await.unwrap();
        assert!(fake.service_account_present(&ns, &sa));
    }

    #[tokio::test]
    async fn revoke_without_prior_sa_is_a_noop_success() {
        let fake = Arc::new(FakeControlPlane::new());
        let lifecycle = ServiceAccountLifecycle::new(fake, "acme".to_string());
        let t = tier("free");
        lifecycle.revoke("nobody-yet", &t).await.unwrap();
    }
}
