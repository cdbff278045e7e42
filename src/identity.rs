//! Identity Extractor (C1): pulls the authenticated principal from
//! gateway-injected headers. Does not authenticate — trusts the ingress
//! gateway already did.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::auth_failure;
use crate::Error;

/// An authenticated caller, derived per-request and never persisted (§3.1).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    /// Non-empty, trimmed username header value.
    pub username: String,
    /// Group memberships, order preserved as received (duplicates tolerated).
    pub groups: Vec<String>,
}

impl Principal {
    /// Parse a principal from raw header values, applying C1's failure
    /// policy (§4.1): missing/empty username → `AUTH_FAILURE/001`, missing
    /// groups header → `AUTH_FAILURE/002`, unparseable groups JSON or an
    /// empty array → `AUTH_FAILURE/003`.
    pub fn from_headers(username: Option<&str>, groups_json: Option<&str>) -> Result<Self, Error> {
        let username = username
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or(Error::AuthFailure(auth_failure::MISSING_USERNAME))?
            .to_string();

        let groups_json = groups_json.ok_or(Error::AuthFailure(auth_failure::MISSING_GROUPS))?;

        let groups: Vec<String> = serde_json::from_str(groups_json)
            .map_err(|_| Error::AuthFailure(auth_failure::INVALID_GROUPS))?;
        if groups.is_empty() {
            return Err(Error::AuthFailure(auth_failure::INVALID_GROUPS));
        }

        Ok(Self { username, groups })
    }
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
    Config: FromRef<S>,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = Config::from_ref(state);

        let username = parts
            .headers
            .get(&config.username_header)
            .and_then(|v| v.to_str().ok());
        let groups = parts
            .headers
            .get(&config.groups_header)
            .and_then(|v| v.to_str().ok());

        // Never log raw header values above debug level (§4.1 side effects).
        tracing::debug!(username_present = username.is_some(), groups_present = groups.is_some(), "extracting principal");

        Self::from_headers(username, groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_username_is_001() {
        let err = Principal::from_headers(None, Some(r#"["a"]"#)).unwrap_err();
        assert!(matches!(err, Error::AuthFailure(auth_failure::MISSING_USERNAME)));
    }

    #[test]
    fn empty_username_is_001() {
        let err = Principal::from_headers(Some("   "), Some(r#"["a"]"#)).unwrap_err();
        assert!(matches!(err, Error::AuthFailure(auth_failure::MISSING_USERNAME)));
    }

    #[test]
    fn missing_groups_is_002() {
        let err = Principal::from_headers(Some("alice"), None).unwrap_err();
        assert!(matches!(err, Error::AuthFailure(auth_failure::MISSING_GROUPS)));
    }

    #[test]
    fn malformed_groups_json_is_003() {
        let err = Principal::from_headers(Some("alice"), Some("not-json")).unwrap_err();
        assert!(matches!(err, Error::AuthFailure(auth_failure::INVALID_GROUPS)));
    }

    #[test]
    fn empty_groups_array_is_003() {
        let err = Principal::from_headers(Some("alice"), Some("[]")).unwrap_err();
        assert!(matches!(err, Error::AuthFailure(auth_failure::INVALID_GROUPS)));
    }

    #[test]
    fn valid_headers_produce_principal() {
        let principal = Principal::from_headers(Some("alice"), Some(r#"["system:authenticated"]"#)).unwrap();
        assert_eq!(principal.username, "alice");
        assert_eq!(principal.groups, vec!["system:authenticated".to_string()]);
    }

    #[test]
    fn username_is_trimmed() {
        let principal = Principal::from_headers(Some("  alice  "), Some(r#"["a"]"#)).unwrap();
        assert_eq!(principal.username, "alice");
    }
}
