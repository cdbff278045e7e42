//! Token Issuer (C4): mints a short-lived, audience-bound Service Account
//! token and parses its claims — signature verification is the
//! orchestrator's token-review path's job, not this crate's (§4.4, §9).

use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::identity::Principal;
use crate::k8s::ControlPlane;
use crate::service_account::ServiceAccountLifecycle;
use crate::tier::TierMapper;
use crate::{Error, Result};

/// A requested `expiration` field accepts either a bare number of seconds
/// or a duration string (§6.2).
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ExpirationInput {
    /// Non-negative integer seconds.
    Seconds(i64),
    /// A duration string (`"15m"`, `"1h30m"`, `"0"`, ...).
    Text(String),
}

/// Request body for `POST /v1/tokens` (§6.1).
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TokenRequestBody {
    /// Requested token lifetime. Omitted or `0`/`"0"` means the configured default.
    #[serde(default)]
    pub expiration: Option<ExpirationInput>,
}

/// Result of a successful token issuance (§3.1, §6.1).
#[derive(Clone, Debug, Serialize)]
pub struct Token {
    /// Opaque bearer token (JWT).
    pub token: String,
    /// The resolved requested duration, formatted compactly (e.g. `"15m"`).
    pub expiration: String,
    /// Absolute expiry, Unix seconds (from the `exp` claim).
    #[serde(rename = "expiresAt")]
    pub expires_at: i64,
    /// Absolute issuance time, Unix seconds (from the required `iat` claim).
    #[serde(rename = "issuedAt")]
    pub issued_at: i64,
    /// Token identifier, from the `jti` claim or locally generated.
    pub jti: String,
}

/// Unverified JWT claims relevant to C4 (§4.4).
#[derive(Debug, Deserialize)]
struct Claims {
    iat: Option<i64>,
    exp: Option<i64>,
    jti: Option<String>,
    #[serde(default)]
    aud: AudienceClaim,
}

/// `aud` may be a single string or an array of strings.
#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum AudienceClaim {
    #[default]
    None,
    Single(String),
    Many(Vec<String>),
}

impl AudienceClaim {
    fn contains(&self, audience: &str) -> bool {
        match self {
            Self::None => false,
            Self::Single(s) => s == audience,
            Self::Many(v) => v.iter().any(|a| a == audience),
        }
    }
}

/// Split a JWT into header/payload/signature parts, decoding the payload.
fn decode_claims(jwt: &str) -> Result<Claims> {
    let payload_b64 = jwt
        .split('.')
        .nth(1)
        .ok_or_else(|| Error::TokenClaims("malformed JWT: expected 3 dot-separated parts"))?;
    let bytes = base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, payload_b64)
        .map_err(|_| Error::TokenClaims("malformed JWT: payload is not valid base64url"))?;
    serde_json::from_slice(&bytes).map_err(Error::Json)
}

/// Parse the JWT payload (no signature verification) and report whether
/// `audience` appears in the `aud` claim. Advisory only (§4.4).
pub fn has_valid_audience(jwt: &str, audience: &str) -> bool {
    decode_claims(jwt)
        .map(|claims| claims.aud.contains(audience))
        .unwrap_or(false)
}

static DURATION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d+(?:\.\d+)?)(h|m|s)$").unwrap());
static COMPOUND_DURATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)(h|m|s)").unwrap());

/// Parse a duration string per §6.2: `^[0-9]+(\.[0-9]+)?[smh]$` or a
/// Go-style compound like `1h30m45s` / `1.5h`.
fn parse_duration_string(raw: &str) -> Result<Duration> {
    let invalid = || Error::InvalidDuration {
        message: format!("invalid duration \"{raw}\": must be a positive number ending in s, m, or h"),
        provided: Some(raw.to_string()),
    };

    if raw.trim() != raw || raw.is_empty() {
        return Err(invalid());
    }

    // Fast path: a single `<number><unit>` token (also matches compound regex,
    // but keeping this explicit documents the common case from §6.2).
    if DURATION_TOKEN.is_match(raw) {
        return parse_compound(raw).ok_or_else(invalid);
    }

    // Reject anything that isn't made entirely of `<number><unit>` tokens
    // back-to-back (e.g. `1h30m45s`); a stray suffix or separator fails.
    let reconstructed: String = COMPOUND_DURATION
        .find_iter(raw)
        .map(|m| m.as_str())
        .collect();
    if reconstructed != raw {
        return Err(invalid());
    }

    parse_compound(raw).ok_or_else(invalid)
}

fn parse_compound(raw: &str) -> Option<Duration> {
    let mut total = 0.0f64;
    let mut matched_any = false;
    for cap in COMPOUND_DURATION.captures_iter(raw) {
        matched_any = true;
        let amount: f64 = cap[1].parse().ok()?;
        let seconds = match cap[2].to_ascii_lowercase().as_str() {
            "h" => amount * 3600.0,
            "m" => amount * 60.0,
            "s" => amount,
            _ => return None,
        };
        total += seconds;
    }
    if !matched_any {
        return None;
    }
    Some(Duration::from_secs_f64(total))
}

/// Resolve the caller's requested expiration into a validated [`Duration`],
/// applying §6.2's defaulting and §4.4's minimum-TTL rejection.
pub fn resolve_expiration(
    input: Option<ExpirationInput>,
    default_ttl: Duration,
    min_ttl: Duration,
) -> Result<Duration> {
    let duration = match input {
        None => default_ttl,
        Some(ExpirationInput::Seconds(n)) => {
            if n < 0 {
                return Err(Error::InvalidDuration {
                    message: format!(
                        "invalid duration \"{n}\": must be a positive number ending in s, m, or h"
                    ),
                    provided: Some(n.to_string()),
                });
            }
            if n == 0 {
                default_ttl
            } else {
                Duration::from_secs(n as u64)
            }
        }
        Some(ExpirationInput::Text(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed == "0" {
                default_ttl
            } else {
                parse_duration_string(trimmed)?
            }
        }
    };

    if duration < min_ttl {
        return Err(Error::DurationTooShort {
            provided: format_go_duration(duration),
        });
    }

    Ok(duration)
}

/// Format a `Duration` the way Go's `time.Duration.String()` would (all
/// components down to seconds, including trailing zeros) — used only for
/// the `provided_expiration` field on a too-short rejection (§8 Scenario C).
fn format_go_duration(d: Duration) -> String {
    let total = d.as_secs();
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;
    if h > 0 {
        format!("{h}h{m}m{s}s")
    } else if m > 0 {
        format!("{m}m{s}s")
    } else {
        format!("{s}s")
    }
}

/// Format a `Duration` compactly, dropping trailing zero-valued components
/// (`4h0m0s` → `4h`, `15m0s` → `15m`) — used for the success-path
/// `expiration` field so an accepted `"15m"` round-trips as `"15m"`.
fn format_compact_duration(d: Duration) -> String {
    let total = d.as_secs();
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;

    let mut parts = Vec::new();
    if h > 0 {
        parts.push(format!("{h}h"));
    }
    if h > 0 || m > 0 {
        parts.push(format!("{m}m"));
    }
    parts.push(format!("{s}s"));

    while parts.len() > 1 && parts.last().is_some_and(|p| p.starts_with('0')) {
        parts.pop();
    }
    parts.concat()
}

/// Generate a locally-assigned `jti` fallback: 16 random bytes, hex-encoded (§3.1).
fn generate_jti() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// `issue(principal, requestedTTL) → Token | error` (C4).
pub struct TokenIssuer<C: ControlPlane> {
    control_plane: Arc<C>,
    tier_mapper: TierMapper<C>,
    lifecycle: ServiceAccountLifecycle<C>,
    audience: String,
    default_ttl: Duration,
    min_ttl: Duration,
}

impl<C: ControlPlane> TokenIssuer<C> {
    /// Build an issuer sharing the given `ControlPlane` across C2–C4.
    pub fn new(
        control_plane: Arc<C>,
        control_plane_namespace: String,
        instance: String,
        audience: String,
        default_ttl: Duration,
        min_ttl: Duration,
    ) -> Self {
        let tier_mapper = TierMapper::new(control_plane.clone(), control_plane_namespace, instance.clone());
        let lifecycle = ServiceAccountLifecycle::new(control_plane.clone(), instance);
        Self {
            control_plane,
            tier_mapper,
            lifecycle,
            audience,
            default_ttl,
            min_ttl,
        }
    }

    /// Resolve tier (C2) → ensure namespace + SA (C3) → mint token (C4).
    pub async fn issue(&self, principal: &Principal, requested: Option<ExpirationInput>) -> Result<Token> {
        let duration = resolve_expiration(requested, self.default_ttl, self.min_ttl)?;

        let tier = self.tier_mapper.tier_for(&principal.groups).await?;
        let namespace = self.lifecycle.ensure_tier_namespace(&tier).await?;
        let sa_name = self
            .lifecycle
            .ensure_service_account(&namespace, &principal.username, &tier)
            .await?;

        let jwt = self
            .control_plane
            .create_token(
                &namespace,
                &sa_name,
                vec![self.audience.clone()],
                duration.as_secs() as i64,
            )
            .await?;

        let claims = decode_claims(&jwt)?;
        let issued_at = claims.iat.ok_or(Error::TokenClaims("iat"))?;
        let expires_at = claims.exp.unwrap_or(issued_at + duration.as_secs() as i64);
        let jti = claims.jti.unwrap_or_else(generate_jti);

        Ok(Token {
            token: jwt,
            expiration: format_compact_duration(duration),
            expires_at,
            issued_at,
            jti,
        })
    }
}
