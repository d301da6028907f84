//! Token claim decoding
//!
//! Access tokens are treated as issuer-trusted: the payload of a JWT is
//! decoded for its claims but the signature is never verified.  Opaque
//! (non-JWT) tokens simply decode to `None`.

use base64::Engine as _;
use serde_json::Value;
use url::Url;

/// Claims extracted from an access token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenClaims {
    /// `sub` claim.
    pub subject: Option<String>,
    /// `exp` claim, epoch seconds.
    pub expires_at: Option<i64>,
    /// Union of the space-separated `scope` claim and the `permissions` array.
    pub scopes: Vec<String>,
    /// `aud` claim, normalized to a list.
    pub audiences: Vec<String>,
}

impl TokenClaims {
    /// Returns `true` when `scope` was granted.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Capability to turn a bearer token into claims.
pub trait TokenDecoder: Send + Sync {
    /// Decodes `token`, or `None` when it carries no readable claims.
    fn decode(&self, token: &str) -> Option<TokenClaims>;
}

/// Decodes the payload segment of a JWT without verifying its signature.
#[derive(Debug, Clone, Copy, Default)]
pub struct JwtClaimsDecoder;

impl TokenDecoder for JwtClaimsDecoder {
    fn decode(&self, token: &str) -> Option<TokenClaims> {
        let payload = decode_payload(token)?;

        let mut scopes: Vec<String> = payload
            .get("scope")
            .and_then(Value::as_str)
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        if let Some(permissions) = payload.get("permissions").and_then(Value::as_array) {
            for permission in permissions.iter().filter_map(Value::as_str) {
                if !scopes.iter().any(|s| s == permission) {
                    scopes.push(permission.to_string());
                }
            }
        }

        let audiences = match payload.get("aud") {
            Some(Value::String(aud)) => vec![aud.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };

        Some(TokenClaims {
            subject: payload
                .get("sub")
                .and_then(Value::as_str)
                .map(str::to_string),
            expires_at: payload.get("exp").and_then(Value::as_i64),
            scopes,
            audiences,
        })
    }
}

fn decode_payload(token: &str) -> Option<Value> {
    let mut segments = token.split('.');
    let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        return None;
    }
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let value: Value = serde_json::from_slice(&bytes).ok()?;
    value.is_object().then_some(value)
}

/// Path suffix identifying the tenant's management API audience.
const MANAGEMENT_API_PATH: &str = "/api/v2/";

/// Derives the tenant domain from a token's audience claim.
///
/// The first audience of the form `https://<tenant>/api/v2/` names the
/// tenant; its host is returned.
///
/// # Examples
///
/// ```
/// use credential_broker::auth::claims::{tenant_domain, TokenClaims};
///
/// let claims = TokenClaims {
///     audiences: vec![
///         "https://tenant.example.com/userinfo".to_string(),
///         "https://tenant.example.com/api/v2/".to_string(),
///     ],
///     ..Default::default()
/// };
/// assert_eq!(tenant_domain(&claims).as_deref(), Some("tenant.example.com"));
/// ```
pub fn tenant_domain(claims: &TokenClaims) -> Option<String> {
    claims.audiences.iter().find_map(|aud| {
        let url = Url::parse(aud).ok()?;
        if !url.path().ends_with(MANAGEMENT_API_PATH) {
            return None;
        }
        url.host_str().map(str::to_string)
    })
}

/// Decodes `token` with `decoder` and derives its tenant domain.
pub fn domain_from_token(decoder: &dyn TokenDecoder, token: &str) -> Option<String> {
    decoder.decode(token).as_ref().and_then(tenant_domain)
}
