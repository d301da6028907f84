//! Per-request authorization decisions
//!
//! The protocol server calls [`AuthorizationGate::is_authorized`] before every
//! tool call.  The gate is polymorphic over the configured [`AuthScheme`]:
//!
//! - `none`: open/local access, every request is allowed.
//! - `bearer`: an `Authorization: Bearer <token>` header, falling back to the
//!   locally stored session when no header is sent.  Required scopes are
//!   verified against the token's decoded claims.
//! - `api-key`: a shared secret, bare or in bearer form.
//!
//! Anything else denies.  Denials and scope checks are logged for audit with a
//! token preview only.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::auth::claims::{JwtClaimsDecoder, TokenDecoder};
use crate::auth::session::SessionManager;
use crate::redact::token_preview;

// ---------------------------------------------------------------------------
// AuthScheme
// ---------------------------------------------------------------------------

/// Declared authorization scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AuthScheme {
    /// Always authorized.
    None,
    /// Bearer token, optionally pinned to an expected value.
    Bearer,
    /// Shared secret.
    ApiKey,
    /// Unrecognized name; always denies.
    Unknown(String),
}

impl AuthScheme {
    /// The canonical configuration name.
    pub fn as_str(&self) -> &str {
        match self {
            AuthScheme::None => "none",
            AuthScheme::Bearer => "bearer",
            AuthScheme::ApiKey => "api-key",
            AuthScheme::Unknown(name) => name.as_str(),
        }
    }
}

impl FromStr for AuthScheme {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "none" => AuthScheme::None,
            "bearer" => AuthScheme::Bearer,
            "api-key" | "api_key" | "apikey" => AuthScheme::ApiKey,
            _ => AuthScheme::Unknown(s.to_string()),
        })
    }
}

impl From<String> for AuthScheme {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(scheme) => scheme,
            Err(never) => match never {},
        }
    }
}

impl From<AuthScheme> for String {
    fn from(value: AuthScheme) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extracts the token from a `Bearer <token>` header value.
///
/// The scheme name is case-insensitive; the token must be non-empty.
///
/// # Examples
///
/// ```
/// use credential_broker::gate::parse_bearer;
///
/// assert_eq!(parse_bearer("Bearer abc"), Some("abc"));
/// assert_eq!(parse_bearer("bearer   abc "), Some("abc"));
/// assert_eq!(parse_bearer("Basic abc"), None);
/// assert_eq!(parse_bearer("Bearer "), None);
/// ```
pub fn parse_bearer(header: &str) -> Option<&str> {
    let header = header.trim();
    let (scheme, token) = header.split_once(char::is_whitespace)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty() && !token.contains(char::is_whitespace)).then_some(token)
}

/// Compares two secrets without short-circuiting on the first differing byte.
fn secrets_match(provided: &str, expected: &str) -> bool {
    let a = Sha256::digest(provided.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ---------------------------------------------------------------------------
// AuthorizationGate
// ---------------------------------------------------------------------------

/// Decides whether a protocol request may proceed.
///
/// # Examples
///
/// ```
/// use credential_broker::gate::{AuthScheme, AuthorizationGate};
///
/// # async fn example() {
/// let gate = AuthorizationGate::new(AuthScheme::Bearer).with_expected_token("abc");
/// assert!(gate.is_authorized(&[], Some("Bearer abc")).await);
/// assert!(!gate.is_authorized(&[], Some("Bearer xyz")).await);
/// # }
/// ```
pub struct AuthorizationGate {
    scheme: AuthScheme,
    expected_token: Option<String>,
    api_key: Option<String>,
    decoder: Arc<dyn TokenDecoder>,
    sessions: Option<Arc<SessionManager>>,
}

impl AuthorizationGate {
    /// Creates a gate for `scheme` with no pinned token, no API key and no
    /// stored-session fallback.
    pub fn new(scheme: AuthScheme) -> Self {
        Self {
            scheme,
            expected_token: None,
            api_key: None,
            decoder: Arc::new(JwtClaimsDecoder),
            sessions: None,
        }
    }

    /// Pins bearer requests to exactly this token.
    pub fn with_expected_token(mut self, token: impl Into<String>) -> Self {
        self.expected_token = Some(token.into());
        self
    }

    /// Sets the shared secret for the `api-key` scheme.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Uses the stored session when a bearer request carries no header.
    pub fn with_session_fallback(mut self, sessions: Arc<SessionManager>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Replaces the decoder used for scope verification.
    pub fn with_decoder(mut self, decoder: Arc<dyn TokenDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// The configured scheme.
    pub fn scheme(&self) -> &AuthScheme {
        &self.scheme
    }

    /// Returns `true` when a request carrying `auth_header` may run a tool
    /// that needs `required_scopes`.
    pub async fn is_authorized(&self, required_scopes: &[String], auth_header: Option<&str>) -> bool {
        match &self.scheme {
            AuthScheme::None => true,
            AuthScheme::Bearer => self.check_bearer(required_scopes, auth_header).await,
            AuthScheme::ApiKey => self.check_api_key(auth_header),
            AuthScheme::Unknown(name) => {
                tracing::warn!(scheme = %name, "Unknown authorization scheme; denying request");
                false
            }
        }
    }

    async fn check_bearer(&self, required_scopes: &[String], auth_header: Option<&str>) -> bool {
        let token = match auth_header {
            Some(header) => match parse_bearer(header) {
                Some(token) => token.to_string(),
                None => {
                    tracing::warn!("Denied: Authorization header is not a bearer token");
                    return false;
                }
            },
            None => match self.stored_token().await {
                Some(token) => token,
                None => {
                    tracing::warn!("Denied: no Authorization header and no valid stored session");
                    return false;
                }
            },
        };

        if let Some(expected) = &self.expected_token {
            if !secrets_match(&token, expected) {
                tracing::warn!(token = %token_preview(&token), "Denied: bearer token mismatch");
                return false;
            }
        }

        self.check_scopes(&token, required_scopes)
    }

    async fn stored_token(&self) -> Option<String> {
        let sessions = self.sessions.as_ref()?;
        sessions.get_valid_access_token().await
    }

    fn check_scopes(&self, token: &str, required_scopes: &[String]) -> bool {
        if required_scopes.is_empty() {
            return true;
        }

        let claims = match self.decoder.decode(token) {
            Some(claims) => claims,
            None => {
                tracing::warn!(
                    token = %token_preview(token),
                    required = ?required_scopes,
                    "Denied: token claims unreadable, cannot verify scopes"
                );
                return false;
            }
        };

        let missing: Vec<&String> = required_scopes
            .iter()
            .filter(|scope| !claims.has_scope(scope))
            .collect();
        if missing.is_empty() {
            tracing::debug!(required = ?required_scopes, "Scope check passed");
            true
        } else {
            tracing::warn!(
                token = %token_preview(token),
                missing = ?missing,
                "Denied: token lacks required scopes"
            );
            false
        }
    }

    fn check_api_key(&self, auth_header: Option<&str>) -> bool {
        let expected = match &self.api_key {
            Some(key) if !key.is_empty() => key,
            _ => {
                tracing::warn!("Denied: api-key scheme configured without a key");
                return false;
            }
        };
        let provided = match auth_header {
            Some(header) => parse_bearer(header).unwrap_or_else(|| header.trim()),
            None => {
                tracing::warn!("Denied: no API key supplied");
                return false;
            }
        };
        if secrets_match(provided, expected) {
            true
        } else {
            tracing::warn!(key = %token_preview(provided), "Denied: API key mismatch");
            false
        }
    }
}

impl fmt::Debug for AuthorizationGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationGate")
            .field("scheme", &self.scheme)
            .field("expected_token", &self.expected_token.as_ref().map(|_| "[REDACTED]"))
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("session_fallback", &self.sessions.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_from_str() {
        assert_eq!("none".parse::<AuthScheme>().unwrap(), AuthScheme::None);
        assert_eq!("Bearer".parse::<AuthScheme>().unwrap(), AuthScheme::Bearer);
        assert_eq!("api-key".parse::<AuthScheme>().unwrap(), AuthScheme::ApiKey);
        assert_eq!("api_key".parse::<AuthScheme>().unwrap(), AuthScheme::ApiKey);
        assert_eq!(
            "oauth".parse::<AuthScheme>().unwrap(),
            AuthScheme::Unknown("oauth".to_string())
        );
    }

    #[test]
    fn test_scheme_serde_roundtrip_through_strings() {
        let scheme: AuthScheme = serde_yaml::from_str("api-key").unwrap();
        assert_eq!(scheme, AuthScheme::ApiKey);
        let yaml = serde_yaml::to_string(&AuthScheme::None).unwrap();
        assert!(yaml.contains("none"));
    }

    #[test]
    fn test_parse_bearer_rejects_malformed() {
        assert_eq!(parse_bearer("abc"), None);
        assert_eq!(parse_bearer("Bearer"), None);
        assert_eq!(parse_bearer("Bearer a b"), None);
        assert_eq!(parse_bearer("Token abc"), None);
    }

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match("abc", "abc"));
        assert!(!secrets_match("abc", "abd"));
        assert!(!secrets_match("abc", "abcd"));
    }

    #[tokio::test]
    async fn test_unknown_scheme_denies() {
        let gate = AuthorizationGate::new(AuthScheme::Unknown("mtls".to_string()));
        assert!(!gate.is_authorized(&[], Some("Bearer abc")).await);
    }

    #[tokio::test]
    async fn test_api_key_without_configured_key_denies() {
        let gate = AuthorizationGate::new(AuthScheme::ApiKey);
        assert!(!gate.is_authorized(&[], Some("anything")).await);
    }

    #[test]
    fn test_debug_hides_secrets() {
        let gate = AuthorizationGate::new(AuthScheme::Bearer)
            .with_expected_token("pinned-token-value")
            .with_api_key("shared-key-value");
        let rendered = format!("{:?}", gate);
        assert!(!rendered.contains("pinned-token-value"));
        assert!(!rendered.contains("shared-key-value"));
    }
}
