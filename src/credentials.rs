//! Credential value types shared by the store, the grant flows and the gate
//!
//! [`TokenSet`] is what a token endpoint hands back; [`Credentials`] is the
//! resolved value object passed to tool dispatch.

use chrono::Utc;
use serde::Deserialize;

use crate::redact::token_preview;

/// A resolved session: bearer token plus the tenant domain it belongs to.
///
/// Components that call the remote API receive this value explicitly rather
/// than reading process environment variables.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Opaque bearer value for API calls.
    pub access_token: String,

    /// Tenant/resource identifier the token was issued for.
    pub domain: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &token_preview(&self.access_token))
            .field("domain", &self.domain)
            .finish()
    }
}

/// Successful token endpoint response.
///
/// Only `access_token` is mandatory; everything else depends on the grant and
/// the provider configuration.
#[derive(Clone, Deserialize)]
pub struct TokenSet {
    /// The issued access token.
    pub access_token: String,

    /// Present only when the grant included offline access, or when the
    /// provider rotates refresh tokens.
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Lifetime of the access token in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,

    /// Space-separated granted scopes.
    #[serde(default)]
    pub scope: Option<String>,

    /// Usually `"Bearer"`.
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenSet {
    /// Absolute expiry in epoch milliseconds, computed from `expires_in`.
    ///
    /// # Examples
    ///
    /// ```
    /// use credential_broker::credentials::TokenSet;
    ///
    /// let tokens: TokenSet = serde_json::from_value(serde_json::json!({
    ///     "access_token": "abc",
    ///     "expires_in": 60
    /// }))
    /// .unwrap();
    /// assert_eq!(tokens.expires_at_ms(1_000), Some(61_000));
    /// ```
    pub fn expires_at_ms(&self, now_ms: i64) -> Option<i64> {
        self.expires_in.map(|secs| {
            let millis = i64::try_from(secs)
                .unwrap_or(i64::MAX)
                .saturating_mul(1000);
            now_ms.saturating_add(millis)
        })
    }
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &token_preview(&self.access_token))
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
