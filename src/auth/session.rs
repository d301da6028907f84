//! Token validity, refresh, revocation and logout
//!
//! [`SessionManager`] is the façade the protocol server consults before every
//! tool call.  Unlike the grant flows, none of its operations return errors:
//! failures are logged and resolve to `None` / `false` / `true`-for-expired
//! so that callers always land on a fail-secure decision.
//!
//! The store is the only source of truth; every check reads it afresh.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::auth::claims::{domain_from_token, JwtClaimsDecoder, TokenDecoder};
use crate::auth::{post_form, ProviderEndpoints, TokenReply};
use crate::credentials::{now_millis, Credentials};
use crate::redact::token_preview;
use crate::store::{CredentialStore, Slot, SlotResult};

/// Default window before expiry in which a token already counts as stale.
pub const DEFAULT_EXPIRY_BUFFER_SECONDS: u64 = 300;

/// What to do when the stored access token is stale on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
    /// Return nothing and tell the operator to re-run `init`.
    #[default]
    Reauthenticate,
    /// Exchange the refresh token inline and return the new access token.
    AutoRefresh,
}

/// Outcome of [`SessionManager::logout`].
#[derive(Debug, Clone)]
pub struct LogoutReport {
    /// Whether the refresh token was revoked (or there was none).
    pub revoked: bool,
    /// One entry per storage slot.
    pub slots: Vec<SlotResult>,
}

impl LogoutReport {
    /// Number of slots that were cleared.
    pub fn cleared(&self) -> usize {
        self.slots.iter().filter(|r| r.success).count()
    }

    /// Slots that could not be cleared and need manual cleanup.
    pub fn failures(&self) -> impl Iterator<Item = &SlotResult> {
        self.slots.iter().filter(|r| !r.success)
    }

    /// `true` when every slot was cleared.
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(|r| r.success)
    }
}

/// Displayable summary of the stored session; never holds raw secrets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    /// Tenant domain.
    pub domain: String,
    /// Masked access token.
    pub token_preview: String,
    /// Stored expiry, epoch milliseconds.
    pub expires_at: Option<i64>,
    /// Whether a refresh token is stored.
    pub has_refresh_token: bool,
    /// Whether the token is stale under the configured buffer.
    pub expired: bool,
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

/// Expiry-aware access to the stored session.
///
/// # Examples
///
/// ```
/// use credential_broker::auth::ProviderEndpoints;
/// use credential_broker::auth::session::SessionManager;
/// use credential_broker::store::CredentialStore;
///
/// let manager = SessionManager::new(
///     reqwest::Client::new(),
///     ProviderEndpoints::for_domain("tenant.example.com").unwrap(),
///     "client-id",
///     CredentialStore::in_memory(),
/// );
/// // Nothing stored: fail secure.
/// assert!(manager.is_token_expired(300));
/// ```
pub struct SessionManager {
    http: reqwest::Client,
    endpoints: ProviderEndpoints,
    client_id: String,
    store: CredentialStore,
    decoder: Arc<dyn TokenDecoder>,
    policy: RefreshPolicy,
    expiry_buffer_seconds: u64,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl SessionManager {
    /// Creates a manager with the `Reauthenticate` policy and a 300 s buffer.
    pub fn new(
        http: reqwest::Client,
        endpoints: ProviderEndpoints,
        client_id: impl Into<String>,
        store: CredentialStore,
    ) -> Self {
        Self {
            http,
            endpoints,
            client_id: client_id.into(),
            store,
            decoder: Arc::new(JwtClaimsDecoder),
            policy: RefreshPolicy::default(),
            expiry_buffer_seconds: DEFAULT_EXPIRY_BUFFER_SECONDS,
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Sets the stale-on-read policy.
    pub fn with_policy(mut self, policy: RefreshPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the buffer used by [`is_expired`](Self::is_expired).
    pub fn with_expiry_buffer(mut self, seconds: u64) -> Self {
        self.expiry_buffer_seconds = seconds;
        self
    }

    /// Replaces the claim decoder used for domain derivation on refresh.
    pub fn with_decoder(mut self, decoder: Arc<dyn TokenDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// The configured policy.
    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    /// Returns `true` unless a readable expiry lies more than
    /// `buffer_seconds` in the future.
    ///
    /// A missing expiry, an unparsable expiry and a store read failure all
    /// count as expired.
    pub fn is_token_expired(&self, buffer_seconds: u64) -> bool {
        match self.store.expires_at() {
            Ok(Some(expires_at)) => {
                let buffer_ms = i64::try_from(buffer_seconds)
                    .unwrap_or(i64::MAX / 1000)
                    .saturating_mul(1000);
                now_millis().saturating_add(buffer_ms) >= expires_at
            }
            Ok(None) => {
                tracing::debug!("No token expiry recorded; treating token as expired");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not read token expiry; treating token as expired");
                true
            }
        }
    }

    /// [`is_token_expired`](Self::is_token_expired) with the configured buffer.
    pub fn is_expired(&self) -> bool {
        self.is_token_expired(self.expiry_buffer_seconds)
    }

    /// Exchanges the stored refresh token for a new access token.
    ///
    /// Returns `None` without a request when no refresh token is stored, and
    /// `None` when the provider answers with an error, the request fails, or
    /// the new access token cannot be stored.  Concurrent callers are
    /// serialized.
    pub async fn refresh_access_token(&self) -> Option<String> {
        // One refresh exchange in flight at a time.
        let _in_flight = self.refresh_lock.lock().await;

        let refresh_token = match self.store.get(Slot::RefreshToken) {
            Some(token) if !token.is_empty() => token,
            _ => {
                tracing::debug!("No refresh token stored; refresh not possible");
                return None;
            }
        };

        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("refresh_token", refresh_token.as_str()),
        ];
        let body = match post_form(&self.http, &self.endpoints.token, &params).await {
            Ok((_status, body)) => body,
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh request failed");
                return None;
            }
        };

        let tokens = match TokenReply::from_json(&body) {
            Ok(TokenReply::Issued(tokens)) => tokens,
            Ok(TokenReply::Rejected { error, description }) => {
                tracing::warn!(
                    error = %error,
                    description = description.as_deref().unwrap_or(""),
                    "Token refresh rejected by provider"
                );
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh returned an unusable response");
                return None;
            }
        };

        let domain = domain_from_token(self.decoder.as_ref(), &tokens.access_token);
        if !self.store.apply_refresh(&tokens, domain.as_deref()) {
            tracing::warn!("Refreshed token could not be fully stored");
            return None;
        }

        tracing::info!(
            token = %token_preview(&tokens.access_token),
            rotated = tokens.refresh_token.is_some(),
            "Access token refreshed"
        );
        Some(tokens.access_token)
    }

    /// Returns the stored access token when it is still valid.
    ///
    /// When stale, the configured [`RefreshPolicy`] decides between returning
    /// `None` with re-authentication guidance and refreshing inline.
    pub async fn get_valid_access_token(&self) -> Option<String> {
        let token = self.store.get(Slot::AccessToken).filter(|t| !t.is_empty());
        if token.is_none() {
            tracing::warn!("No access token stored. Run `credbroker init` to authorize.");
            return None;
        }
        if !self.is_expired() {
            return token;
        }

        match self.policy {
            RefreshPolicy::Reauthenticate => {
                tracing::warn!(
                    "Access token is expired or about to expire. Run `credbroker init` to re-authorize."
                );
                None
            }
            RefreshPolicy::AutoRefresh => {
                tracing::info!("Access token is stale; attempting refresh");
                let refreshed = self.refresh_access_token().await;
                if refreshed.is_none() {
                    tracing::warn!("Token refresh failed. Run `credbroker init` to re-authorize.");
                }
                refreshed
            }
        }
    }

    /// Like [`get_valid_access_token`](Self::get_valid_access_token) but
    /// paired with the stored domain.
    pub async fn get_valid_credentials(&self) -> Option<Credentials> {
        let access_token = self.get_valid_access_token().await?;
        match self.store.get(Slot::Domain).filter(|d| !d.is_empty()) {
            Some(domain) => Some(Credentials {
                access_token,
                domain,
            }),
            None => {
                tracing::warn!("Stored session has no domain. Run `credbroker init` to re-authorize.");
                None
            }
        }
    }

    /// Revokes the stored refresh token at the provider.
    ///
    /// Succeeds trivially when nothing is stored; otherwise only an HTTP 200
    /// counts as success.
    pub async fn revoke_refresh_token(&self) -> bool {
        let refresh_token = match self.store.get(Slot::RefreshToken) {
            Some(token) if !token.is_empty() => token,
            _ => {
                tracing::debug!("No refresh token stored; nothing to revoke");
                return true;
            }
        };

        let params = [
            ("client_id", self.client_id.as_str()),
            ("token", refresh_token.as_str()),
        ];
        let result = self
            .http
            .post(self.endpoints.revoke.clone())
            .form(&params)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status() == reqwest::StatusCode::OK => {
                tracing::info!("Refresh token revoked");
                true
            }
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "Refresh token revocation rejected");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Refresh token revocation request failed");
                false
            }
        }
    }

    /// Revokes remotely (best-effort) and then clears every local slot.
    pub async fn logout(&self) -> LogoutReport {
        let revoked = self.revoke_refresh_token().await;
        if !revoked {
            tracing::warn!("Continuing logout without remote revocation");
        }
        let slots = self.store.delete_all();
        LogoutReport { revoked, slots }
    }

    /// Summarizes the stored session, or `None` when there is none.
    pub fn session_status(&self) -> Option<SessionStatus> {
        let credentials = self.store.credentials()?;
        Some(SessionStatus {
            domain: credentials.domain,
            token_preview: token_preview(&credentials.access_token),
            expires_at: self.store.expires_at().ok().flatten(),
            has_refresh_token: self
                .store
                .get(Slot::RefreshToken)
                .map_or(false, |t| !t.is_empty()),
            expired: self.is_expired(),
        })
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("endpoints", &self.endpoints)
            .field("client_id", &self.client_id)
            .field("policy", &self.policy)
            .field("expiry_buffer_seconds", &self.expiry_buffer_seconds)
            .finish_non_exhaustive()
    }
}
