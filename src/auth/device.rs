//! OAuth 2.0 device authorization grant (RFC 8628)
//!
//! The flow moves through the states of [`DeviceFlowState`]:
//!
//! 1. `Init` -> `CodeRequested`: POST the client id, optional audience and
//!    space-joined scopes to the device code endpoint.
//! 2. `CodeRequested` -> `AwaitingUserAuth`: show the user code and ask the
//!    operator before opening the verification page.
//! 3. Poll the token endpoint while the provider answers
//!    `authorization_pending`; each `slow_down` raises the interval for good.
//! 4. Finish in `Authorized`, `Denied`, `Expired`, `Error`, or, when the
//!    caller's cancellation token fires or the deadline passes, `Cancelled` /
//!    `TimedOut`.
//!
//! On success the token set is written to the [`CredentialStore`] together
//! with the tenant domain derived from the access token.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::claims::{domain_from_token, JwtClaimsDecoder, TokenDecoder};
use crate::auth::interaction::{validate_browser_url, UserInteraction};
use crate::auth::{
    describe_oauth_error, normalize_domain, post_form, ProviderEndpoints, TokenReply,
    DEVICE_CODE_GRANT_TYPE,
};
use crate::credentials::{Credentials, TokenSet};
use crate::error::{BrokerError, Result};
use crate::redact::token_preview;
use crate::store::CredentialStore;

/// Default delay between token endpoint polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Interval increase per `slow_down` answer (RFC 8628 section 3.5).
pub const SLOW_DOWN_INCREMENT: Duration = Duration::from_secs(5);

const CONSENT_PROMPT: &str =
    "Press Enter to open the authorization page in your browser (or type 'n' to skip): ";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Where a device flow currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFlowState {
    Init,
    CodeRequested,
    AwaitingUserAuth,
    Authorized,
    Denied,
    Expired,
    Error,
    Cancelled,
    TimedOut,
}

/// Settings for one device flow.
#[derive(Debug, Clone)]
pub struct DeviceFlowConfig {
    /// OAuth client identifier.
    pub client_id: String,

    /// Optional API audience sent with the device code request.
    pub audience: Option<String>,

    /// Domain stored when the issued token carries no tenant audience.
    pub fallback_domain: Option<String>,

    /// Minimum delay between polls.  A larger `interval` from the provider
    /// takes precedence.
    pub poll_interval: Duration,

    /// Give up after this long.  `None` polls until the provider returns a
    /// terminal status or the cancellation token fires.
    pub poll_timeout: Option<Duration>,

    /// Added to the poll interval on every `slow_down`; the raised interval
    /// holds for the rest of the flow.
    pub slow_down_increment: Duration,
}

impl DeviceFlowConfig {
    /// Config with the default poll interval and no timeout.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            audience: None,
            fallback_domain: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_timeout: None,
            slow_down_increment: SLOW_DOWN_INCREMENT,
        }
    }
}

/// Response of the device code endpoint.
#[derive(Clone, Deserialize)]
pub struct DeviceCode {
    /// Secret polled with; never shown to the user.
    pub device_code: String,

    /// Code the user confirms on the verification page.
    pub user_code: String,

    /// Verification page without the embedded code.
    #[serde(default)]
    pub verification_uri: Option<String>,

    /// Verification page with the user code pre-filled.
    #[serde(default)]
    pub verification_uri_complete: Option<String>,

    /// Seconds until the device code expires.
    #[serde(default)]
    pub expires_in: Option<u64>,

    /// Provider-requested minimum poll interval in seconds.
    #[serde(default)]
    pub interval: Option<u64>,
}

impl DeviceCode {
    /// The page the user should visit, preferring the pre-filled variant.
    pub fn verification_page(&self) -> Option<&str> {
        self.verification_uri_complete
            .as_deref()
            .or(self.verification_uri.as_deref())
    }
}

impl std::fmt::Debug for DeviceCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCode")
            .field("device_code", &token_preview(&self.device_code))
            .field("user_code", &self.user_code)
            .field("verification_uri", &self.verification_page())
            .field("expires_in", &self.expires_in)
            .field("interval", &self.interval)
            .finish()
    }
}

/// What a single token poll told us.
#[derive(Debug)]
pub enum PollStep {
    /// `authorization_pending`: keep polling.
    Pending,
    /// `slow_down`: keep polling at a longer interval.
    SlowDown,
    /// Transient transport or parse failure: retry on the next interval.
    Retry(String),
    /// The user approved; tokens were issued.
    Authorized(TokenSet),
}

/// Maps a classified token reply to the next poll step.
///
/// # Errors
///
/// - [`BrokerError::AuthorizationDenied`] for `access_denied`
/// - [`BrokerError::DeviceCodeExpired`] for `expired_token`
/// - [`BrokerError::Authorization`] for any other error code
pub fn classify_poll_reply(reply: TokenReply) -> std::result::Result<PollStep, BrokerError> {
    match reply {
        TokenReply::Issued(tokens) => Ok(PollStep::Authorized(tokens)),
        TokenReply::Rejected { error, description } => match error.as_str() {
            "authorization_pending" => Ok(PollStep::Pending),
            "slow_down" => Ok(PollStep::SlowDown),
            "access_denied" => Err(BrokerError::AuthorizationDenied(describe_oauth_error(
                &error,
                description.as_deref(),
            ))),
            "expired_token" => Err(BrokerError::DeviceCodeExpired),
            other => Err(BrokerError::Authorization(format!(
                "device flow error from provider: {}",
                describe_oauth_error(other, description.as_deref())
            ))),
        },
    }
}

fn terminal_state(error: &BrokerError) -> DeviceFlowState {
    match error {
        BrokerError::AuthorizationDenied(_) => DeviceFlowState::Denied,
        BrokerError::DeviceCodeExpired => DeviceFlowState::Expired,
        BrokerError::AuthorizationCancelled => DeviceFlowState::Cancelled,
        BrokerError::AuthorizationTimedOut { .. } => DeviceFlowState::TimedOut,
        _ => DeviceFlowState::Error,
    }
}

// ---------------------------------------------------------------------------
// DeviceAuthorizationClient
// ---------------------------------------------------------------------------

/// Drives the device authorization grant and persists the resulting session.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
/// use credential_broker::auth::{build_http_client, ProviderEndpoints};
/// use credential_broker::auth::device::{DeviceAuthorizationClient, DeviceFlowConfig};
/// use credential_broker::auth::interaction::TerminalInteraction;
/// use credential_broker::store::CredentialStore;
///
/// # async fn example() -> credential_broker::error::Result<()> {
/// let client = DeviceAuthorizationClient::new(
///     build_http_client(std::time::Duration::from_secs(30))?,
///     ProviderEndpoints::for_domain("login.example.com")?,
///     DeviceFlowConfig::new("my-client-id"),
///     CredentialStore::keyring("credential-broker"),
///     Arc::new(TerminalInteraction::default()),
/// );
/// let credentials = client
///     .request_authorization(&["read:users".to_string()], &CancellationToken::new())
///     .await?;
/// println!("signed in to {}", credentials.domain);
/// # Ok(())
/// # }
/// ```
pub struct DeviceAuthorizationClient {
    http: reqwest::Client,
    endpoints: ProviderEndpoints,
    config: DeviceFlowConfig,
    store: CredentialStore,
    decoder: Arc<dyn TokenDecoder>,
    interaction: Arc<dyn UserInteraction>,
}

impl DeviceAuthorizationClient {
    /// Creates a client that decodes tokens with [`JwtClaimsDecoder`].
    pub fn new(
        http: reqwest::Client,
        endpoints: ProviderEndpoints,
        config: DeviceFlowConfig,
        store: CredentialStore,
        interaction: Arc<dyn UserInteraction>,
    ) -> Self {
        Self {
            http,
            endpoints,
            config,
            store,
            decoder: Arc::new(JwtClaimsDecoder),
            interaction,
        }
    }

    /// Replaces the claim decoder used for domain derivation.
    pub fn with_decoder(mut self, decoder: Arc<dyn TokenDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Runs the complete device flow and stores the session.
    ///
    /// An empty `scopes` slice requests no scopes.
    ///
    /// # Errors
    ///
    /// Any terminal state other than `Authorized` is returned as an error:
    /// provider errors on the device code request, an unsafe verification
    /// URL, denial, expiry, cancellation, timeout, a token without a
    /// derivable domain, or a failed store write.
    pub async fn request_authorization(
        &self,
        scopes: &[String],
        cancel: &CancellationToken,
    ) -> Result<Credentials> {
        tracing::debug!(state = ?DeviceFlowState::Init, "Starting device authorization");
        let result = self.run(scopes, cancel).await;
        match &result {
            Ok(credentials) => tracing::info!(
                state = ?DeviceFlowState::Authorized,
                domain = %credentials.domain,
                "Device authorization completed"
            ),
            Err(e) => {
                let state = e
                    .downcast_ref::<BrokerError>()
                    .map(terminal_state)
                    .unwrap_or(DeviceFlowState::Error);
                tracing::warn!(state = ?state, error = %e, "Device authorization failed");
            }
        }
        result
    }

    async fn run(&self, scopes: &[String], cancel: &CancellationToken) -> Result<Credentials> {
        let device = self.request_device_code(scopes).await?;
        tracing::debug!(state = ?DeviceFlowState::CodeRequested, device = ?device);

        let page = device.verification_page().ok_or_else(|| {
            BrokerError::Authorization("device code response has no verification URI".to_string())
        })?;
        let page = validate_browser_url(page)?;
        self.obtain_consent(&device.user_code, &page).await;

        tracing::debug!(state = ?DeviceFlowState::AwaitingUserAuth);
        let tokens = self.poll_for_tokens(&device, cancel).await?;

        let domain = self.resolve_domain(&tokens)?;
        if !self.store.store_session(&tokens, &domain) {
            return Err(BrokerError::Storage(
                "failed to persist the new session to secure storage".to_string(),
            )
            .into());
        }

        Ok(Credentials {
            access_token: tokens.access_token,
            domain,
        })
    }

    /// Requests a device code for `scopes`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Authorization`] when the provider answers with
    /// an `error` field or an unparsable body, and [`BrokerError::Http`] on
    /// transport failure.
    pub async fn request_device_code(&self, scopes: &[String]) -> Result<DeviceCode> {
        let scope = scopes.join(" ");
        let mut params: Vec<(&str, &str)> = vec![("client_id", self.config.client_id.as_str())];
        if let Some(audience) = &self.config.audience {
            params.push(("audience", audience.as_str()));
        }
        if !scope.is_empty() {
            params.push(("scope", scope.as_str()));
        }

        let (status, body) = post_form(&self.http, &self.endpoints.device_code, &params).await?;

        if let Some(error) = body.get("error").and_then(|v| v.as_str()) {
            let description = body.get("error_description").and_then(|v| v.as_str());
            return Err(BrokerError::Authorization(format!(
                "device code request returned {}: {}",
                status,
                describe_oauth_error(error, description)
            ))
            .into());
        }
        if !status.is_success() {
            return Err(BrokerError::Authorization(format!(
                "device code request returned {}",
                status
            ))
            .into());
        }

        let device: DeviceCode = serde_json::from_value(body).map_err(|e| {
            BrokerError::Authorization(format!("Failed to parse device code response: {}", e))
        })?;
        Ok(device)
    }

    /// Shows the user code and opens the browser only after consent.
    ///
    /// The confirmation prompt may block on terminal input, so it runs on the
    /// blocking pool.
    async fn obtain_consent(&self, user_code: &str, page: &Url) {
        self.interaction.show_user_code(user_code, page);
        let interaction = Arc::clone(&self.interaction);
        let consent = tokio::task::spawn_blocking(move || interaction.confirm(CONSENT_PROMPT))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Consent prompt failed: {}", e);
                false
            });
        if consent {
            if let Err(e) = self.interaction.open_browser(page) {
                tracing::warn!("Failed to open browser: {}", e);
                self.interaction
                    .notify(&format!("Could not open a browser. Visit {} to continue.", page));
            }
        } else {
            self.interaction
                .notify(&format!("Visit {} in a browser to continue.", page));
        }
        self.interaction.notify("Waiting for authorization...");
    }

    /// Polls the token endpoint until a terminal answer, cancellation or the
    /// configured deadline.
    pub async fn poll_for_tokens(
        &self,
        device: &DeviceCode,
        cancel: &CancellationToken,
    ) -> Result<TokenSet> {
        let mut interval = device
            .interval
            .map(Duration::from_secs)
            .map_or(self.config.poll_interval, |provider| {
                provider.max(self.config.poll_interval)
            });
        let deadline = self.config.poll_timeout.map(|t| (Instant::now() + t, t));

        let mut attempt: u32 = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(BrokerError::AuthorizationCancelled.into());
                }
                _ = tokio::time::sleep(interval) => {}
            }
            if let Some((deadline, timeout)) = deadline {
                if Instant::now() >= deadline {
                    return Err(BrokerError::AuthorizationTimedOut {
                        seconds: timeout.as_secs(),
                    }
                    .into());
                }
            }

            attempt += 1;
            match self.poll_once(&device.device_code).await? {
                PollStep::Authorized(tokens) => {
                    tracing::debug!(attempt, "Device authorization approved");
                    return Ok(tokens);
                }
                PollStep::Pending => {
                    tracing::debug!(attempt, "authorization_pending; continuing to poll");
                }
                PollStep::SlowDown => {
                    interval += self.config.slow_down_increment;
                    tracing::debug!(
                        attempt,
                        interval_ms = interval.as_millis() as u64,
                        "slow_down received; raising poll interval"
                    );
                }
                PollStep::Retry(reason) => {
                    tracing::warn!(attempt, "Token poll failed, retrying: {}", reason);
                }
            }
        }
    }

    async fn poll_once(&self, device_code: &str) -> std::result::Result<PollStep, BrokerError> {
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("device_code", device_code),
            ("grant_type", DEVICE_CODE_GRANT_TYPE),
        ];
        match post_form(&self.http, &self.endpoints.token, &params).await {
            Ok((_status, body)) => classify_poll_reply(TokenReply::from_json(&body)?),
            Err(e) => Ok(PollStep::Retry(e.to_string())),
        }
    }

    fn resolve_domain(&self, tokens: &TokenSet) -> Result<String> {
        if let Some(domain) = domain_from_token(self.decoder.as_ref(), &tokens.access_token) {
            return Ok(domain);
        }
        match &self.config.fallback_domain {
            Some(domain) => {
                tracing::debug!("Token carries no tenant audience; using configured domain");
                normalize_domain(domain)
            }
            None => Err(BrokerError::Authorization(
                "could not determine the tenant domain from the issued token; set auth.domain"
                    .to_string(),
            )
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(body: serde_json::Value) -> TokenReply {
        TokenReply::from_json(&body).expect("classifiable")
    }

    #[test]
    fn test_classify_pending() {
        let step = classify_poll_reply(reply(serde_json::json!({ "error": "authorization_pending" })));
        assert!(matches!(step, Ok(PollStep::Pending)));
    }

    #[test]
    fn test_classify_slow_down() {
        let step = classify_poll_reply(reply(serde_json::json!({ "error": "slow_down" })));
        assert!(matches!(step, Ok(PollStep::SlowDown)));
    }

    #[test]
    fn test_classify_success() {
        let step = classify_poll_reply(reply(serde_json::json!({ "access_token": "tok" })));
        match step {
            Ok(PollStep::Authorized(tokens)) => assert_eq!(tokens.access_token, "tok"),
            other => panic!("unexpected step: {:?}", other),
        }
    }

    #[test]
    fn test_classify_terminal_errors() {
        let denied = classify_poll_reply(reply(serde_json::json!({ "error": "access_denied" })));
        assert!(matches!(denied, Err(BrokerError::AuthorizationDenied(_))));

        let expired = classify_poll_reply(reply(serde_json::json!({ "error": "expired_token" })));
        assert!(matches!(expired, Err(BrokerError::DeviceCodeExpired)));

        let other = classify_poll_reply(reply(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "bad device code"
        })));
        match other {
            Err(BrokerError::Authorization(msg)) => assert!(msg.contains("invalid_grant")),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_terminal_state_mapping() {
        assert_eq!(
            terminal_state(&BrokerError::DeviceCodeExpired),
            DeviceFlowState::Expired
        );
        assert_eq!(
            terminal_state(&BrokerError::AuthorizationCancelled),
            DeviceFlowState::Cancelled
        );
        assert_eq!(
            terminal_state(&BrokerError::AuthorizationTimedOut { seconds: 1 }),
            DeviceFlowState::TimedOut
        );
        assert_eq!(
            terminal_state(&BrokerError::Config("x".into())),
            DeviceFlowState::Error
        );
    }

    #[test]
    fn test_verification_page_prefers_complete_uri() {
        let device: DeviceCode = serde_json::from_value(serde_json::json!({
            "device_code": "dev",
            "user_code": "ABCD-EFGH",
            "verification_uri": "https://example.com/activate",
            "verification_uri_complete": "https://example.com/activate?user_code=ABCD-EFGH"
        }))
        .unwrap();
        assert_eq!(
            device.verification_page(),
            Some("https://example.com/activate?user_code=ABCD-EFGH")
        );
        assert!(!format!("{:?}", device).contains("\"dev\""));
    }

    #[test]
    fn test_device_flow_config_defaults() {
        let config = DeviceFlowConfig::new("client");
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert!(config.poll_timeout.is_none());
        assert!(config.audience.is_none());
        assert_eq!(config.slow_down_increment, Duration::from_secs(5));
    }
}
