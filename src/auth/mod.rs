//! OAuth 2.0 grants against the identity provider
//!
//! # Module Layout
//!
//! - [`claims`]             -- unverified token claim decoding and tenant
//!   domain derivation
//! - [`client_credentials`] -- one-shot `client_credentials` grant
//! - [`device`]             -- RFC 8628 device authorization grant with
//!   consent prompt and cancellable polling
//! - [`interaction`]        -- operator prompts and safe browser launching
//! - [`session`]            -- expiry checks, refresh, revocation and logout
//!
//! This module holds what the grants share: provider endpoint resolution, the
//! HTTP client, and token endpoint response classification.

pub mod claims;
pub mod client_credentials;
pub mod device;
pub mod interaction;
pub mod session;

use std::time::Duration;

use serde_json::Value;
use url::Url;

use crate::credentials::TokenSet;
use crate::error::{BrokerError, Result};

/// Grant type for polling the token endpoint during the device flow.
pub const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

const USER_AGENT: &str = concat!("credential-broker/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// ProviderEndpoints
// ---------------------------------------------------------------------------

/// The three provider endpoints this crate talks to.
///
/// # Examples
///
/// ```
/// use credential_broker::auth::ProviderEndpoints;
///
/// let endpoints = ProviderEndpoints::for_domain("tenant.example.com").unwrap();
/// assert_eq!(endpoints.token.as_str(), "https://tenant.example.com/oauth/token");
/// assert_eq!(endpoints.revoke.as_str(), "https://tenant.example.com/oauth/revoke");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    /// `POST /oauth/device/code`
    pub device_code: Url,
    /// `POST /oauth/token`
    pub token: Url,
    /// `POST /oauth/revoke`
    pub revoke: Url,
}

impl ProviderEndpoints {
    /// Resolves the endpoints relative to an authorization server base URL.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Config`] when `base` is not an `http(s)` URL.
    pub fn from_base_url(base: &str) -> Result<Self> {
        let mut base = Url::parse(base)
            .map_err(|e| BrokerError::Config(format!("invalid auth base URL '{}': {}", base, e)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(BrokerError::Config(format!(
                "auth base URL must use http or https, got '{}'",
                base.scheme()
            ))
            .into());
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let join = |path: &str| {
            base.join(path)
                .map_err(|e| BrokerError::Config(format!("invalid endpoint path {}: {}", path, e)))
        };

        Ok(Self {
            device_code: join("oauth/device/code")?,
            token: join("oauth/token")?,
            revoke: join("oauth/revoke")?,
        })
    }

    /// Resolves the endpoints for a tenant domain served over HTTPS.
    pub fn for_domain(domain: &str) -> Result<Self> {
        let host = normalize_domain(domain)?;
        Self::from_base_url(&format!("https://{}/", host))
    }
}

/// Reduces `domain` to a bare host, accepting `https://host/` forms too.
///
/// # Errors
///
/// Returns [`BrokerError::Config`] when no host can be extracted.
///
/// # Examples
///
/// ```
/// use credential_broker::auth::normalize_domain;
///
/// assert_eq!(normalize_domain("https://tenant.example.com/").unwrap(), "tenant.example.com");
/// assert_eq!(normalize_domain("tenant.example.com").unwrap(), "tenant.example.com");
/// ```
pub fn normalize_domain(domain: &str) -> Result<String> {
    let trimmed = domain.trim();
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    let url = Url::parse(&candidate)
        .map_err(|e| BrokerError::Config(format!("invalid domain '{}': {}", domain, e)))?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| BrokerError::Config(format!("domain '{}' has no host", domain)))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Builds the HTTP client shared by all grants.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| BrokerError::Config(format!("Failed to create HTTP client: {}", e)))?;
    Ok(client)
}

// ---------------------------------------------------------------------------
// Token endpoint responses
// ---------------------------------------------------------------------------

/// Classified token endpoint response.
#[derive(Debug)]
pub enum TokenReply {
    /// No `error` field: the provider issued tokens.
    Issued(TokenSet),
    /// The provider returned an OAuth error.
    Rejected {
        /// The OAuth `error` code, e.g. `authorization_pending`.
        error: String,
        /// Optional human-readable `error_description`.
        description: Option<String>,
    },
}

impl TokenReply {
    /// Classifies a token endpoint JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Authorization`] when the body has neither an
    /// `error` field nor a usable `access_token`.
    pub fn from_json(body: &Value) -> std::result::Result<Self, BrokerError> {
        if let Some(error) = body.get("error").and_then(Value::as_str) {
            return Ok(TokenReply::Rejected {
                error: error.to_string(),
                description: body
                    .get("error_description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }

        let tokens: TokenSet = serde_json::from_value(body.clone()).map_err(|e| {
            BrokerError::Authorization(format!("malformed token endpoint response: {}", e))
        })?;
        if tokens.access_token.is_empty() {
            return Err(BrokerError::Authorization(
                "token endpoint returned an empty access_token".to_string(),
            ));
        }
        Ok(TokenReply::Issued(tokens))
    }
}

/// Formats an OAuth error code with its optional description.
pub(crate) fn describe_oauth_error(error: &str, description: Option<&str>) -> String {
    match description {
        Some(desc) if !desc.is_empty() => format!("{} ({})", error, desc),
        _ => error.to_string(),
    }
}

/// POSTs a form body and parses the JSON response.
///
/// The status code is returned alongside the body because OAuth providers
/// report errors such as `authorization_pending` in 4xx JSON bodies.
pub(crate) async fn post_form(
    http: &reqwest::Client,
    url: &Url,
    params: &[(&str, &str)],
) -> std::result::Result<(reqwest::StatusCode, Value), BrokerError> {
    let resp = http
        .post(url.clone())
        .header("Accept", "application/json")
        .form(params)
        .send()
        .await?;

    let status = resp.status();
    let text = resp.text().await?;
    let body = serde_json::from_str::<Value>(&text).map_err(|_| {
        BrokerError::Authorization(format!(
            "{} returned {} with a non-JSON body",
            url.path(),
            status
        ))
    })?;
    Ok((status, body))
}
