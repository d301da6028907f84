//! Non-interactive `client_credentials` grant
//!
//! Intended for headless or service installations that cannot complete the
//! device flow.  One POST, no polling; the result is stored in the same slots
//! the device flow uses.

use crate::auth::{describe_oauth_error, normalize_domain, post_form, ProviderEndpoints, TokenReply};
use crate::credentials::Credentials;
use crate::error::{BrokerError, Result};
use crate::store::CredentialStore;

/// Parameters for a client-credentials authorization.
#[derive(Clone)]
pub struct ClientCredentialsRequest {
    /// Tenant domain; also the stored session domain.
    pub domain: String,
    /// Machine-to-machine application client id.
    pub client_id: String,
    /// Machine-to-machine application secret.
    pub client_secret: String,
    /// API audience; defaults to the tenant management API.
    pub audience: Option<String>,
}

impl ClientCredentialsRequest {
    /// Default audience for `domain`: its management API.
    ///
    /// # Examples
    ///
    /// ```
    /// use credential_broker::auth::client_credentials::ClientCredentialsRequest;
    ///
    /// assert_eq!(
    ///     ClientCredentialsRequest::default_audience("tenant.example.com"),
    ///     "https://tenant.example.com/api/v2/"
    /// );
    /// ```
    pub fn default_audience(domain: &str) -> String {
        format!("https://{}/api/v2/", domain)
    }
}

impl std::fmt::Debug for ClientCredentialsRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentialsRequest")
            .field("domain", &self.domain)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("audience", &self.audience)
            .finish()
    }
}

/// Performs the `client_credentials` grant and persists the session.
pub struct ClientCredentialsAuthenticator {
    http: reqwest::Client,
    store: CredentialStore,
    base_url_override: Option<String>,
}

impl ClientCredentialsAuthenticator {
    /// Creates an authenticator whose token endpoint is derived from the
    /// request domain.
    pub fn new(http: reqwest::Client, store: CredentialStore) -> Self {
        Self {
            http,
            store,
            base_url_override: None,
        }
    }

    /// Sends token requests to `base_url` instead of `https://<domain>/`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url_override = Some(base_url.into());
        self
    }

    /// Requests an access token and stores it.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Config`] for empty client id / secret or an
    /// invalid domain, [`BrokerError::Authorization`] when the provider
    /// answers with an error, and [`BrokerError::Storage`] when the session
    /// cannot be written.
    pub async fn request_client_credentials_authorization(
        &self,
        request: &ClientCredentialsRequest,
    ) -> Result<Credentials> {
        if request.client_id.trim().is_empty() || request.client_secret.trim().is_empty() {
            return Err(BrokerError::Config(
                "client id and client secret are both required".to_string(),
            )
            .into());
        }
        let domain = normalize_domain(&request.domain)?;
        let endpoints = match &self.base_url_override {
            Some(base) => ProviderEndpoints::from_base_url(base)?,
            None => ProviderEndpoints::for_domain(&domain)?,
        };
        let audience = request
            .audience
            .clone()
            .unwrap_or_else(|| ClientCredentialsRequest::default_audience(&domain));

        tracing::info!(domain = %domain, client_id = %request.client_id, "Requesting client credentials token");

        let params = [
            ("client_id", request.client_id.as_str()),
            ("client_secret", request.client_secret.as_str()),
            ("grant_type", "client_credentials"),
            ("audience", audience.as_str()),
        ];
        let (status, body) = post_form(&self.http, &endpoints.token, &params).await?;

        let tokens = match TokenReply::from_json(&body)? {
            TokenReply::Issued(tokens) => tokens,
            TokenReply::Rejected { error, description } => {
                return Err(BrokerError::Authorization(format!(
                    "client credentials request returned {}: {}",
                    status,
                    describe_oauth_error(&error, description.as_deref())
                ))
                .into());
            }
        };

        if !self.store.store_session(&tokens, &domain) {
            return Err(BrokerError::Storage(
                "failed to persist the new session to secure storage".to_string(),
            )
            .into());
        }

        tracing::info!(domain = %domain, "Client credentials authorization completed");
        Ok(Credentials {
            access_token: tokens.access_token,
            domain,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(secret: &str) -> ClientCredentialsRequest {
        ClientCredentialsRequest {
            domain: "tenant.example.com".to_string(),
            client_id: "m2m".to_string(),
            client_secret: secret.to_string(),
            audience: None,
        }
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", request("top-secret-value"));
        assert!(!rendered.contains("top-secret-value"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn test_empty_secret_rejected_before_network() {
        let authenticator =
            ClientCredentialsAuthenticator::new(reqwest::Client::new(), CredentialStore::in_memory())
                .with_base_url("http://127.0.0.1:9/");
        let err = authenticator
            .request_client_credentials_authorization(&request("  "))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BrokerError>(),
            Some(BrokerError::Config(_))
        ));
    }
}
