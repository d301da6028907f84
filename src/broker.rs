//! Component wiring
//!
//! [`Broker`] builds the store, session engine, gate and tool filter from a
//! validated [`Config`].  The CLI and an embedding protocol server both start
//! here so they share one interpretation of the configuration.

use std::sync::Arc;

use crate::auth::client_credentials::ClientCredentialsAuthenticator;
use crate::auth::device::DeviceAuthorizationClient;
use crate::auth::interaction::UserInteraction;
use crate::auth::session::SessionManager;
use crate::auth::build_http_client;
use crate::config::{Config, StoreBackendKind};
use crate::dispatch::{ProtectedDispatcher, ToolDispatcher};
use crate::error::Result;
use crate::gate::AuthorizationGate;
use crate::pattern::ToolFilter;
use crate::store::CredentialStore;

/// Everything the broker needs at runtime.
pub struct Broker {
    config: Config,
    http: reqwest::Client,
    store: CredentialStore,
    sessions: Arc<SessionManager>,
    filter: ToolFilter,
}

impl Broker {
    /// Wires components with the store backend named in the config.
    ///
    /// # Errors
    ///
    /// Returns an error when endpoints, tool patterns or the HTTP client
    /// cannot be built.
    pub fn from_config(config: Config) -> Result<Self> {
        let store = match config.session.backend {
            StoreBackendKind::Keyring => CredentialStore::keyring(&config.session.keyring_service),
            StoreBackendKind::Memory => CredentialStore::in_memory(),
        };
        Self::with_store(config, store)
    }

    /// Wires components around an explicit store.
    ///
    /// # Errors
    ///
    /// See [`Broker::from_config`].
    pub fn with_store(config: Config, store: CredentialStore) -> Result<Self> {
        let http = build_http_client(config.http_timeout())?;
        let endpoints = config.endpoints()?;
        let filter = config.tool_filter()?;

        let sessions = SessionManager::new(
            http.clone(),
            endpoints,
            config.auth.client_id.clone(),
            store.clone(),
        )
        .with_policy(config.session.refresh_policy)
        .with_expiry_buffer(config.session.expiry_buffer_seconds);

        tracing::debug!(
            backend = ?config.session.backend,
            policy = ?config.session.refresh_policy,
            scheme = %config.gate.scheme,
            "Broker initialized"
        );

        Ok(Self {
            config,
            http,
            store,
            sessions: Arc::new(sessions),
            filter,
        })
    }

    /// The loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The secret store.
    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// The session engine.
    pub fn sessions(&self) -> Arc<SessionManager> {
        Arc::clone(&self.sessions)
    }

    /// The compiled tool allow-list.
    pub fn filter(&self) -> &ToolFilter {
        &self.filter
    }

    /// The gate described by `gate.*`, falling back to the stored session
    /// for header-less bearer requests.
    pub fn gate(&self) -> AuthorizationGate {
        let mut gate = AuthorizationGate::new(self.config.gate.scheme.clone())
            .with_session_fallback(self.sessions());
        if let Some(token) = &self.config.gate.expected_token {
            gate = gate.with_expected_token(token.clone());
        }
        if let Some(key) = &self.config.gate.api_key {
            gate = gate.with_api_key(key.clone());
        }
        gate
    }

    /// A device flow client prompting through `interaction`.
    ///
    /// # Errors
    ///
    /// Returns an error when the endpoints cannot be resolved.
    pub fn device_client(&self, interaction: Arc<dyn UserInteraction>) -> Result<DeviceAuthorizationClient> {
        Ok(DeviceAuthorizationClient::new(
            self.http.clone(),
            self.config.endpoints()?,
            self.config.device_flow_config(),
            self.store.clone(),
            interaction,
        ))
    }

    /// A client credentials authenticator honoring `auth.auth_base_url`.
    pub fn client_credentials(&self) -> ClientCredentialsAuthenticator {
        let authenticator = ClientCredentialsAuthenticator::new(self.http.clone(), self.store.clone());
        match &self.config.auth.auth_base_url {
            Some(base) => authenticator.with_base_url(base.clone()),
            None => authenticator,
        }
    }

    /// Puts the gate, session engine and allow-list in front of `inner`.
    pub fn protect(&self, inner: Arc<dyn ToolDispatcher>) -> ProtectedDispatcher {
        ProtectedDispatcher::new(self.gate(), self.sessions(), self.filter.clone(), inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::RefreshPolicy;

    fn config() -> Config {
        let mut config = Config::default();
        config.auth.client_id = "native-app".to_string();
        config.auth.domain = Some("tenant.example.com".to_string());
        config.session.backend = StoreBackendKind::Memory;
        config.session.refresh_policy = RefreshPolicy::AutoRefresh;
        config
    }

    #[test]
    fn test_from_config_applies_policy() {
        let broker = Broker::from_config(config()).unwrap();
        assert_eq!(broker.sessions().policy(), RefreshPolicy::AutoRefresh);
        assert!(broker.filter().is_allow_all());
    }

    #[test]
    fn test_from_config_rejects_bad_patterns() {
        let mut config = config();
        config.tools.patterns = vec!["".to_string()];
        assert!(Broker::from_config(config).is_err());
    }
}
