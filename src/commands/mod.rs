/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

It exposes four top-level command modules:

- `auth`: `init`, `refresh` and `logout`
- `session`: show the stored session
- `check`: evaluate the authorization gate locally
- `configure`: register the server with MCP clients

Handlers print user-facing output to stdout and return errors to `main`,
which exits non-zero.
*/

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use crate::auth::client_credentials::ClientCredentialsRequest;
use crate::auth::interaction::TerminalInteraction;
use crate::broker::Broker;
use crate::config::Config;
use crate::configurators::{configure_all, ClientConfigurator, ClientKind, JsonClientConfigurator};
use crate::error::{BrokerError, Result};

/// Formats an epoch-millisecond timestamp for display.
fn format_expiry(expires_at_ms: Option<i64>) -> String {
    match expires_at_ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single()) {
        Some(at) => at.to_rfc3339(),
        None => "unknown".to_string(),
    }
}

// Authentication commands
pub mod auth {
    //! `init`, `refresh` and `logout`.

    use super::*;

    /// Options collected from `credbroker init`.
    #[derive(Debug, Clone, Default)]
    pub struct InitOptions {
        /// Scopes to request; `None` uses `auth.scopes`
        pub scopes: Option<Vec<String>>,
        /// Client secret; selects the client credentials grant
        pub client_secret: Option<String>,
        /// Never open a browser
        pub no_browser: bool,
        /// Clients to configure after a successful login
        pub configure: Vec<ClientKind>,
    }

    /// Authenticate and store a new session
    ///
    /// Runs the device flow, or the client credentials grant when a client
    /// secret is supplied.  Ctrl-C cancels a pending device flow.
    ///
    /// # Arguments
    ///
    /// * `config` - Loaded and validated configuration
    /// * `options` - Command line options
    ///
    /// # Errors
    ///
    /// Returns error if authorization fails, the session cannot be stored, or
    /// a requested client cannot be configured
    pub async fn init(config: Config, options: InitOptions) -> Result<()> {
        let broker = Broker::from_config(config)?;

        let credentials = match &options.client_secret {
            Some(secret) => {
                let domain = broker.config().auth.domain.clone().ok_or_else(|| {
                    BrokerError::Config(
                        "--domain (or auth.domain) is required with --client-secret".to_string(),
                    )
                })?;
                let request = ClientCredentialsRequest {
                    domain,
                    client_id: broker.config().auth.client_id.clone(),
                    client_secret: secret.clone(),
                    audience: broker.config().auth.audience.clone(),
                };
                println!("Requesting a token with client credentials...");
                broker
                    .client_credentials()
                    .request_client_credentials_authorization(&request)
                    .await?
            }
            None => {
                let scopes = options
                    .scopes
                    .clone()
                    .unwrap_or_else(|| broker.config().auth.scopes.clone());
                let interaction = Arc::new(TerminalInteraction::new(options.no_browser));
                let client = broker.device_client(interaction)?;

                let cancel = CancellationToken::new();
                let on_interrupt = cancel.clone();
                let watcher = tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        on_interrupt.cancel();
                    }
                });

                let result = client.request_authorization(&scopes, &cancel).await;
                watcher.abort();
                match result {
                    Ok(credentials) => credentials,
                    Err(e) => {
                        eprintln!("{} {}", "Authentication failed:".red().bold(), e);
                        return Err(e);
                    }
                }
            }
        };

        println!(
            "{} signed in to {}; credentials stored in secure storage.",
            "Success:".green().bold(),
            credentials.domain.cyan()
        );

        if !options.configure.is_empty() {
            super::configure::configure_clients(broker.config(), &options.configure)?;
        }
        Ok(())
    }

    /// Exchange the stored refresh token for a new access token
    ///
    /// # Errors
    ///
    /// Returns error when no refresh token is stored or the provider rejects
    /// the exchange
    pub async fn refresh(config: Config) -> Result<()> {
        let broker = Broker::from_config(config)?;
        match broker.sessions().refresh_access_token().await {
            Some(_) => {
                let status = broker.sessions().session_status();
                let expires = status.and_then(|s| s.expires_at);
                println!(
                    "{} access token refreshed (expires {}).",
                    "Success:".green().bold(),
                    format_expiry(expires)
                );
                Ok(())
            }
            None => Err(BrokerError::Authorization(
                "token refresh failed; run `credbroker init` to sign in again".to_string(),
            )
            .into()),
        }
    }

    /// Revoke the refresh token and delete every stored slot
    ///
    /// # Errors
    ///
    /// Returns error when one or more slots could not be deleted; the slots
    /// that were deleted stay deleted
    pub async fn logout(config: Config) -> Result<()> {
        let broker = Broker::from_config(config)?;
        let report = broker.sessions().logout().await;

        if report.revoked {
            println!("Refresh token revoked.");
        } else {
            println!("{}", "Warning: refresh token could not be revoked remotely.".yellow());
        }

        println!("Cleared {} of {} stored credentials.", report.cleared(), report.slots.len());
        for failure in report.failures() {
            eprintln!(
                "  {} {}: {}",
                "failed".red(),
                failure.slot,
                failure.error.as_deref().unwrap_or("unknown error")
            );
        }

        if report.is_complete() {
            println!("{}", "Logged out.".green().bold());
            Ok(())
        } else {
            Err(BrokerError::Storage("logout left credentials in secure storage".to_string()).into())
        }
    }
}

// Session inspection
pub mod session {
    //! `credbroker session`.

    use super::*;

    /// Print the stored session without revealing secrets
    pub async fn show(config: Config) -> Result<()> {
        let broker = Broker::from_config(config)?;
        let Some(status) = broker.sessions().session_status() else {
            println!("No session stored. Run `credbroker init` to sign in.");
            return Ok(());
        };

        println!("{}", "Session".bold());
        println!("  Domain:        {}", status.domain.cyan());
        println!("  Access token:  {}", status.token_preview);
        println!("  Expires:       {}", format_expiry(status.expires_at));
        println!(
            "  Refresh token: {}",
            if status.has_refresh_token { "stored" } else { "none" }
        );
        let state = if status.expired {
            "expired".red().to_string()
        } else {
            "valid".green().to_string()
        };
        println!("  Status:        {}", state);
        Ok(())
    }
}

// Gate evaluation
pub mod check {
    //! `credbroker check`.

    use super::*;

    /// Evaluate the configured gate for one request
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unauthorized`] or [`BrokerError::ToolNotAllowed`]
    /// when the request would be rejected
    pub async fn run(
        config: Config,
        header: Option<String>,
        scopes: Vec<String>,
        tool: Option<String>,
    ) -> Result<()> {
        let broker = Broker::from_config(config)?;
        let gate = broker.gate();

        if !gate.is_authorized(&scopes, header.as_deref()).await {
            println!("{} (scheme: {})", "Denied".red().bold(), gate.scheme());
            return Err(BrokerError::Unauthorized(format!(
                "request rejected by the {} scheme",
                gate.scheme()
            ))
            .into());
        }

        if let Some(tool) = tool {
            if !broker.filter().allows(&tool) {
                println!("{} tool '{}' is not allowed", "Denied".red().bold(), tool);
                return Err(BrokerError::ToolNotAllowed(tool).into());
            }
        }

        println!("{} (scheme: {})", "Authorized".green().bold(), gate.scheme());
        Ok(())
    }
}

// Client configuration
pub mod configure {
    //! `credbroker configure` and `init --configure`.

    use super::*;

    /// Register the server with each of `clients`
    ///
    /// # Errors
    ///
    /// Returns error if `server.command` is unset, a client is unsupported on
    /// this platform, or a config file cannot be written
    pub fn configure_clients(config: &Config, clients: &[ClientKind]) -> Result<()> {
        let options = config.configure_options()?;
        let configurators = clients
            .iter()
            .map(|kind| {
                JsonClientConfigurator::for_client(*kind)
                    .map(|c| Box::new(c) as Box<dyn ClientConfigurator>)
            })
            .collect::<Result<Vec<_>>>()?;

        for name in configure_all(&configurators, &options)? {
            println!("{} configured {}", "Success:".green().bold(), name);
        }
        Ok(())
    }

    /// Register the server with one client
    pub fn run(config: Config, client: ClientKind) -> Result<()> {
        configure_clients(&config, &[client])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_expiry() {
        assert_eq!(format_expiry(None), "unknown");
        assert_eq!(format_expiry(Some(0)), "1970-01-01T00:00:00+00:00");
    }

    #[tokio::test]
    async fn test_check_none_scheme_authorizes() {
        let mut config = Config::default();
        config.auth.client_id = "native-app".to_string();
        config.auth.domain = Some("tenant.example.com".to_string());
        config.session.backend = crate::config::StoreBackendKind::Memory;
        config.gate.scheme = crate::gate::AuthScheme::None;

        assert!(check::run(config, None, vec![], None).await.is_ok());
    }

    #[tokio::test]
    async fn test_check_rejects_tool_outside_allow_list() {
        let mut config = Config::default();
        config.auth.client_id = "native-app".to_string();
        config.auth.domain = Some("tenant.example.com".to_string());
        config.session.backend = crate::config::StoreBackendKind::Memory;
        config.gate.scheme = crate::gate::AuthScheme::None;
        config.tools.patterns = vec!["read_*".to_string()];

        let err = check::run(config, None, vec![], Some("delete_user".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BrokerError>(),
            Some(BrokerError::ToolNotAllowed(_))
        ));
    }

    #[test]
    fn test_configure_requires_server_command() {
        let config = Config::default();
        assert!(configure::configure_clients(&config, &[ClientKind::Cursor]).is_err());
    }
}
