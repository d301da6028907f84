//! Configuration management for the credential broker
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from a YAML file, `CREDBROKER_*` environment variables and
//! `init` flags, in increasing order of precedence.  A missing file yields
//! defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::auth::device::DeviceFlowConfig;
use crate::auth::session::{RefreshPolicy, DEFAULT_EXPIRY_BUFFER_SECONDS};
use crate::auth::ProviderEndpoints;
use crate::cli::{Cli, Commands};
use crate::configurators::ConfigureOptions;
use crate::error::{BrokerError, Result};
use crate::gate::AuthScheme;
use crate::pattern::ToolFilter;
use crate::store::DEFAULT_SERVICE;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Identity provider and OAuth client settings
    #[serde(default)]
    pub auth: AuthConfig,
    /// Session storage and expiry handling
    #[serde(default)]
    pub session: SessionConfig,
    /// Per-request authorization
    #[serde(default)]
    pub gate: GateConfig,
    /// Tool allow-list
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Protocol server registration written by `configure`
    #[serde(default)]
    pub server: ServerConfig,
}

/// Identity provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Tenant domain; used for endpoints and as the stored domain when a
    /// token carries no tenant audience
    #[serde(default)]
    pub domain: Option<String>,

    /// OAuth client id of the native application
    #[serde(default)]
    pub client_id: String,

    /// API audience requested with the device code
    #[serde(default)]
    pub audience: Option<String>,

    /// Scopes requested during `init` when none are given on the command line
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    /// Authorization server base URL; overrides `https://<domain>/`
    #[serde(default)]
    pub auth_base_url: Option<String>,

    /// Minimum delay between device flow polls
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,

    /// Give up polling after this many seconds
    #[serde(default)]
    pub poll_timeout_seconds: Option<u64>,

    /// Timeout for each HTTP request to the provider
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
}

// No scopes unless requested.
fn default_scopes() -> Vec<String> {
    Vec::new()
}

fn default_poll_interval_seconds() -> u64 {
    5
}

fn default_http_timeout_seconds() -> u64 {
    30
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            domain: None,
            client_id: String::new(),
            audience: None,
            scopes: default_scopes(),
            auth_base_url: None,
            poll_interval_seconds: default_poll_interval_seconds(),
            poll_timeout_seconds: None,
            http_timeout_seconds: default_http_timeout_seconds(),
        }
    }
}

/// Where session secrets live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendKind {
    /// OS keyring
    #[default]
    Keyring,
    /// Process memory; nothing survives exit
    Memory,
}

/// Session handling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Behavior when the stored token is stale on read
    #[serde(default)]
    pub refresh_policy: RefreshPolicy,

    /// Seconds before expiry at which a token already counts as stale
    #[serde(default = "default_expiry_buffer_seconds")]
    pub expiry_buffer_seconds: u64,

    /// Keyring service namespace
    #[serde(default = "default_keyring_service")]
    pub keyring_service: String,

    /// Secret storage backend
    #[serde(default)]
    pub backend: StoreBackendKind,
}

fn default_expiry_buffer_seconds() -> u64 {
    DEFAULT_EXPIRY_BUFFER_SECONDS
}

fn default_keyring_service() -> String {
    DEFAULT_SERVICE.to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_policy: RefreshPolicy::default(),
            expiry_buffer_seconds: default_expiry_buffer_seconds(),
            keyring_service: default_keyring_service(),
            backend: StoreBackendKind::default(),
        }
    }
}

/// Authorization gate settings
#[derive(Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// `none`, `bearer` or `api-key`
    #[serde(default = "default_scheme")]
    pub scheme: AuthScheme,

    /// Pin bearer requests to this exact token
    #[serde(default)]
    pub expected_token: Option<String>,

    /// Shared secret for the `api-key` scheme
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_scheme() -> AuthScheme {
    AuthScheme::Bearer
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            expected_token: None,
            api_key: None,
        }
    }
}

impl std::fmt::Debug for GateConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateConfig")
            .field("scheme", &self.scheme)
            .field("expected_token", &self.expected_token.as_ref().map(|_| "[REDACTED]"))
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Tool allow-list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Patterns such as `*`, `read_*`, `list_users`
    #[serde(default = "default_tool_patterns")]
    pub patterns: Vec<String>,
}

fn default_tool_patterns() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            patterns: default_tool_patterns(),
        }
    }
}

/// How MCP clients should launch the protocol server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Key under `mcpServers`
    #[serde(default = "default_server_name")]
    pub name: String,

    /// Executable; required by `configure`
    #[serde(default)]
    pub command: Option<String>,

    /// Arguments for `command`
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_server_name() -> String {
    "credential-broker".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            command: None,
            args: Vec::new(),
        }
    }
}

impl Config {
    /// Default config file location for the current user.
    ///
    /// Falls back to `config/config.yaml` when no user config directory can
    /// be determined.
    pub fn default_path() -> PathBuf {
        ProjectDirs::from("com", "credential-broker", "credbroker")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config/config.yaml"))
    }

    /// Load configuration from file with environment variable and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the YAML configuration file
    /// * `cli` - Parsed command line, whose `init` options win over everything
    ///
    /// # Returns
    ///
    /// Returns the loaded configuration; defaults are used when the file does
    /// not exist
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &Path, cli: &Cli) -> Result<Self> {
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            tracing::debug!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| BrokerError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| BrokerError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(domain) = std::env::var("CREDBROKER_DOMAIN") {
            self.auth.domain = Some(domain);
        }

        if let Ok(client_id) = std::env::var("CREDBROKER_CLIENT_ID") {
            self.auth.client_id = client_id;
        }

        if let Ok(audience) = std::env::var("CREDBROKER_AUDIENCE") {
            self.auth.audience = Some(audience);
        }

        if let Ok(scopes) = std::env::var("CREDBROKER_SCOPES") {
            self.auth.scopes = split_list(&scopes);
        }

        if let Ok(base_url) = std::env::var("CREDBROKER_AUTH_BASE_URL") {
            self.auth.auth_base_url = Some(base_url);
        }

        if let Ok(timeout) = std::env::var("CREDBROKER_POLL_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.auth.poll_timeout_seconds = Some(value);
            } else {
                tracing::warn!("Invalid CREDBROKER_POLL_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(policy) = std::env::var("CREDBROKER_REFRESH_POLICY") {
            self.session.refresh_policy = match policy.to_lowercase().as_str() {
                "reauthenticate" => RefreshPolicy::Reauthenticate,
                "auto_refresh" | "auto-refresh" => RefreshPolicy::AutoRefresh,
                _ => {
                    tracing::warn!("Invalid refresh policy: {}, using default", policy);
                    RefreshPolicy::default()
                }
            };
        }

        if let Ok(scheme) = std::env::var("CREDBROKER_AUTH_SCHEME") {
            self.gate.scheme = AuthScheme::from(scheme);
        }

        if let Ok(api_key) = std::env::var("CREDBROKER_API_KEY") {
            self.gate.api_key = Some(api_key);
        }
    }

    fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Commands::Init {
            client_id,
            domain,
            audience,
            ..
        } = &cli.command
        {
            if let Some(client_id) = client_id {
                self.auth.client_id = client_id.clone();
            }
            if let Some(domain) = domain {
                self.auth.domain = Some(domain.clone());
            }
            if let Some(audience) = audience {
                self.auth.audience = Some(audience.clone());
            }
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        if self.auth.client_id.trim().is_empty() {
            return Err(BrokerError::Config(
                "auth.client_id is required (or set CREDBROKER_CLIENT_ID)".to_string(),
            )
            .into());
        }

        if self.auth.poll_interval_seconds == 0 {
            return Err(BrokerError::Config(
                "auth.poll_interval_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.auth.http_timeout_seconds == 0 {
            return Err(BrokerError::Config(
                "auth.http_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.auth.poll_timeout_seconds == Some(0) {
            return Err(BrokerError::Config(
                "auth.poll_timeout_seconds must be greater than 0 when set".to_string(),
            )
            .into());
        }

        if self.auth.domain.is_none() && self.auth.auth_base_url.is_none() {
            return Err(BrokerError::Config(
                "either auth.domain or auth.auth_base_url must be set".to_string(),
            )
            .into());
        }

        // Both resolve through the same URL checks used at runtime.
        self.endpoints()?;
        self.tool_filter()?;

        if let AuthScheme::Unknown(name) = &self.gate.scheme {
            tracing::warn!("Unknown gate scheme '{}'; every request will be denied", name);
        }

        Ok(())
    }

    /// Provider endpoints derived from `auth_base_url` or `domain`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Config`] when neither is usable.
    pub fn endpoints(&self) -> Result<ProviderEndpoints> {
        match (&self.auth.auth_base_url, &self.auth.domain) {
            (Some(base), _) => ProviderEndpoints::from_base_url(base),
            (None, Some(domain)) => ProviderEndpoints::for_domain(domain),
            (None, None) => Err(BrokerError::Config(
                "either auth.domain or auth.auth_base_url must be set".to_string(),
            )
            .into()),
        }
    }

    /// The compiled tool allow-list.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidPattern`] for a malformed pattern.
    pub fn tool_filter(&self) -> Result<ToolFilter> {
        Ok(ToolFilter::parse(&self.tools.patterns)?)
    }

    /// Device flow settings.
    pub fn device_flow_config(&self) -> DeviceFlowConfig {
        let mut flow = DeviceFlowConfig::new(self.auth.client_id.clone());
        flow.audience = self.auth.audience.clone();
        flow.fallback_domain = self.auth.domain.clone();
        flow.poll_interval = Duration::from_secs(self.auth.poll_interval_seconds);
        flow.poll_timeout = self.auth.poll_timeout_seconds.map(Duration::from_secs);
        flow
    }

    /// HTTP timeout for provider requests.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.auth.http_timeout_seconds)
    }

    /// Options for registering the server with MCP clients.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Config`] when `server.command` is not set.
    pub fn configure_options(&self) -> Result<ConfigureOptions> {
        let command = self
            .server
            .command
            .clone()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                BrokerError::Config(
                    "server.command must be set to configure MCP clients".to_string(),
                )
            })?;
        Ok(ConfigureOptions {
            server_name: self.server.name.clone(),
            command,
            args: self.server.args.clone(),
            env: Default::default(),
        })
    }
}

/// Splits a comma or whitespace separated list, dropping empty items.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}
