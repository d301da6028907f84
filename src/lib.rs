//! Credential broker library
//!
//! This library obtains, stores, refreshes and revokes identity provider
//! tokens for an MCP server, and decides whether incoming protocol requests
//! may proceed.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `store`: Keyring-backed secret slots for the session
//! - `auth`: Device flow, client credentials, refresh and revocation
//! - `gate`: Per-request authorization (`none`, `bearer`, `api-key`)
//! - `dispatch`: Gate, session and tool allow-list in front of tool execution
//! - `pattern`: Tool name patterns
//! - `configurators`: MCP client configuration writers
//! - `broker`: Component wiring from configuration
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use clap::Parser;
//! use credential_broker::{Broker, Cli, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cli = Cli::parse_from(["credbroker", "session"]);
//!     let config = Config::load(&Config::default_path(), &cli)?;
//!     config.validate()?;
//!
//!     let broker = Broker::from_config(config)?;
//!     if let Some(credentials) = broker.sessions().get_valid_credentials().await {
//!         println!("signed in to {}", credentials.domain);
//!     }
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod broker;
pub mod cli;
pub mod commands;
pub mod config;
pub mod configurators;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod pattern;
pub mod redact;
pub mod store;

// Re-export commonly used types
pub use auth::session::{RefreshPolicy, SessionManager};
pub use broker::Broker;
pub use cli::Cli;
pub use config::Config;
pub use credentials::Credentials;
pub use error::{BrokerError, Result};
pub use gate::{AuthScheme, AuthorizationGate};
pub use store::CredentialStore;
