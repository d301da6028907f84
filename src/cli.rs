//! Command-line interface definition for the credential broker
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for authentication, session management, local
//! authorization checks and MCP client configuration.

use clap::{Parser, Subcommand};

use crate::configurators::ClientKind;

/// credbroker - credential broker for MCP servers
///
/// Obtains identity provider tokens through the device authorization flow,
/// keeps them in the OS keyring, and authorizes protocol requests.
#[derive(Parser, Debug, Clone)]
#[command(name = "credbroker")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (defaults to the user config directory)
    #[arg(short, long, env = "CREDBROKER_CONFIG")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Authenticate and store a new session
    Init {
        /// Scopes to request (comma separated); defaults to auth.scopes, which
        /// is empty. Pass `offline_access` to receive a refresh token
        #[arg(short, long, value_delimiter = ',')]
        scopes: Option<Vec<String>>,

        /// Client id override; required with --client-secret
        #[arg(long)]
        client_id: Option<String>,

        /// Use the client credentials grant with this secret instead of the
        /// device flow
        #[arg(long, env = "CREDBROKER_CLIENT_SECRET", hide_env_values = true)]
        client_secret: Option<String>,

        /// Tenant domain override
        #[arg(long)]
        domain: Option<String>,

        /// API audience override
        #[arg(long)]
        audience: Option<String>,

        /// Print the verification URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,

        /// Configure these MCP clients after authenticating
        #[arg(long, value_enum, value_delimiter = ',')]
        configure: Vec<ClientKind>,
    },

    /// Revoke the refresh token and delete all stored credentials
    Logout,

    /// Show the current session
    Session,

    /// Exchange the refresh token for a new access token now
    Refresh,

    /// Evaluate the authorization gate for a request
    Check {
        /// Authorization header value, e.g. "Bearer <token>"
        #[arg(long)]
        header: Option<String>,

        /// Scopes the request needs (comma separated)
        #[arg(long, value_delimiter = ',')]
        scopes: Vec<String>,

        /// Tool name to check against the allow-list
        #[arg(long)]
        tool: Option<String>,
    },

    /// Register the server with an MCP client
    Configure {
        /// Client to configure
        #[arg(value_enum)]
        client: ClientKind,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_init_defaults() {
        let cli = Cli::try_parse_from(["credbroker", "init"]).unwrap();
        if let Commands::Init {
            scopes,
            no_browser,
            configure,
            ..
        } = cli.command
        {
            assert!(scopes.is_none());
            assert!(!no_browser);
            assert!(configure.is_empty());
        } else {
            panic!("Expected Init command");
        }
    }

    #[test]
    fn test_cli_parse_init_with_options() {
        let cli = Cli::try_parse_from([
            "credbroker",
            "init",
            "--scopes",
            "read:users,update:users",
            "--no-browser",
            "--configure",
            "cursor,windsurf",
        ])
        .unwrap();
        if let Commands::Init {
            scopes,
            no_browser,
            configure,
            ..
        } = cli.command
        {
            assert_eq!(
                scopes,
                Some(vec!["read:users".to_string(), "update:users".to_string()])
            );
            assert!(no_browser);
            assert_eq!(configure, vec![ClientKind::Cursor, ClientKind::Windsurf]);
        } else {
            panic!("Expected Init command");
        }
    }

    #[test]
    fn test_cli_parse_check() {
        let cli = Cli::try_parse_from([
            "credbroker",
            "check",
            "--header",
            "Bearer abc",
            "--scopes",
            "read:users",
        ])
        .unwrap();
        if let Commands::Check { header, scopes, tool } = cli.command {
            assert_eq!(header.as_deref(), Some("Bearer abc"));
            assert_eq!(scopes, vec!["read:users".to_string()]);
            assert!(tool.is_none());
        } else {
            panic!("Expected Check command");
        }
    }

    #[test]
    fn test_cli_parse_configure() {
        let cli = Cli::try_parse_from(["credbroker", "configure", "cursor"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Configure {
                client: ClientKind::Cursor
            }
        ));
    }

    #[test]
    fn test_cli_rejects_unknown_client() {
        assert!(Cli::try_parse_from(["credbroker", "configure", "vim"]).is_err());
    }

    #[test]
    fn test_cli_global_flags() {
        let cli =
            Cli::try_parse_from(["credbroker", "--verbose", "-c", "/tmp/cfg.yaml", "session"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config.as_deref(), Some("/tmp/cfg.yaml"));
        assert!(matches!(cli.command, Commands::Session));
    }
}
