//! credbroker - credential broker CLI
//!
//! Main entry point: parses arguments, loads configuration and dispatches to
//! the command handlers.  Logs go to stderr so stdout stays usable by callers.

use std::path::PathBuf;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use credential_broker::cli::{Cli, Commands};
use credential_broker::commands;
use credential_broker::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_tracing(cli.verbose);

    let config_path = cli
        .config
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path, &cli)?;

    config.validate()?;

    match cli.command {
        Commands::Init {
            scopes,
            client_secret,
            no_browser,
            configure,
            ..
        } => {
            tracing::info!("Starting authentication");
            if client_secret.is_some() {
                tracing::debug!("Using client credentials grant");
            }
            commands::auth::init(
                config,
                commands::auth::InitOptions {
                    scopes,
                    client_secret,
                    no_browser,
                    configure,
                },
            )
            .await
        }
        Commands::Logout => commands::auth::logout(config).await,
        Commands::Session => commands::session::show(config).await,
        Commands::Refresh => commands::auth::refresh(config).await,
        Commands::Check { header, scopes, tool } => {
            commands::check::run(config, header, scopes, tool).await
        }
        Commands::Configure { client } => commands::configure::run(config, client),
    }
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose {
        "credential_broker=debug"
    } else {
        "credential_broker=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
