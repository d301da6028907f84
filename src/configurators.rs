//! MCP client configuration writers
//!
//! After a successful credential step the broker can register its protocol
//! server with desktop MCP clients.  Each client keeps a JSON document with an
//! `mcpServers` map; [`JsonClientConfigurator`] inserts or replaces one entry
//! in that map and leaves every other key untouched.
//!
//! # Module Layout
//!
//! - [`ClientKind`]: supported clients and their per-OS config paths
//! - [`ClientConfigurator`]: the writer seam
//! - [`JsonClientConfigurator`]: file-backed implementation
//! - [`configure_all`]: runs a batch of configurators in order

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{BrokerError, Result};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// What to register in a client's `mcpServers` map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigureOptions {
    /// Key under `mcpServers`.
    pub server_name: String,
    /// Executable that starts the protocol server.
    pub command: String,
    /// Arguments passed to `command`.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment for the server process.  Never contains tokens.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ConfigureOptions {
    /// The JSON entry written under `mcpServers.<server_name>`.
    pub fn server_entry(&self) -> Value {
        let mut entry = Map::new();
        entry.insert("command".to_string(), Value::String(self.command.clone()));
        entry.insert(
            "args".to_string(),
            Value::Array(self.args.iter().cloned().map(Value::String).collect()),
        );
        if !self.env.is_empty() {
            let env = self
                .env
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            entry.insert("env".to_string(), Value::Object(env));
        }
        Value::Object(entry)
    }
}

// ---------------------------------------------------------------------------
// ClientKind
// ---------------------------------------------------------------------------

/// Desktop MCP clients the broker knows how to configure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    /// Claude Desktop
    Claude,
    /// Cursor
    Cursor,
    /// Windsurf
    Windsurf,
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientKind::Claude => "Claude Desktop",
            ClientKind::Cursor => "Cursor",
            ClientKind::Windsurf => "Windsurf",
        };
        f.write_str(name)
    }
}

impl ClientKind {
    /// Resolves the client's config file for the current user.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::UnsupportedPlatform`] when the client has no
    /// known config location on this OS or the home directory is unknown.
    pub fn config_path(self) -> Result<PathBuf> {
        let dirs = BaseDirs::new().ok_or_else(|| {
            BrokerError::UnsupportedPlatform("cannot determine the home directory".to_string())
        })?;
        self.config_path_in(&dirs)
    }

    fn config_path_in(self, dirs: &BaseDirs) -> Result<PathBuf> {
        match self {
            ClientKind::Claude => {
                if cfg!(any(target_os = "macos", target_os = "windows")) {
                    Ok(dirs.config_dir().join("Claude").join("claude_desktop_config.json"))
                } else {
                    Err(BrokerError::UnsupportedPlatform(format!(
                        "{} is not available on {}",
                        self,
                        std::env::consts::OS
                    ))
                    .into())
                }
            }
            ClientKind::Cursor => Ok(dirs.home_dir().join(".cursor").join("mcp.json")),
            ClientKind::Windsurf => Ok(dirs
                .home_dir()
                .join(".codeium")
                .join("windsurf")
                .join("mcp_config.json")),
        }
    }
}

// ---------------------------------------------------------------------------
// Configurators
// ---------------------------------------------------------------------------

/// Writes a server registration into one client's configuration.
pub trait ClientConfigurator: Send + Sync {
    /// Human-readable client name for reporting.
    fn name(&self) -> String;

    /// Inserts or replaces the server entry described by `options`.
    fn configure(&self, options: &ConfigureOptions) -> Result<()>;
}

/// Configurator for clients that keep an `mcpServers` JSON document.
#[derive(Debug, Clone)]
pub struct JsonClientConfigurator {
    name: String,
    path: PathBuf,
}

impl JsonClientConfigurator {
    /// Creates a configurator writing to `path`.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Creates a configurator for `kind` at its default location.
    ///
    /// # Errors
    ///
    /// See [`ClientKind::config_path`].
    pub fn for_client(kind: ClientKind) -> Result<Self> {
        Ok(Self::new(kind.to_string(), kind.config_path()?))
    }

    /// The config file this configurator writes.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&contents)? {
            Value::Object(map) => Ok(map),
            _ => Err(BrokerError::Config(format!(
                "{} does not contain a JSON object",
                self.path.display()
            ))
            .into()),
        }
    }
}

impl ClientConfigurator for JsonClientConfigurator {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn configure(&self, options: &ConfigureOptions) -> Result<()> {
        if options.server_name.trim().is_empty() || options.command.trim().is_empty() {
            return Err(BrokerError::Config(
                "server name and command are required to configure a client".to_string(),
            )
            .into());
        }

        let mut document = self.read_document()?;
        let servers = document
            .entry("mcpServers".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        let servers = match servers {
            Value::Object(map) => map,
            _ => {
                return Err(BrokerError::Config(format!(
                    "`mcpServers` in {} is not an object",
                    self.path.display()
                ))
                .into())
            }
        };
        servers.insert(options.server_name.clone(), options.server_entry());

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let rendered = serde_json::to_string_pretty(&Value::Object(document))?;
        std::fs::write(&self.path, rendered + "\n")?;

        tracing::info!(client = %self.name, path = %self.path.display(), "Client configured");
        Ok(())
    }
}

/// Runs each configurator in order, stopping at the first failure.
///
/// Returns the names of the clients that were configured.
///
/// # Errors
///
/// The first configurator error, with the client name attached.
pub fn configure_all(
    configurators: &[Box<dyn ClientConfigurator>],
    options: &ConfigureOptions,
) -> Result<Vec<String>> {
    let mut configured = Vec::with_capacity(configurators.len());
    for configurator in configurators {
        let name = configurator.name();
        configurator
            .configure(options)
            .map_err(|e| e.context(format!("failed to configure {}", name)))?;
        configured.push(name);
    }
    Ok(configured)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn options() -> ConfigureOptions {
        ConfigureOptions {
            server_name: "identity".to_string(),
            command: "identity-mcp".to_string(),
            args: vec!["run".to_string()],
            env: BTreeMap::new(),
        }
    }

    #[test]
    fn test_server_entry_omits_empty_env() {
        let entry = options().server_entry();
        assert_eq!(entry, json!({"command": "identity-mcp", "args": ["run"]}));
    }

    #[test]
    fn test_configure_creates_file_and_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("mcp.json");
        let configurator = JsonClientConfigurator::new("Cursor", &path);

        configurator.configure(&options()).unwrap();

        let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["mcpServers"]["identity"]["command"], "identity-mcp");
    }

    #[test]
    fn test_configure_preserves_unrelated_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mcp.json");
        std::fs::write(
            &path,
            r#"{"theme":"dark","mcpServers":{"other":{"command":"x","args":[]}}}"#,
        )
        .unwrap();

        JsonClientConfigurator::new("Cursor", &path)
            .configure(&options())
            .unwrap();

        let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["theme"], "dark");
        assert_eq!(written["mcpServers"]["other"]["command"], "x");
        assert_eq!(written["mcpServers"]["identity"]["args"], json!(["run"]));
    }

    #[test]
    fn test_configure_rejects_non_object_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mcp.json");
        std::fs::write(&path, "[1, 2]").unwrap();

        let err = JsonClientConfigurator::new("Cursor", &path)
            .configure(&options())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BrokerError>(),
            Some(BrokerError::Config(_))
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_claude_unsupported_on_linux() {
        let err = ClientKind::Claude.config_path().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BrokerError>(),
            Some(BrokerError::UnsupportedPlatform(_))
        ));
    }

    #[test]
    fn test_cursor_path_under_home() {
        if let Some(dirs) = BaseDirs::new() {
            let path = ClientKind::Cursor.config_path().unwrap();
            assert!(path.starts_with(dirs.home_dir()));
            assert!(path.ends_with(".cursor/mcp.json"));
        }
    }
}
