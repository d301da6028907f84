//! MCP client configurator integration tests
//!
//! File-backed writes use `tempfile`; batch ordering and failure handling use
//! `mockall` doubles for the `ClientConfigurator` seam.

use std::collections::BTreeMap;

use mockall::mock;
use mockall::predicate::eq;
use serde_json::{json, Value};
use tempfile::TempDir;

use credential_broker::configurators::{
    configure_all, ClientConfigurator, ConfigureOptions, JsonClientConfigurator,
};
use credential_broker::error::BrokerError;

mock! {
    pub Configurator {}

    impl ClientConfigurator for Configurator {
        fn name(&self) -> String;
        fn configure(&self, options: &ConfigureOptions) -> anyhow::Result<()>;
    }
}

fn options() -> ConfigureOptions {
    let mut env = BTreeMap::new();
    env.insert("LOG_LEVEL".to_string(), "info".to_string());
    ConfigureOptions {
        server_name: "identity".to_string(),
        command: "/usr/local/bin/identity-mcp".to_string(),
        args: vec!["run".to_string(), "--stdio".to_string()],
        env,
    }
}

fn named(name: &'static str) -> MockConfigurator {
    let mut mock = MockConfigurator::new();
    mock.expect_name().return_const(name.to_string());
    mock
}

#[test]
fn test_configure_all_runs_in_order() {
    let mut first = named("Cursor");
    first
        .expect_configure()
        .with(eq(options()))
        .times(1)
        .returning(|_| Ok(()));
    let mut second = named("Windsurf");
    second.expect_configure().times(1).returning(|_| Ok(()));

    let configurators: Vec<Box<dyn ClientConfigurator>> = vec![Box::new(first), Box::new(second)];
    let configured = configure_all(&configurators, &options()).unwrap();

    assert_eq!(configured, vec!["Cursor".to_string(), "Windsurf".to_string()]);
}

#[test]
fn test_configure_all_stops_at_first_failure() {
    let mut failing = named("Claude Desktop");
    failing
        .expect_configure()
        .times(1)
        .returning(|_| Err(BrokerError::UnsupportedPlatform("linux".to_string()).into()));
    let mut never = named("Cursor");
    never.expect_configure().times(0);

    let configurators: Vec<Box<dyn ClientConfigurator>> = vec![Box::new(failing), Box::new(never)];
    let err = configure_all(&configurators, &options()).unwrap_err();

    assert!(err.to_string().contains("Claude Desktop"));
    assert!(matches!(
        err.downcast_ref::<BrokerError>(),
        Some(BrokerError::UnsupportedPlatform(_))
    ));
}

#[test]
fn test_json_configurator_writes_full_entry() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".codeium").join("windsurf").join("mcp_config.json");
    let configurator = JsonClientConfigurator::new("Windsurf", &path);

    configurator.configure(&options()).unwrap();

    let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(
        written,
        json!({
            "mcpServers": {
                "identity": {
                    "command": "/usr/local/bin/identity-mcp",
                    "args": ["run", "--stdio"],
                    "env": { "LOG_LEVEL": "info" }
                }
            }
        })
    );
}

#[test]
fn test_json_configurator_replaces_existing_entry_idempotently() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mcp.json");
    std::fs::write(
        &path,
        r#"{"mcpServers":{"identity":{"command":"old","args":[]},"keep":{"command":"k","args":[]}}}"#,
    )
    .unwrap();
    let configurator = JsonClientConfigurator::new("Cursor", &path);

    configurator.configure(&options()).unwrap();
    configurator.configure(&options()).unwrap();

    let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let servers = written["mcpServers"].as_object().unwrap();
    assert_eq!(servers.len(), 2);
    assert_eq!(servers["identity"]["command"], "/usr/local/bin/identity-mcp");
    assert_eq!(servers["keep"]["command"], "k");
}

#[test]
fn test_json_configurator_rejects_missing_command() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mcp.json");
    let mut opts = options();
    opts.command = String::new();

    assert!(JsonClientConfigurator::new("Cursor", &path).configure(&opts).is_err());
    assert!(!path.exists());
}
