//! Shared helpers for integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use base64::Engine as _;
use serde_json::{json, Value};
use tempfile::TempDir;
use url::Url;

use credential_broker::auth::interaction::UserInteraction;
use credential_broker::error::{BrokerError, Result};
use credential_broker::store::{CredentialStore, MemoryBackend, SecretBackend, Slot};

/// Builds an unsigned JWT carrying `payload`.
pub fn jwt(payload: Value) -> String {
    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let header = engine.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let body = engine.encode(payload.to_string().as_bytes());
    format!("{}.{}.signature", header, body)
}

/// A JWT whose audience names `domain`'s management API.
pub fn tenant_jwt(domain: &str, scope: &str) -> String {
    jwt(json!({
        "sub": "auth0|user",
        "aud": [format!("https://{}/api/v2/", domain), format!("https://{}/userinfo", domain)],
        "scope": scope,
    }))
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// An in-memory store pre-loaded with a session.
pub fn store_with_session(
    access_token: &str,
    domain: &str,
    expires_at_ms: Option<i64>,
    refresh_token: Option<&str>,
) -> CredentialStore {
    let store = CredentialStore::in_memory();
    assert!(store.set(Slot::AccessToken, access_token));
    assert!(store.set(Slot::Domain, domain));
    if let Some(expires_at) = expires_at_ms {
        assert!(store.set(Slot::TokenExpiresAt, &expires_at.to_string()));
    }
    if let Some(refresh) = refresh_token {
        assert!(store.set(Slot::RefreshToken, refresh));
    }
    store
}

pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

// ---------------------------------------------------------------------------
// Interaction double
// ---------------------------------------------------------------------------

/// Records what the device flow showed and did, answering consent with a
/// fixed value.
#[derive(Default)]
pub struct ScriptedInteraction {
    pub consent: bool,
    pub codes: Mutex<Vec<(String, String)>>,
    pub opened: Mutex<Vec<String>>,
    pub notes: Mutex<Vec<String>>,
    pub confirmations: Mutex<usize>,
}

impl ScriptedInteraction {
    pub fn new(consent: bool) -> Arc<Self> {
        Arc::new(Self {
            consent,
            ..Default::default()
        })
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn codes(&self) -> Vec<(String, String)> {
        self.codes.lock().unwrap().clone()
    }

    pub fn notes(&self) -> Vec<String> {
        self.notes.lock().unwrap().clone()
    }
}

impl UserInteraction for ScriptedInteraction {
    fn show_user_code(&self, user_code: &str, verification_uri: &Url) {
        self.codes
            .lock()
            .unwrap()
            .push((user_code.to_string(), verification_uri.to_string()));
    }

    fn confirm(&self, _prompt: &str) -> bool {
        *self.confirmations.lock().unwrap() += 1;
        self.consent
    }

    fn open_browser(&self, url: &Url) -> Result<()> {
        self.opened.lock().unwrap().push(url.to_string());
        Ok(())
    }

    fn notify(&self, message: &str) {
        self.notes.lock().unwrap().push(message.to_string());
    }
}

// ---------------------------------------------------------------------------
// Backend double
// ---------------------------------------------------------------------------

/// Memory backend that fails chosen operations on chosen slots.
#[derive(Default)]
pub struct FailingBackend {
    inner: MemoryBackend,
    fail_get: HashSet<&'static str>,
    fail_set: HashSet<&'static str>,
    fail_delete: HashSet<&'static str>,
}

impl FailingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_get(mut self, slot: Slot) -> Self {
        self.fail_get.insert(slot.key());
        self
    }

    pub fn failing_set(mut self, slot: Slot) -> Self {
        self.fail_set.insert(slot.key());
        self
    }

    pub fn failing_delete(mut self, slot: Slot) -> Self {
        self.fail_delete.insert(slot.key());
        self
    }

    /// Seeds a value directly, bypassing the failure rules.
    pub fn seeded(self, slot: Slot, value: &str) -> Self {
        self.inner
            .set(slot.key(), value)
            .expect("memory backend write");
        self
    }

    pub fn into_store(self) -> CredentialStore {
        CredentialStore::new(Arc::new(self))
    }
}

impl SecretBackend for FailingBackend {
    fn set(&self, key: &str, value: &str) -> std::result::Result<(), BrokerError> {
        if self.fail_set.contains(key) {
            return Err(BrokerError::Storage(format!("injected write failure for {}", key)));
        }
        self.inner.set(key, value)
    }

    fn get(&self, key: &str) -> std::result::Result<Option<String>, BrokerError> {
        if self.fail_get.contains(key) {
            return Err(BrokerError::Storage(format!("injected read failure for {}", key)));
        }
        self.inner.get(key)
    }

    fn delete(&self, key: &str) -> std::result::Result<(), BrokerError> {
        if self.fail_delete.contains(key) {
            return Err(BrokerError::Storage(format!("injected delete failure for {}", key)));
        }
        self.inner.delete(key)
    }
}
