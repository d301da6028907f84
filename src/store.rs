//! Credential persistence via the OS keyring
//!
//! This module provides secure storage and retrieval of the session using the
//! operating system's native credential store (Keychain on macOS, Secret
//! Service on Linux, Windows Credential Manager on Windows).
//!
//! The session is kept in four independent slots rather than one serialized
//! blob, so that a failed write to one slot cannot corrupt another.  Every
//! [`CredentialStore`] operation catches backend failures and converts them
//! into `false` / `None` / a per-slot error result; nothing is propagated past
//! this layer.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::credentials::{now_millis, Credentials, TokenSet};
use crate::error::BrokerError;

/// Default keyring service namespace.
pub const DEFAULT_SERVICE: &str = "credential-broker";

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

/// One logical secret slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// The bearer access token.
    AccessToken,
    /// The refresh token, when offline access was granted.
    RefreshToken,
    /// The tenant domain the access token belongs to.
    Domain,
    /// Access-token expiry as a decimal string of epoch milliseconds.
    TokenExpiresAt,
}

impl Slot {
    /// Every slot, in deletion order.
    pub const ALL: [Slot; 4] = [
        Slot::AccessToken,
        Slot::Domain,
        Slot::RefreshToken,
        Slot::TokenExpiresAt,
    ];

    /// The keyring account name for this slot.
    pub fn key(&self) -> &'static str {
        match self {
            Slot::AccessToken => "AUTH0_TOKEN",
            Slot::RefreshToken => "AUTH0_REFRESH_TOKEN",
            Slot::Domain => "AUTH0_DOMAIN",
            Slot::TokenExpiresAt => "AUTH0_TOKEN_EXPIRES_AT",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Outcome of deleting a single slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotResult {
    /// The slot the result refers to.
    pub slot: Slot,
    /// Whether the slot is now empty.
    pub success: bool,
    /// Backend error message when `success` is `false`.
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// SecretBackend
// ---------------------------------------------------------------------------

/// Raw key/value secret storage.
///
/// Implementations report failures as errors; [`CredentialStore`] is the
/// layer that swallows them.
pub trait SecretBackend: Send + Sync {
    /// Writes `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<(), BrokerError>;

    /// Reads the value under `key`; `Ok(None)` when nothing is stored.
    fn get(&self, key: &str) -> Result<Option<String>, BrokerError>;

    /// Removes `key`.  Removing an absent key succeeds.
    fn delete(&self, key: &str) -> Result<(), BrokerError>;
}

/// Backend over the OS native keyring.
///
/// Each slot is stored as its own entry, with the slot key as the account
/// name under a shared service namespace.
#[derive(Debug, Clone)]
pub struct KeyringBackend {
    service: String,
}

impl KeyringBackend {
    /// Creates a backend storing entries under `service`.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, BrokerError> {
        keyring::Entry::new(&self.service, key).map_err(BrokerError::Keyring)
    }
}

impl Default for KeyringBackend {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE)
    }
}

impl SecretBackend for KeyringBackend {
    fn set(&self, key: &str, value: &str) -> Result<(), BrokerError> {
        self.entry(key)?
            .set_password(value)
            .map_err(BrokerError::Keyring)
    }

    fn get(&self, key: &str) -> Result<Option<String>, BrokerError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(BrokerError::Keyring(e)),
        }
    }

    fn delete(&self, key: &str) -> Result<(), BrokerError> {
        match self.entry(key)?.delete_password() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(BrokerError::Keyring(e)),
        }
    }
}

/// Process-local backend for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, BrokerError> {
        self.entries
            .lock()
            .map_err(|_| BrokerError::Storage("memory backend lock poisoned".to_string()))
    }
}

impl SecretBackend for MemoryBackend {
    fn set(&self, key: &str, value: &str) -> Result<(), BrokerError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, BrokerError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<(), BrokerError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CredentialStore
// ---------------------------------------------------------------------------

/// Slot-oriented accessor over a [`SecretBackend`].
///
/// # Examples
///
/// ```
/// use credential_broker::store::{CredentialStore, Slot};
///
/// let store = CredentialStore::in_memory();
/// assert!(store.set(Slot::Domain, "tenant.example.com"));
/// assert_eq!(store.get(Slot::Domain).as_deref(), Some("tenant.example.com"));
///
/// let results = store.delete_all();
/// assert_eq!(results.len(), 4);
/// assert!(results.iter().all(|r| r.success));
/// ```
#[derive(Clone)]
pub struct CredentialStore {
    backend: Arc<dyn SecretBackend>,
}

impl CredentialStore {
    /// Wraps an arbitrary backend.
    pub fn new(backend: Arc<dyn SecretBackend>) -> Self {
        Self { backend }
    }

    /// Store backed by the OS keyring under `service`.
    pub fn keyring(service: &str) -> Self {
        Self::new(Arc::new(KeyringBackend::new(service)))
    }

    /// Store backed by a fresh [`MemoryBackend`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Writes one slot.  Returns `false` on any backend failure.
    pub fn set(&self, slot: Slot, value: &str) -> bool {
        match self.backend.set(slot.key(), value) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(slot = %slot, error = %e, "Failed to write credential slot");
                false
            }
        }
    }

    /// Reads one slot.  Backend failures are logged and read as absent.
    pub fn get(&self, slot: Slot) -> Option<String> {
        self.try_get(slot).unwrap_or_else(|e| {
            tracing::warn!(slot = %slot, error = %e, "Failed to read credential slot");
            None
        })
    }

    /// Reads one slot, surfacing the backend error to callers that need to
    /// tell "absent" apart from "unreadable".
    pub fn try_get(&self, slot: Slot) -> Result<Option<String>, BrokerError> {
        self.backend.get(slot.key())
    }

    /// Clears one slot.  Returns `false` on backend failure.
    pub fn delete(&self, slot: Slot) -> bool {
        self.delete_slot(slot).success
    }

    /// Attempts to clear every slot, independently of each other's outcome.
    pub fn delete_all(&self) -> Vec<SlotResult> {
        Slot::ALL
            .iter()
            .map(|slot| self.delete_slot(*slot))
            .collect()
    }

    fn delete_slot(&self, slot: Slot) -> SlotResult {
        match self.backend.delete(slot.key()) {
            Ok(()) => SlotResult {
                slot,
                success: true,
                error: None,
            },
            Err(e) => {
                tracing::warn!(slot = %slot, error = %e, "Failed to delete credential slot");
                SlotResult {
                    slot,
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// The stored session, only when both token and domain are present.
    pub fn credentials(&self) -> Option<Credentials> {
        let access_token = self.get(Slot::AccessToken).filter(|v| !v.is_empty())?;
        let domain = self.get(Slot::Domain).filter(|v| !v.is_empty())?;
        Some(Credentials {
            access_token,
            domain,
        })
    }

    /// Stored expiry in epoch milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Storage`] when the slot holds a value that is
    /// not a decimal integer, and propagates backend read failures.
    pub fn expires_at(&self) -> Result<Option<i64>, BrokerError> {
        match self.try_get(Slot::TokenExpiresAt)? {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<i64>().map(Some).map_err(|e| {
                BrokerError::Storage(format!("stored expiry '{}' is not an integer: {}", raw, e))
            }),
        }
    }

    /// Persists a freshly issued session.
    ///
    /// Writes access token, domain, expiry and refresh token.  Slots the new
    /// token set does not carry are cleared so that nothing from a previous
    /// session lingers; a missing expiry therefore reads as "expired".
    ///
    /// Returns `true` only when every write succeeded.  If the token and
    /// domain cannot both be written, the access token slot is cleared so a
    /// token is never paired with another session's domain.
    pub fn store_session(&self, tokens: &TokenSet, domain: &str) -> bool {
        if !self.write_token_and_domain(&tokens.access_token, Some(domain)) {
            return false;
        }
        let mut ok = self.write_expiry(tokens);
        ok &= match &tokens.refresh_token {
            Some(refresh) => self.set(Slot::RefreshToken, refresh),
            None => self.delete(Slot::RefreshToken),
        };
        ok
    }

    /// Applies a refresh-grant response to the stored session.
    ///
    /// The access token and expiry are always overwritten; the domain only
    /// when one could be derived; the refresh token only when the provider
    /// rotated it.
    pub fn apply_refresh(&self, tokens: &TokenSet, domain: Option<&str>) -> bool {
        if !self.write_token_and_domain(&tokens.access_token, domain) {
            return false;
        }
        let mut ok = self.write_expiry(tokens);
        if let Some(refresh) = &tokens.refresh_token {
            ok &= self.set(Slot::RefreshToken, refresh);
        }
        ok
    }

    // Domain first, then token; any failure leaves no access token behind.
    fn write_token_and_domain(&self, access_token: &str, domain: Option<&str>) -> bool {
        let written = domain.map_or(true, |domain| self.set(Slot::Domain, domain))
            && self.set(Slot::AccessToken, access_token);
        if !written {
            self.delete(Slot::AccessToken);
        }
        written
    }

    fn write_expiry(&self, tokens: &TokenSet) -> bool {
        match tokens.expires_at_ms(now_millis()) {
            Some(expires_at) => self.set(Slot::TokenExpiresAt, &expires_at.to_string()),
            None => self.delete(Slot::TokenExpiresAt),
        }
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
