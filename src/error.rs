//! Error types for the credential broker
//!
//! This module defines all error types used throughout the crate, using
//! `thiserror` for ergonomic error handling.
//!
//! Library-facing operations on the session (validity checks, refresh,
//! revocation, the authorization gate) never surface these errors; they log
//! them and resolve to `None` / `false`.  CLI-facing operations propagate them
//! to `main`, which exits non-zero.

use thiserror::Error;

/// Main error type for credential broker operations
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Configuration-related errors (missing values, invalid URLs, bad YAML shape)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider rejected or failed an authorization request
    #[error("Authorization error: {0}")]
    Authorization(String),

    /// The user declined the device authorization request
    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    /// The device code expired before the user completed authorization
    #[error("Device code expired before authorization completed")]
    DeviceCodeExpired,

    /// The device flow was cancelled between poll iterations
    #[error("Authorization cancelled")]
    AuthorizationCancelled,

    /// The device flow exceeded its configured deadline
    #[error("Authorization timed out after {seconds}s")]
    AuthorizationTimedOut {
        /// The configured poll timeout
        seconds: u64,
    },

    /// A URL about to be opened did not use `http` or `https`
    #[error("Refusing to open unsafe URL: {0}")]
    UnsafeUrl(String),

    /// A tool or scope pattern could not be compiled
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    /// The current operating system has no known configuration location
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// No usable session is stored
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    /// The authorization gate rejected a request
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The requested tool is excluded by the configured tool filter
    #[error("Tool not allowed: {0}")]
    ToolNotAllowed(String),

    /// Secret storage failures other than keyring errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Keyring/credential storage errors
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

/// Result type alias for CLI-facing operations
///
/// Uses `anyhow::Error` so callers can attach context while still being able
/// to downcast to [`BrokerError`].
pub type Result<T> = anyhow::Result<T>;
