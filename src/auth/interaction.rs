//! Operator interaction during the device flow
//!
//! The device flow needs three things from the person at the terminal: to see
//! the user code, to consent before a browser is opened, and (optionally) the
//! browser launch itself.  These sit behind [`UserInteraction`] so the flow
//! can be driven headlessly in tests.

use colored::Colorize;
use url::Url;

use crate::error::{BrokerError, Result};

/// Prompts and side effects the device flow requires from its operator.
pub trait UserInteraction: Send + Sync {
    /// Shows the code the user must confirm on the verification page.
    fn show_user_code(&self, user_code: &str, verification_uri: &Url);

    /// Asks for explicit confirmation.  Returns `false` when declined or when
    /// no answer could be read.
    fn confirm(&self, prompt: &str) -> bool;

    /// Opens `url` in the user's browser.
    fn open_browser(&self, url: &Url) -> Result<()>;

    /// Reports a status line to the operator.
    fn notify(&self, message: &str);
}

/// Validates that `raw` is safe to hand to a browser launcher.
///
/// Only `http` and `https` URLs are accepted, which keeps provider-supplied
/// values from reaching local URI handlers (`file:`, `javascript:`, custom
/// application schemes).
///
/// # Errors
///
/// Returns [`BrokerError::UnsafeUrl`] for unparsable or non-web URLs.
///
/// # Examples
///
/// ```
/// use credential_broker::auth::interaction::validate_browser_url;
///
/// assert!(validate_browser_url("https://example.com/activate?user_code=ABCD").is_ok());
/// assert!(validate_browser_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_browser_url(raw: &str) -> std::result::Result<Url, BrokerError> {
    let url = Url::parse(raw).map_err(|_| BrokerError::UnsafeUrl(raw.to_string()))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(BrokerError::UnsafeUrl(raw.to_string())),
    }
}

/// Terminal-backed interaction using `rustyline` for the consent prompt.
#[derive(Debug, Clone, Default)]
pub struct TerminalInteraction {
    /// When `true`, never launch a browser; the URL is only printed.
    pub no_browser: bool,
}

impl TerminalInteraction {
    /// Creates a terminal interaction.
    pub fn new(no_browser: bool) -> Self {
        Self { no_browser }
    }
}

impl UserInteraction for TerminalInteraction {
    fn show_user_code(&self, user_code: &str, verification_uri: &Url) {
        println!("\n{}", "Device Authorization Required:".bold());
        println!("  1. Verify this code on the authorization page: {}", user_code.bold().yellow());
        println!("  2. Authorization page: {}", verification_uri);
    }

    fn confirm(&self, prompt: &str) -> bool {
        if self.no_browser {
            return false;
        }
        let mut editor = match rustyline::DefaultEditor::new() {
            Ok(editor) => editor,
            Err(e) => {
                tracing::warn!("Cannot read confirmation from terminal: {}", e);
                return false;
            }
        };
        match editor.readline(prompt) {
            Ok(answer) => {
                let answer = answer.trim().to_ascii_lowercase();
                answer.is_empty() || answer == "y" || answer == "yes"
            }
            Err(_) => false,
        }
    }

    fn open_browser(&self, url: &Url) -> Result<()> {
        let url = validate_browser_url(url.as_str())?;
        launch_browser(&url)
    }

    fn notify(&self, message: &str) {
        println!("{}", message);
    }
}

/// Spawns the platform browser launcher for an already validated URL.
fn launch_browser(url: &Url) -> Result<()> {
    #[cfg(target_os = "macos")]
    let spawned = std::process::Command::new("open").arg(url.as_str()).spawn();
    #[cfg(target_os = "linux")]
    let spawned = std::process::Command::new("xdg-open").arg(url.as_str()).spawn();
    #[cfg(target_os = "windows")]
    let spawned = std::process::Command::new("rundll32")
        .args(["url.dll,FileProtocolHandler", url.as_str()])
        .spawn();
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    let spawned: std::io::Result<std::process::Child> = Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "no browser launcher for this platform",
    ));

    spawned.map(|_| ()).map_err(|e| BrokerError::Io(e).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_browser_url_accepts_web_schemes() {
        assert!(validate_browser_url("http://localhost:3000/activate").is_ok());
        assert!(validate_browser_url("https://tenant.example.com/activate").is_ok());
    }

    #[test]
    fn test_validate_browser_url_rejects_other_schemes() {
        for raw in [
            "file:///etc/passwd",
            "javascript:alert(1)",
            "vscode://extension/install",
            "smb://host/share",
            "not a url",
            "https://",
        ] {
            let err = validate_browser_url(raw).unwrap_err();
            assert!(matches!(err, BrokerError::UnsafeUrl(_)), "accepted {}", raw);
        }
    }

    #[test]
    fn test_no_browser_terminal_declines_without_prompting() {
        let interaction = TerminalInteraction::new(true);
        assert!(!interaction.confirm("Open browser? "));
    }
}
