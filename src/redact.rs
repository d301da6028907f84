//! Masking helpers for anything that might end up in logs or terminal output

use serde_json::Value;

const REDACTED: &str = "[REDACTED]";

/// Number of leading characters of a token shown in diagnostics.
const PREVIEW_CHARS: usize = 6;

/// Key fragments that mark a JSON field as secret-bearing.
const SENSITIVE_KEY_FRAGMENTS: &[&str] = &[
    "secret",
    "password",
    "token",
    "api_key",
    "apikey",
    "private_key",
    "signing_key",
    "credential",
];

/// Short, non-reversible description of a token: a prefix and the length.
///
/// # Examples
///
/// ```
/// use credential_broker::redact::token_preview;
///
/// assert_eq!(token_preview("eyJhbGciOiJSUzI1NiJ9"), "eyJhbG… (20 chars)");
/// assert_eq!(token_preview("abc"), "*** (3 chars)");
/// ```
pub fn token_preview(token: &str) -> String {
    let len = token.chars().count();
    // Short values would be fully revealed by the prefix.
    if len <= PREVIEW_CHARS * 2 {
        return format!("*** ({} chars)", len);
    }
    let prefix: String = token.chars().take(PREVIEW_CHARS).collect();
    format!("{}… ({} chars)", prefix, len)
}

/// Returns `true` when a JSON object key names a secret-bearing field.
pub fn is_sensitive_key(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    SENSITIVE_KEY_FRAGMENTS
        .iter()
        .any(|fragment| lowered.contains(fragment))
}

/// Replaces every secret-bearing field in `value` with `"[REDACTED]"`.
///
/// Walks nested objects and arrays. Non-string secrets (for example an array
/// of signing keys) are replaced wholesale.
///
/// # Examples
///
/// ```
/// use credential_broker::redact::mask_sensitive_fields;
///
/// let mut body = serde_json::json!({
///     "name": "backend",
///     "client_secret": "s3cr3t",
///     "nested": [{ "refresh_token": "rt" }]
/// });
/// mask_sensitive_fields(&mut body);
/// assert_eq!(body["name"], "backend");
/// assert_eq!(body["client_secret"], "[REDACTED]");
/// assert_eq!(body["nested"][0]["refresh_token"], "[REDACTED]");
/// ```
pub fn mask_sensitive_fields(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                if is_sensitive_key(key) && !field.is_null() {
                    *field = Value::String(REDACTED.to_string());
                } else {
                    mask_sensitive_fields(field);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(mask_sensitive_fields),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_preview_never_contains_full_token() {
        let token = "abcdefghijklmnopqrstuvwxyz";
        let preview = token_preview(token);
        assert!(preview.starts_with("abcdef"));
        assert!(!preview.contains(token));
        assert!(preview.contains("26 chars"));
    }

    #[test]
    fn test_token_preview_hides_short_tokens_entirely() {
        assert_eq!(token_preview("abc"), "*** (3 chars)");
        assert_eq!(token_preview(""), "*** (0 chars)");
    }

    #[test]
    fn test_is_sensitive_key_case_insensitive() {
        assert!(is_sensitive_key("Client_Secret"));
        assert!(is_sensitive_key("ACCESS_TOKEN"));
        assert!(is_sensitive_key("signing_keys"));
        assert!(!is_sensitive_key("client_id"));
        assert!(!is_sensitive_key("name"));
    }

    #[test]
    fn test_mask_leaves_null_and_plain_fields() {
        let mut body = serde_json::json!({
            "client_id": "abc",
            "client_secret": null,
            "count": 3
        });
        mask_sensitive_fields(&mut body);
        assert_eq!(body["client_id"], "abc");
        assert!(body["client_secret"].is_null());
        assert_eq!(body["count"], 3);
    }

    #[test]
    fn test_mask_replaces_structured_secrets() {
        let mut body = serde_json::json!({
            "signing_keys": [{ "kid": "1", "cert": "---" }],
            "items": [{ "password": "hunter2", "user": "bob" }]
        });
        mask_sensitive_fields(&mut body);
        assert_eq!(body["signing_keys"], "[REDACTED]");
        assert_eq!(body["items"][0]["password"], "[REDACTED]");
        assert_eq!(body["items"][0]["user"], "bob");
    }
}
