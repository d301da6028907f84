//! Credential store integration tests
//!
//! Exercises slot round-trips, independent deletion, partial failure
//! reporting and session persistence against in-memory and fault-injecting
//! backends.  Keyring-backed cases are ignored by default.

mod common;

use credential_broker::credentials::TokenSet;
use credential_broker::store::{CredentialStore, Slot};

use common::FailingBackend;

fn token_set(access: &str, refresh: Option<&str>, expires_in: Option<u64>) -> TokenSet {
    serde_json::from_value(serde_json::json!({
        "access_token": access,
        "refresh_token": refresh,
        "expires_in": expires_in,
    }))
    .expect("token set")
}

#[test]
fn test_every_slot_round_trips() {
    let store = CredentialStore::in_memory();
    for slot in Slot::ALL {
        let value = format!("value-for-{}", slot.key());
        assert!(store.set(slot, &value));
        assert_eq!(store.get(slot), Some(value));
    }
}

#[test]
fn test_delete_all_reports_one_result_per_slot() {
    let store = CredentialStore::in_memory();
    for slot in Slot::ALL {
        store.set(slot, "x");
    }

    let results = store.delete_all();

    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|r| r.success && r.error.is_none()));
    for slot in Slot::ALL {
        assert_eq!(store.get(slot), None);
    }
}

#[test]
fn test_delete_all_continues_past_a_failing_slot() {
    let store = FailingBackend::new()
        .seeded(Slot::AccessToken, "token")
        .seeded(Slot::Domain, "tenant.example.com")
        .seeded(Slot::RefreshToken, "refresh")
        .seeded(Slot::TokenExpiresAt, "1")
        .failing_delete(Slot::Domain)
        .into_store();

    let results = store.delete_all();

    assert_eq!(results.len(), 4);
    let successes = results.iter().filter(|r| r.success).count();
    assert_eq!(successes, 3);

    let failed: Vec<_> = results.iter().filter(|r| !r.success).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].slot, Slot::Domain);
    assert!(failed[0].error.as_deref().unwrap().contains("AUTH0_DOMAIN"));

    assert_eq!(store.get(Slot::AccessToken), None);
    assert_eq!(store.get(Slot::RefreshToken), None);
    assert_eq!(store.get(Slot::TokenExpiresAt), None);
}

#[test]
fn test_set_reports_backend_failure_as_false() {
    let store = FailingBackend::new()
        .failing_set(Slot::RefreshToken)
        .into_store();
    assert!(!store.set(Slot::RefreshToken, "r"));
    assert!(store.set(Slot::AccessToken, "a"));
}

#[test]
fn test_get_reads_failure_as_absent_but_try_get_surfaces_it() {
    let store = FailingBackend::new()
        .seeded(Slot::AccessToken, "a")
        .failing_get(Slot::AccessToken)
        .into_store();
    assert_eq!(store.get(Slot::AccessToken), None);
    assert!(store.try_get(Slot::AccessToken).is_err());
}

#[test]
fn test_credentials_require_token_and_domain() {
    let store = CredentialStore::in_memory();
    store.set(Slot::AccessToken, "token");
    assert!(store.credentials().is_none());

    store.set(Slot::Domain, "tenant.example.com");
    let credentials = store.credentials().unwrap();
    assert_eq!(credentials.access_token, "token");
    assert_eq!(credentials.domain, "tenant.example.com");
}

#[test]
fn test_store_session_clears_stale_slots() {
    let store = common::store_with_session("old", "tenant.example.com", Some(1), Some("old-refresh"));

    assert!(store.store_session(&token_set("new", None, None), "tenant.example.com"));

    assert_eq!(store.get(Slot::AccessToken).as_deref(), Some("new"));
    assert_eq!(store.get(Slot::RefreshToken), None);
    assert_eq!(store.get(Slot::TokenExpiresAt), None);
}

#[test]
fn test_store_session_writes_expiry_in_the_future() {
    let store = CredentialStore::in_memory();
    let before = common::now_ms();

    assert!(store.store_session(&token_set("a", Some("r"), Some(3600)), "tenant.example.com"));

    let expires_at = store.expires_at().unwrap().unwrap();
    assert!(expires_at >= before + 3_600_000);
    assert_eq!(store.get(Slot::RefreshToken).as_deref(), Some("r"));
}

#[test]
fn test_store_session_failed_domain_write_leaves_no_mismatched_token() {
    let store = FailingBackend::new()
        .seeded(Slot::AccessToken, "old")
        .seeded(Slot::Domain, "old.example.com")
        .failing_set(Slot::Domain)
        .into_store();

    assert!(!store.store_session(&token_set("new", Some("r"), Some(3600)), "new.example.com"));

    assert_eq!(store.get(Slot::AccessToken), None);
    assert!(store.credentials().is_none());
}

#[test]
fn test_store_session_failed_token_write_clears_old_token() {
    let store = FailingBackend::new()
        .seeded(Slot::AccessToken, "old")
        .seeded(Slot::Domain, "old.example.com")
        .failing_set(Slot::AccessToken)
        .into_store();

    assert!(!store.store_session(&token_set("new", None, None), "new.example.com"));

    assert!(store.credentials().is_none());
}

#[test]
fn test_apply_refresh_keeps_refresh_token_without_rotation() {
    let store = common::store_with_session("old", "tenant.example.com", Some(1), Some("keep-me"));

    assert!(store.apply_refresh(&token_set("new", None, Some(60)), None));

    assert_eq!(store.get(Slot::AccessToken).as_deref(), Some("new"));
    assert_eq!(store.get(Slot::RefreshToken).as_deref(), Some("keep-me"));
    assert_eq!(store.get(Slot::Domain).as_deref(), Some("tenant.example.com"));
}

#[test]
fn test_unparsable_expiry_is_an_error() {
    let store = CredentialStore::in_memory();
    store.set(Slot::TokenExpiresAt, "tomorrow");
    assert!(store.expires_at().is_err());
}

#[test]
#[ignore = "requires system keyring"]
fn test_keyring_round_trip() {
    let store = CredentialStore::keyring("credential-broker-test");
    assert!(store.set(Slot::Domain, "tenant.example.com"));
    assert_eq!(store.get(Slot::Domain).as_deref(), Some("tenant.example.com"));
    assert!(store.delete(Slot::Domain));
    assert_eq!(store.get(Slot::Domain), None);
}
