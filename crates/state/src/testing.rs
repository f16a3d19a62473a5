use std::time::Duration;

use crate::error::StateError;
use crate::key::{KeyKind, StateKey};
use crate::store::{CasResult, StateStore};

fn test_key(kind: KeyKind, id: &str) -> StateKey {
    StateKey::new(kind, id)
}

/// Run the full state store conformance test suite.
///
/// Call this from your backend's test module with a fresh store instance.
///
/// # Errors
///
/// Returns an error if any conformance test fails.
pub async fn run_store_conformance_tests(store: &dyn StateStore) -> Result<(), StateError> {
    test_get_missing(store).await?;
    test_set_and_get(store).await?;
    test_check_and_set_new(store).await?;
    test_check_and_set_existing(store).await?;
    test_delete(store).await?;
    test_increment(store).await?;
    test_compare_and_swap(store).await?;
    test_ttl_set(store).await?;
    test_scan_keys_by_kind(store).await?;
    test_scheduler_timeout_index(store).await?;
    test_grace_timeout_index(store).await?;
    test_peek_earliest_scheduler_timeout(store).await?;
    Ok(())
}

async fn test_get_missing(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Reminder, "missing");
    let val = store.get(&key).await?;
    assert!(val.is_none(), "get on missing key should return None");
    Ok(())
}

async fn test_set_and_get(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Reminder, "set-get");
    store.set(&key, "hello", None).await?;
    let val = store.get(&key).await?;
    assert_eq!(val.as_deref(), Some("hello"));
    Ok(())
}

async fn test_check_and_set_new(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Claim, "cas-new");
    let created = store.check_and_set(&key, "v1", None).await?;
    assert!(created, "check_and_set on new key should return true");
    let val = store.get(&key).await?;
    assert_eq!(val.as_deref(), Some("v1"));
    Ok(())
}

async fn test_check_and_set_existing(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Claim, "cas-existing");
    store.set(&key, "v1", None).await?;
    let created = store.check_and_set(&key, "v2", None).await?;
    assert!(
        !created,
        "check_and_set on existing key should return false"
    );
    let val = store.get(&key).await?;
    assert_eq!(val.as_deref(), Some("v1"), "original value should remain");
    Ok(())
}

async fn test_delete(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Reminder, "to-delete");
    store.set(&key, "bye", None).await?;
    let existed = store.delete(&key).await?;
    assert!(existed, "delete should return true for existing key");
    let val = store.get(&key).await?;
    assert!(val.is_none(), "get after delete should return None");

    let existed = store.delete(&key).await?;
    assert!(!existed, "delete on missing key should return false");
    Ok(())
}

async fn test_increment(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Counter, "counter-1");
    let val = store.increment(&key, 1, None).await?;
    assert_eq!(val, 1, "first increment from zero should yield 1");

    let val = store.increment(&key, 5, None).await?;
    assert_eq!(val, 6, "second increment should accumulate");

    let val = store.increment(&key, -2, None).await?;
    assert_eq!(val, 4, "negative delta should decrement");
    Ok(())
}

async fn test_compare_and_swap(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Reminder, "cas-version");

    // Set initial value at version 0 (treated as "create")
    store.set(&key, "initial", None).await?;

    // CAS with wrong version should fail
    let result = store.compare_and_swap(&key, 999, "updated", None).await?;
    assert!(
        matches!(result, CasResult::Conflict { .. }),
        "CAS with wrong version should conflict"
    );

    // CAS with correct version should succeed
    let result = store.compare_and_swap(&key, 1, "updated", None).await?;
    assert_eq!(
        result,
        CasResult::Ok,
        "CAS with correct version should succeed"
    );

    let val = store.get(&key).await?;
    assert_eq!(val.as_deref(), Some("updated"));
    Ok(())
}

async fn test_ttl_set(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Claim, "ttl-test");
    store
        .set(&key, "ephemeral", Some(Duration::from_secs(3600)))
        .await?;
    let val = store.get(&key).await?;
    assert_eq!(val.as_deref(), Some("ephemeral"));
    Ok(())
}

async fn test_scan_keys_by_kind(store: &dyn StateStore) -> Result<(), StateError> {
    store
        .set(&test_key(KeyKind::Habit, "h1"), "{}", None)
        .await?;
    store
        .set(&test_key(KeyKind::Habit, "h2"), "{}", None)
        .await?;
    let entries = store.scan_keys_by_kind(KeyKind::Habit).await?;
    assert!(entries.len() >= 2, "scan should surface both habit keys");
    Ok(())
}

async fn test_scheduler_timeout_index(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Reminder, "sched-timeout");
    store.index_scheduler_timeout(&key, 1_000).await?;

    let due = store.get_due_scheduler_timeouts(500).await?;
    assert!(
        !due.contains(&key.canonical()),
        "not due yet at an earlier timestamp"
    );

    let due = store.get_due_scheduler_timeouts(1_000).await?;
    assert!(
        due.contains(&key.canonical()),
        "due at or after its deadline"
    );

    store.remove_scheduler_timeout_index(&key).await?;
    let due = store.get_due_scheduler_timeouts(2_000).await?;
    assert!(
        !due.contains(&key.canonical()),
        "removed entries should not reappear"
    );
    Ok(())
}

async fn test_peek_earliest_scheduler_timeout(store: &dyn StateStore) -> Result<(), StateError> {
    let early = test_key(KeyKind::Reminder, "peek-early");
    let late = test_key(KeyKind::Reminder, "peek-late");
    store.index_scheduler_timeout(&late, 5_000).await?;
    store.index_scheduler_timeout(&early, 1_000).await?;

    let earliest = store.peek_earliest_scheduler_timeout().await?;
    assert_eq!(earliest, Some(1_000), "should report the smallest deadline");

    store.remove_scheduler_timeout_index(&early).await?;
    store.remove_scheduler_timeout_index(&late).await?;
    Ok(())
}

async fn test_grace_timeout_index(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Reminder, "grace-timeout");
    store.index_grace_timeout(&key, 2_000).await?;

    let due = store.get_due_grace_timeouts(2_000).await?;
    assert!(due.contains(&key.canonical()));

    store.remove_grace_timeout_index(&key).await?;
    let due = store.get_due_grace_timeouts(3_000).await?;
    assert!(!due.contains(&key.canonical()));
    Ok(())
}
