use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use kg_state::error::StateError;
use kg_state::key::{KeyKind, StateKey};
use kg_state::store::{CasResult, StateStore};

/// A single entry in the in-memory store.
#[derive(Debug, Clone)]
struct Entry {
    value: String,
    version: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

fn expiry_from_ttl(ttl: Option<Duration>) -> Option<Instant> {
    ttl.map(|d| Instant::now() + d)
}

/// In-memory [`StateStore`] backed by a [`DashMap`], with two sorted
/// `BTreeMap` indexes for the scheduler's firing deadlines and the
/// coordinator's grace deadlines.
///
/// Entries are lazily evicted on read when their TTL has elapsed. This
/// implementation is fully synchronous internally; the async trait methods
/// return immediately.
pub struct MemoryStateStore {
    data: DashMap<String, Entry>,
    scheduler_timeouts: RwLock<BTreeMap<i64, Vec<String>>>,
    grace_timeouts: RwLock<BTreeMap<i64, Vec<String>>>,
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self {
            data: DashMap::new(),
            scheduler_timeouts: RwLock::new(BTreeMap::new()),
            grace_timeouts: RwLock::new(BTreeMap::new()),
        }
    }
}

impl std::fmt::Debug for MemoryStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStateStore")
            .field("data", &self.data)
            .field("scheduler_timeouts", &"<RwLock<BTreeMap>>")
            .field("grace_timeouts", &"<RwLock<BTreeMap>>")
            .finish()
    }
}

impl MemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn render_key(key: &StateKey) -> String {
        key.canonical()
    }

    fn index_insert(
        index: &RwLock<BTreeMap<i64, Vec<String>>>,
        deadline_ms: i64,
        canonical: String,
    ) -> Result<(), StateError> {
        let mut guard = index
            .write()
            .map_err(|_| StateError::Backend("timeout index lock poisoned".into()))?;
        guard.entry(deadline_ms).or_default().push(canonical);
        Ok(())
    }

    fn index_remove(
        index: &RwLock<BTreeMap<i64, Vec<String>>>,
        canonical: &str,
    ) -> Result<(), StateError> {
        let mut guard = index
            .write()
            .map_err(|_| StateError::Backend("timeout index lock poisoned".into()))?;
        let mut empty_buckets = Vec::new();
        for (deadline, keys) in guard.iter_mut() {
            keys.retain(|k| k != canonical);
            if keys.is_empty() {
                empty_buckets.push(*deadline);
            }
        }
        for bucket in empty_buckets {
            guard.remove(&bucket);
        }
        Ok(())
    }

    fn index_due(
        index: &RwLock<BTreeMap<i64, Vec<String>>>,
        now_ms: i64,
    ) -> Result<Vec<String>, StateError> {
        let guard = index
            .read()
            .map_err(|_| StateError::Backend("timeout index lock poisoned".into()))?;
        let mut due = Vec::new();
        for (_, keys) in guard.range(..=now_ms) {
            due.extend(keys.iter().cloned());
        }
        Ok(due)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn check_and_set(
        &self,
        key: &StateKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StateError> {
        let rendered = Self::render_key(key);

        if let Some(existing) = self.data.get(&rendered)
            && !existing.is_expired()
        {
            return Ok(false);
        }
        self.data
            .remove_if(&rendered, |_, entry| entry.is_expired());

        let was_inserted = match self.data.entry(rendered) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Entry {
                    value: value.to_owned(),
                    version: 1,
                    expires_at: expiry_from_ttl(ttl),
                });
                true
            }
        };

        Ok(was_inserted)
    }

    async fn get(&self, key: &StateKey) -> Result<Option<String>, StateError> {
        let rendered = Self::render_key(key);

        if let Some(entry) = self.data.get(&rendered) {
            if entry.is_expired() {
                drop(entry);
                self.data.remove(&rendered);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }

        Ok(None)
    }

    async fn set(
        &self,
        key: &StateKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StateError> {
        let rendered = Self::render_key(key);
        let expires_at = expiry_from_ttl(ttl);

        self.data
            .entry(rendered)
            .and_modify(|entry| {
                value.clone_into(&mut entry.value);
                entry.version += 1;
                entry.expires_at = expires_at;
            })
            .or_insert_with(|| Entry {
                value: value.to_owned(),
                version: 1,
                expires_at,
            });

        Ok(())
    }

    async fn delete(&self, key: &StateKey) -> Result<bool, StateError> {
        let rendered = Self::render_key(key);

        match self.data.remove(&rendered) {
            Some((_, entry)) => Ok(!entry.is_expired()),
            None => Ok(false),
        }
    }

    async fn increment(
        &self,
        key: &StateKey,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, StateError> {
        let rendered = Self::render_key(key);
        let expires_at = expiry_from_ttl(ttl);

        self.data
            .remove_if(&rendered, |_, entry| entry.is_expired());

        let mut ref_mut = self.data.entry(rendered).or_insert_with(|| Entry {
            value: "0".to_owned(),
            version: 1,
            expires_at,
        });

        let current: i64 = ref_mut
            .value
            .parse()
            .map_err(|e: std::num::ParseIntError| {
                StateError::Serialization(format!("counter value is not an integer: {e}"))
            })?;

        let new_value = current + delta;
        ref_mut.value = new_value.to_string();
        ref_mut.version += 1;
        if let Some(ea) = expires_at {
            ref_mut.expires_at = Some(ea);
        }

        Ok(new_value)
    }

    async fn compare_and_swap(
        &self,
        key: &StateKey,
        expected_version: u64,
        new_value: &str,
        ttl: Option<Duration>,
    ) -> Result<CasResult, StateError> {
        let rendered = Self::render_key(key);

        self.data
            .remove_if(&rendered, |_, entry| entry.is_expired());

        let Some(mut entry) = self.data.get_mut(&rendered) else {
            return Ok(CasResult::Conflict {
                current_value: None,
                current_version: 0,
            });
        };

        if entry.version != expected_version {
            return Ok(CasResult::Conflict {
                current_value: Some(entry.value.clone()),
                current_version: entry.version,
            });
        }

        new_value.clone_into(&mut entry.value);
        entry.version += 1;
        entry.expires_at = expiry_from_ttl(ttl).or(entry.expires_at);

        Ok(CasResult::Ok)
    }

    async fn scan_keys_by_kind(&self, kind: KeyKind) -> Result<Vec<(String, String)>, StateError> {
        let kind_str = kind.to_string();
        let mut results = Vec::new();

        for entry in &self.data {
            let key = entry.key();
            let Some((key_kind, _)) = key.split_once(':') else {
                continue;
            };
            if key_kind == kind_str && !entry.value().is_expired() {
                results.push((key.clone(), entry.value().value.clone()));
            }
        }

        Ok(results)
    }

    async fn index_scheduler_timeout(
        &self,
        key: &StateKey,
        deadline_ms: i64,
    ) -> Result<(), StateError> {
        Self::index_insert(&self.scheduler_timeouts, deadline_ms, Self::render_key(key))
    }

    async fn remove_scheduler_timeout_index(&self, key: &StateKey) -> Result<(), StateError> {
        Self::index_remove(&self.scheduler_timeouts, &Self::render_key(key))
    }

    async fn get_due_scheduler_timeouts(&self, now_ms: i64) -> Result<Vec<String>, StateError> {
        Self::index_due(&self.scheduler_timeouts, now_ms)
    }

    async fn peek_earliest_scheduler_timeout(&self) -> Result<Option<i64>, StateError> {
        let guard = self
            .scheduler_timeouts
            .read()
            .map_err(|_| StateError::Backend("timeout index lock poisoned".into()))?;
        Ok(guard.keys().next().copied())
    }

    async fn index_grace_timeout(
        &self,
        key: &StateKey,
        deadline_ms: i64,
    ) -> Result<(), StateError> {
        Self::index_insert(&self.grace_timeouts, deadline_ms, Self::render_key(key))
    }

    async fn remove_grace_timeout_index(&self, key: &StateKey) -> Result<(), StateError> {
        Self::index_remove(&self.grace_timeouts, &Self::render_key(key))
    }

    async fn get_due_grace_timeouts(&self, now_ms: i64) -> Result<Vec<String>, StateError> {
        Self::index_due(&self.grace_timeouts, now_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use kg_state::key::{KeyKind, StateKey};
    use kg_state::testing::run_store_conformance_tests;

    use super::*;

    fn test_key(kind: KeyKind, id: &str) -> StateKey {
        StateKey::new(kind, id)
    }

    #[tokio::test]
    async fn conformance() {
        let store = MemoryStateStore::new();
        run_store_conformance_tests(&store)
            .await
            .expect("conformance tests should pass");
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry_via_get() {
        let store = MemoryStateStore::new();
        let key = test_key(KeyKind::Reminder, "ttl-expire");

        store
            .set(&key, "short-lived", Some(Duration::from_secs(5)))
            .await
            .unwrap();

        let val = store.get(&key).await.unwrap();
        assert_eq!(val.as_deref(), Some("short-lived"));

        tokio::time::advance(Duration::from_secs(6)).await;

        let val = store.get(&key).await.unwrap();
        assert!(val.is_none(), "value should be expired");
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_check_and_set_after_expiry() {
        let store = MemoryStateStore::new();
        let key = test_key(KeyKind::Claim, "ttl-cas");

        let created = store
            .check_and_set(&key, "v1", Some(Duration::from_secs(3)))
            .await
            .unwrap();
        assert!(created);

        let created = store.check_and_set(&key, "v2", None).await.unwrap();
        assert!(!created);

        tokio::time::advance(Duration::from_secs(4)).await;

        let created = store.check_and_set(&key, "v2", None).await.unwrap();
        assert!(created, "should re-create after expiry");

        let val = store.get(&key).await.unwrap();
        assert_eq!(val.as_deref(), Some("v2"));
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_increment_resets_after_expiry() {
        let store = MemoryStateStore::new();
        let key = test_key(KeyKind::Counter, "ttl-counter");

        store
            .increment(&key, 10, Some(Duration::from_secs(2)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;

        let val = store.increment(&key, 1, None).await.unwrap();
        assert_eq!(val, 1, "counter should reset after TTL expiry");
    }

    #[tokio::test]
    async fn delete_returns_false_for_missing() {
        let store = MemoryStateStore::new();
        let key = test_key(KeyKind::Reminder, "never-set");
        let existed = store.delete(&key).await.unwrap();
        assert!(!existed);
    }

    #[tokio::test]
    async fn scheduler_and_grace_indexes_are_independent() {
        let store = MemoryStateStore::new();
        let key = test_key(KeyKind::Reminder, "dual-index");

        store.index_scheduler_timeout(&key, 100).await.unwrap();
        store.index_grace_timeout(&key, 200).await.unwrap();

        let sched_due = store.get_due_scheduler_timeouts(100).await.unwrap();
        assert!(sched_due.contains(&key.canonical()));

        let grace_due = store.get_due_grace_timeouts(100).await.unwrap();
        assert!(
            grace_due.is_empty(),
            "grace deadline hasn't arrived yet even though scheduler's has"
        );

        let grace_due = store.get_due_grace_timeouts(200).await.unwrap();
        assert!(grace_due.contains(&key.canonical()));
    }
}
