use std::time::Duration;

use async_trait::async_trait;

use crate::error::StateError;
use crate::key::{KeyKind, StateKey};

/// Result of a compare-and-swap operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasResult {
    /// The swap succeeded and the new version is stored.
    Ok,
    /// The swap failed because the current version didn't match.
    Conflict {
        current_value: Option<String>,
        current_version: u64,
    },
}

/// Trait for persisting Kilo Guardian's local state.
///
/// Implementations must be `Send + Sync` and safe for concurrent access.
/// Every entity (medications, reminders, habits, adherence events, patterns,
/// coaching messages, admin tokens) is stored as a JSON-encoded value behind
/// a [`StateKey`] — there is no relational schema, only this key/value
/// surface plus two sorted timeout indexes the scheduler and the grace
/// worker poll.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Check if a key exists; if not, set it atomically with an optional TTL.
    /// Returns `true` if the key was newly set, `false` if it already existed.
    ///
    /// This is the sole primitive behind "claim this due reminder exactly
    /// once": callers race each other with the same key and only one sees
    /// `true`.
    async fn check_and_set(
        &self,
        key: &StateKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StateError>;

    /// Get the value for a key. Returns `None` if not found or expired.
    async fn get(&self, key: &StateKey) -> Result<Option<String>, StateError>;

    /// Set a value with an optional TTL, overwriting any previous value.
    async fn set(
        &self,
        key: &StateKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StateError>;

    /// Delete a key. Returns `true` if the key existed.
    async fn delete(&self, key: &StateKey) -> Result<bool, StateError>;

    /// Atomically increment a counter by `delta`. Returns the new value.
    /// Creates the counter at 0 if it doesn't exist before incrementing.
    async fn increment(
        &self,
        key: &StateKey,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, StateError>;

    /// Compare-and-swap: update value only if the current version matches.
    async fn compare_and_swap(
        &self,
        key: &StateKey,
        expected_version: u64,
        new_value: &str,
        ttl: Option<Duration>,
    ) -> Result<CasResult, StateError>;

    /// Scan all keys of a given kind. Returns `(id, value)` pairs.
    ///
    /// This operation scans the entire keyspace for the given kind, which
    /// can be expensive on large datasets. Kilo Guardian's working set
    /// (one user's medications/reminders/habits) stays small enough that
    /// this is acceptable.
    async fn scan_keys_by_kind(&self, kind: KeyKind) -> Result<Vec<(String, String)>, StateError>;

    /// Add a key to the scheduler's firing-deadline index.
    ///
    /// `deadline_ms` is a Unix timestamp in milliseconds. Enables an
    /// O(log N) query for due reminders instead of scanning the whole
    /// reminder keyspace every tick.
    async fn index_scheduler_timeout(
        &self,
        key: &StateKey,
        deadline_ms: i64,
    ) -> Result<(), StateError>;

    /// Remove a key from the scheduler timeout index.
    async fn remove_scheduler_timeout_index(&self, key: &StateKey) -> Result<(), StateError>;

    /// Get all scheduler timeout keys with `deadline_ms <= now_ms`.
    async fn get_due_scheduler_timeouts(&self, now_ms: i64) -> Result<Vec<String>, StateError>;

    /// The earliest deadline in the scheduler timeout index, if any, in
    /// Unix milliseconds. Used by the scheduler loop to compute its next
    /// wakeup without claiming anything.
    async fn peek_earliest_scheduler_timeout(&self) -> Result<Option<i64>, StateError>;

    /// Add a key to the grace-deadline index (fired reminders awaiting
    /// confirmation or escalation to `missed`).
    async fn index_grace_timeout(&self, key: &StateKey, deadline_ms: i64)
    -> Result<(), StateError>;

    /// Remove a key from the grace timeout index.
    async fn remove_grace_timeout_index(&self, key: &StateKey) -> Result<(), StateError>;

    /// Get all grace timeout keys with `deadline_ms <= now_ms`.
    async fn get_due_grace_timeouts(&self, now_ms: i64) -> Result<Vec<String>, StateError>;
}
