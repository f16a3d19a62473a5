use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kg_core::ReminderId;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::warn;

use crate::coordinator::Coordinator;

/// A pending grace-deadline entry, ordered earliest-first via `Reverse`.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Deadline {
    at_ms: Reverse<i64>,
    reminder_id: ReminderId,
}

/// Drives reminders from `fired` to `missed` when their grace window
/// elapses without confirmation.
///
/// Modeled explicitly as a min-heap of `(deadline, reminder_id)` with a
/// single task that sleeps until the earliest deadline and wakes early on
/// inserts, rather than re-polling the durable grace-timeout index on a
/// fixed tick — the durable index still exists in `kg-state` and is used
/// once at startup to rebuild this heap after a restart.
pub struct GraceDeadlineWorker {
    heap: Mutex<BinaryHeap<Deadline>>,
    notify: Notify,
}

impl Default for GraceDeadlineWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl GraceDeadlineWorker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
        }
    }

    /// Arm (or re-arm) a grace deadline for a reminder.
    pub fn arm(&self, reminder_id: ReminderId, deadline: DateTime<Utc>) {
        self.heap.lock().push(Deadline {
            at_ms: Reverse(deadline.timestamp_millis()),
            reminder_id,
        });
        self.notify.notify_one();
    }

    /// Number of deadlines currently armed. Exposed for tests and the
    /// `/admin/status` fanout rather than any internal use.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rebuild the heap from the durable grace-timeout index. Called once at
    /// startup for every reminder still in `fired` whose deadline hasn't yet
    /// passed (already-elapsed ones are handled by
    /// [`Coordinator::recover_on_startup`] directly).
    pub fn arm_many(&self, entries: impl IntoIterator<Item = (ReminderId, DateTime<Utc>)>) {
        let mut heap = self.heap.lock();
        for (reminder_id, deadline) in entries {
            heap.push(Deadline {
                at_ms: Reverse(deadline.timestamp_millis()),
                reminder_id,
            });
        }
        drop(heap);
        self.notify.notify_one();
    }

    /// Run the worker loop until `coordinator` is dropped. Intended to be
    /// spawned as a detached task by the binary's startup routine.
    pub async fn run(self: Arc<Self>, coordinator: Arc<Coordinator>) {
        loop {
            let next_at_ms = self.heap.lock().peek().map(|d| d.at_ms.0);

            match next_at_ms {
                None => self.notify.notified().await,
                Some(at_ms) => {
                    let now_ms = Utc::now().timestamp_millis();
                    if at_ms > now_ms {
                        let wait = std::time::Duration::from_millis((at_ms - now_ms).max(0) as u64);
                        tokio::select! {
                            () = tokio::time::sleep(wait) => {}
                            () = self.notify.notified() => continue,
                        }
                    }
                    self.drain_due(&coordinator).await;
                }
            }
        }
    }

    async fn drain_due(&self, coordinator: &Coordinator) {
        let now_ms = Utc::now().timestamp_millis();
        loop {
            let due = {
                let mut heap = self.heap.lock();
                match heap.peek() {
                    Some(d) if d.at_ms.0 <= now_ms => heap.pop(),
                    _ => None,
                }
            };
            let Some(deadline) = due else { break };

            if let Err(err) = coordinator.grace_elapsed(&deadline.reminder_id).await {
                warn!(reminder_id = %deadline.reminder_id, %err, "grace-elapsed handling failed");
            }
        }
    }
}
