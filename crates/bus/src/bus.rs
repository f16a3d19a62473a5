use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{error, warn};

use crate::event::Event;
use crate::sink::EventSink;

/// Backoff schedule applied between retries of a single failed delivery.
const RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_millis(500),
    Duration::from_secs(2),
    Duration::from_secs(8),
];

const DEFAULT_QUEUE_CAPACITY: usize = 256;
const DEFAULT_DEAD_LETTER_CAPACITY: usize = 256;

/// An event that exhausted its retry budget.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub sink: String,
    pub event: Event,
    pub failed_at: chrono::DateTime<Utc>,
    pub last_error: String,
}

/// A bounded, drop-oldest-on-overflow queue feeding a single subscriber.
///
/// Publishers never block: a full queue silently drops its oldest entry
/// to make room, favoring liveness (subscribers keep seeing fresh events)
/// over completeness.
struct Queue {
    inner: Mutex<VecDeque<Event>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl Queue {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, event: Event) {
        let mut guard = self.inner.lock();
        if guard.len() >= self.capacity {
            guard.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        guard.push_back(event);
        drop(guard);
        self.notify.notify_one();
    }

    async fn pop(&self) -> Event {
        loop {
            if let Some(event) = self.inner.lock().pop_front() {
                return event;
            }
            self.notify.notified().await;
        }
    }
}

/// In-process, best-effort event bus.
///
/// Every subscriber gets its own bounded queue and drain task so a slow or
/// failing sink can never block delivery to the others. There is no
/// external broker: everything lives in this process's memory, consistent
/// with running fully air-gapped.
pub struct EventBus {
    queues: Mutex<Vec<Arc<Queue>>>,
    dead_letters: Arc<Mutex<VecDeque<DeadLetter>>>,
    dead_letter_capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(Vec::new()),
            dead_letters: Arc::new(Mutex::new(VecDeque::new())),
            dead_letter_capacity: DEFAULT_DEAD_LETTER_CAPACITY,
        }
    }

    /// Register a sink and spawn its drain task. Delivery to this sink
    /// starts as soon as the returned future is dropped (the task is
    /// detached via `tokio::spawn`).
    pub fn subscribe(&self, sink: Arc<dyn EventSink>) {
        let queue = Arc::new(Queue::new(DEFAULT_QUEUE_CAPACITY));
        self.queues.lock().push(Arc::clone(&queue));

        let dead_letters = Arc::clone(&self.dead_letters);
        let dead_letter_capacity = self.dead_letter_capacity;

        tokio::spawn(async move {
            loop {
                let event = queue.pop().await;
                deliver_with_retry(&*sink, event, &dead_letters, dead_letter_capacity).await;
            }
        });
    }

    /// Publish an event to every current subscriber. Never blocks: a
    /// subscriber with a full queue drops its oldest pending event.
    pub fn publish(&self, event: Event) {
        let queues = self.queues.lock();
        for queue in queues.iter() {
            queue.push(event.clone());
        }
    }

    /// Snapshot of events that exhausted their retry budget, most recent
    /// last.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().iter().cloned().collect()
    }
}

async fn deliver_with_retry(
    sink: &dyn EventSink,
    event: Event,
    dead_letters: &Mutex<VecDeque<DeadLetter>>,
    dead_letter_capacity: usize,
) {
    let mut last_error = match sink.handle(&event).await {
        Ok(()) => return,
        Err(e) => e.to_string(),
    };

    for delay in RETRY_BACKOFF {
        warn!(sink = sink.name(), event = event.kind_name(), %last_error, "retrying delivery");
        tokio::time::sleep(delay).await;
        match sink.handle(&event).await {
            Ok(()) => return,
            Err(e) => last_error = e.to_string(),
        }
    }

    error!(
        sink = sink.name(),
        event = event.kind_name(),
        %last_error,
        "delivery exhausted retries, dead-lettering"
    );

    let mut guard = dead_letters.lock();
    if guard.len() >= dead_letter_capacity {
        guard.pop_front();
    }
    guard.push_back(DeadLetter {
        sink: sink.name().to_owned(),
        event,
        failed_at: Utc::now(),
        last_error,
    });
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::error::BusError;

    use super::*;

    struct CountingSink {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventSink for CountingSink {
        fn name(&self) -> &str {
            "counting-sink"
        }

        async fn handle(&self, _event: &Event) -> Result<(), BusError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct AlwaysFailsSink;

    #[async_trait]
    impl EventSink for AlwaysFailsSink {
        fn name(&self) -> &str {
            "always-fails"
        }

        async fn handle(&self, _event: &Event) -> Result<(), BusError> {
            Err(BusError::SinkRejected {
                sink: self.name().to_owned(),
                reason: "synthetic failure".into(),
            })
        }
    }

    fn sample_event() -> Event {
        Event::ReminderFired {
            reminder_id: kg_core::ReminderId::new(),
            med_id: None,
            fired_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn delivers_to_subscriber() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(Arc::new(CountingSink {
            count: Arc::clone(&count),
        }));

        bus.publish(sample_event());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fan_out_to_multiple_subscribers() {
        let bus = EventBus::new();
        let count_a = Arc::new(AtomicUsize::new(0));
        let count_b = Arc::new(AtomicUsize::new(0));
        bus.subscribe(Arc::new(CountingSink {
            count: Arc::clone(&count_a),
        }));
        bus.subscribe(Arc::new(CountingSink {
            count: Arc::clone(&count_b),
        }));

        bus.publish(sample_event());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_sink_eventually_dead_letters() {
        let bus = EventBus::new();
        bus.subscribe(Arc::new(AlwaysFailsSink));

        bus.publish(sample_event());

        // Advance past the full backoff schedule (500ms + 2s + 8s).
        for _ in 0..4 {
            tokio::time::advance(Duration::from_secs(3)).await;
            tokio::task::yield_now().await;
        }

        let letters = bus.dead_letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].sink, "always-fails");
    }

    #[tokio::test]
    async fn full_queue_drops_oldest_not_newest() {
        let queue = Queue::new(2);
        queue.push(sample_event());
        queue.push(sample_event());
        queue.push(sample_event());
        assert_eq!(queue.dropped.load(Ordering::Relaxed), 1);
        assert_eq!(queue.inner.lock().len(), 2);
    }
}
