use async_trait::async_trait;

use crate::error::BusError;
use crate::event::Event;

/// Something that reacts to bus events: the coaching engine, the
/// notification dispatcher, an audit logger, and so on.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Human-readable name used in logs and dead-letter records.
    fn name(&self) -> &str;

    /// Handle one event. Returning `Err` triggers the bus's retry/backoff
    /// policy; exhausting retries dead-letters the event rather than
    /// blocking the rest of the queue.
    async fn handle(&self, event: &Event) -> Result<(), BusError>;
}
