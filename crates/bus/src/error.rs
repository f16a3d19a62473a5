use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("sink {sink} rejected event: {reason}")]
    SinkRejected { sink: String, reason: String },

    #[error("bus is shutting down")]
    ShuttingDown,
}
