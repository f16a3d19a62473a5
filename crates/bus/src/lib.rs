mod bus;
mod error;
mod event;
mod sink;

pub use bus::{DeadLetter, EventBus};
pub use error::BusError;
pub use event::Event;
pub use sink::EventSink;
