pub mod error;
pub mod key;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::StateError;
pub use key::{KeyKind, StateKey};
pub use store::{CasResult, StateStore};
