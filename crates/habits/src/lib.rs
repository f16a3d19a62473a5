mod error;
mod store;
mod streak;

pub use error::HabitError;
pub use store::HabitStore;
pub use streak::{adherence_rate, apply_completion, current_streak};
