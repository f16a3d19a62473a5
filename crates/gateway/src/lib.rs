pub mod admin;
pub mod auth;
pub mod coaching;
pub mod config;
pub mod error;
pub mod habits;
pub mod meds;
pub mod reminders;
pub mod router;
pub mod state;
pub mod tokens;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use router::router;
pub use state::AppState;
pub use tokens::AdminTokenStore;
