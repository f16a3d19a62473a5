use std::time::Duration;

/// Gateway-level settings: request handling timeouts and the bootstrap
/// admin credential. Everything else (host/port/storage paths) lives in
/// `kg_server`'s top-level config.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Upper bound on how long a single handler is allowed to run before
    /// the caller gets a 504.
    pub request_timeout: Duration,
    /// Upper bound per backend check in the `/admin/status` fanout.
    pub health_check_timeout: Duration,
    /// Plaintext bootstrap admin token. Hashed on first use and then
    /// discarded; restarts reuse the hash already in the state store.
    pub admin_token: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            health_check_timeout: Duration::from_secs(2),
            admin_token: "change-me".to_owned(),
        }
    }
}
