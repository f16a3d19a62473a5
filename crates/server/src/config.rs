use serde::Deserialize;

/// Top-level TOML configuration. Every section has a default, so a missing
/// or partially-filled config file is never an error — `toml::from_str("")`
/// on an absent file produces the same config as an explicit file with every
/// field spelled out.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KiloGuardianConfig {
    pub server: ServerConfig,
    pub gateway: GatewaySection,
    pub scheduler: SchedulerSection,
    pub coordinator: CoordinatorSection,
}

impl Default for KiloGuardianConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            gateway: GatewaySection::default(),
            scheduler: SchedulerSection::default(),
            coordinator: CoordinatorSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Seconds to wait for in-flight work to drain on SIGINT/SIGTERM before
    /// the process exits anyway.
    pub shutdown_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 4117,
            shutdown_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    pub request_timeout_seconds: u64,
    pub health_check_timeout_seconds: u64,
    /// Bootstrap admin token, hashed on first run. Override via
    /// `KG_ADMIN_TOKEN` so it doesn't need to live in the TOML file
    /// (consistent with the air-gapped deployment having no secrets
    /// manager to delegate to).
    pub admin_token: String,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 30,
            health_check_timeout_seconds: 2,
            admin_token: "change-me".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub poll_interval_seconds: u64,
    pub batch_size: usize,
    pub queue_capacity: usize,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 30,
            batch_size: 50,
            queue_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorSection {
    pub snooze_minutes: u32,
    pub max_snoozes: u32,
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            snooze_minutes: 15,
            max_snoozes: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_defaults() {
        let config: KiloGuardianConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 4117);
        assert_eq!(config.gateway.admin_token, "change-me");
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config: KiloGuardianConfig = toml::from_str(
            r#"
            [server]
            port = 9000

            [gateway]
            admin_token = "supersecret"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.gateway.admin_token, "supersecret");
        assert_eq!(config.scheduler.batch_size, 50);
    }
}
