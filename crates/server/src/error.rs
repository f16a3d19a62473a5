use thiserror::Error;

/// Startup-time failures: config load, port bind. Once the router is
/// serving, handler-facing errors are `kg_gateway::GatewayError` and never
/// pass through here.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Gateway(#[from] kg_gateway::GatewayError),

    #[error(transparent)]
    Coordinator(#[from] kg_coordinator::CoordinatorError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
