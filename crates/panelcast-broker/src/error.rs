use panelcast_common::ConfigError;

use crate::registry::RegistryError;

/// Errors surfaced by the broker library and binary.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker actor has stopped")]
    Stopped,

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
