//! Panelcast configuration system.
//!
//! Provides TOML-based configuration with full validation. All config
//! sections use sensible defaults so partial configs work out of the box.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use panelcast_config::load_config;
//!
//! let config = load_config(None).expect("failed to load config");
//! println!("listening on {}", config.broker.listen_addr());
//! ```

pub mod schema;
pub mod toml_loader;
pub mod validation;

// Re-export core types for convenience
pub use schema::*;

use std::path::Path;

use panelcast_common::ConfigError;

/// Load config from `path`, or from the platform default path when `None`
/// (creating a commented default file there if none exists), then validate.
pub fn load_config(path: Option<&Path>) -> Result<PanelcastConfig, ConfigError> {
    let config = match path {
        Some(path) => toml_loader::load_from_path(path)?,
        None => toml_loader::load_default()?,
    };

    validation::validate(&config)?;
    Ok(config)
}

/// Serialize a config to a TOML string.
pub fn config_to_toml(config: &PanelcastConfig) -> Result<String, ConfigError> {
    toml::to_string_pretty(config)
        .map_err(|e| ConfigError::ParseError(format!("failed to serialize config: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[broker]\nport = 9443\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.broker.port, 9443);
    }

    #[test]
    fn load_config_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[broker]\nport = 0\n").unwrap();

        let result = load_config(Some(&path));
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn load_config_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(
            load_config(Some(&path)),
            Err(ConfigError::FileNotFound(_))
        ));
    }

    #[test]
    fn config_to_toml_round_trips() {
        let mut config = PanelcastConfig::default();
        config.directory.url = "wss://broker.local:8443".into();
        let text = config_to_toml(&config).unwrap();
        let parsed: PanelcastConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.directory.url, "wss://broker.local:8443");
        assert_eq!(parsed.broker.port, config.broker.port);
    }
}
