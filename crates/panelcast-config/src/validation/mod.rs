//! Full configuration validation.
//!
//! Each domain has its own submodule; this orchestrator calls them all
//! and collects errors into a single `ConfigError`.

mod helpers;
mod media;
mod network;


use crate::schema::PanelcastConfig;
use panelcast_common::ConfigError;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &PanelcastConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    network::validate_broker(&mut errors, config);
    network::validate_directory(&mut errors, config);
    media::validate_media(&mut errors, config);
    media::validate_session(&mut errors, config);
    media::validate_capture(&mut errors, config);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}
