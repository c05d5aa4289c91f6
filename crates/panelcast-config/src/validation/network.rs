//! Broker listener and directory client validation.

use super::helpers::validate_range;
use crate::schema::PanelcastConfig;

pub(crate) fn validate_broker(errors: &mut Vec<String>, config: &PanelcastConfig) {
    let broker = &config.broker;
    if broker.port == 0 {
        errors.push("broker.port must not be 0".into());
    }
    if broker.bind.trim().is_empty() {
        errors.push("broker.bind must not be empty".into());
    }
    if broker.tls.cert_path.is_some() != broker.tls.key_path.is_some() {
        errors.push("broker.tls.cert_path and broker.tls.key_path must be set together".into());
    }
}

pub(crate) fn validate_directory(errors: &mut Vec<String>, config: &PanelcastConfig) {
    let dir = &config.directory;
    if !(dir.url.starts_with("ws://") || dir.url.starts_with("wss://")) {
        errors.push(format!(
            "directory.url = {} must start with ws:// or wss://",
            dir.url
        ));
    }
    validate_range(errors, "directory.connect_timeout_secs", dir.connect_timeout_secs, 1, 120);
    validate_range(
        errors,
        "directory.heartbeat_interval_secs",
        dir.heartbeat_interval_secs,
        5,
        300,
    );
    validate_range(errors, "directory.reconnect_delay_secs", dir.reconnect_delay_secs, 1, 60);
    validate_range(
        errors,
        "directory.max_reconnect_delay_secs",
        dir.max_reconnect_delay_secs,
        dir.reconnect_delay_secs,
        600,
    );
}
