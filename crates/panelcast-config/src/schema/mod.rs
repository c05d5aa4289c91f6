//! Configuration schema types for panelcast.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod broker;
mod directory;
mod media;
mod session;
mod system;

pub use broker::*;
pub use directory::*;
pub use media::*;
pub use session::*;
pub use system::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration. The broker reads `broker` and `logging`; endpoints
/// read `directory`, `media`, `session` and `capture`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelcastConfig {
    pub broker: BrokerConfig,
    pub directory: DirectoryConfig,
    pub media: MediaConfig,
    pub session: SessionConfig,
    pub capture: CaptureConfig,
    pub logging: LoggingConfig,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use panelcast_common::{StreamPriority, VideoCodec};

    #[test]
    fn default_broker_section() {
        let config = PanelcastConfig::default();
        assert_eq!(config.broker.bind, "0.0.0.0");
        assert_eq!(config.broker.port, 8080);
        assert!(config.broker.tls.cert_path.is_none());
        assert!(config.broker.tls.key_path.is_none());
    }

    #[test]
    fn default_directory_section() {
        let config = PanelcastConfig::default();
        assert_eq!(config.directory.url, "ws://127.0.0.1:8080");
        assert_eq!(config.directory.connect_timeout_secs, 15);
        assert_eq!(config.directory.heartbeat_interval_secs, 25);
        assert_eq!(config.directory.reconnect_delay_secs, 1);
        assert_eq!(config.directory.max_reconnect_delay_secs, 30);
    }

    #[test]
    fn default_media_prefers_h264_first() {
        let config = PanelcastConfig::default();
        assert_eq!(
            config.media.codec_preferences,
            vec![
                VideoCodec::H264,
                VideoCodec::VP8,
                VideoCodec::VP9,
                VideoCodec::AV1
            ]
        );
        assert_eq!(config.media.target_bitrate_kbps, 8000);
        assert_eq!(config.media.priority, StreamPriority::High);
    }

    #[test]
    fn default_capture_has_no_panels() {
        let config = PanelcastConfig::default();
        assert!(config.capture.default_panels.is_empty());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: PanelcastConfig = toml::from_str(
            r#"
[broker]
port = 9000

[media]
codec_preferences = ["vp9", "h264"]
"#,
        )
        .unwrap();
        assert_eq!(config.broker.port, 9000);
        assert_eq!(config.broker.bind, "0.0.0.0");
        assert_eq!(
            config.media.codec_preferences,
            vec![VideoCodec::VP9, VideoCodec::H264]
        );
        assert_eq!(config.media.max_bitrate_kbps, 20000);
    }

    #[test]
    fn default_panels_parse_from_array_of_tables() {
        let config: PanelcastConfig = toml::from_str(
            r#"
[[capture.default_panels]]
panel_id = "desktop"
source_id = "screen:0"

[[capture.default_panels]]
panel_id = "editor"
source_id = "window:42"
"#,
        )
        .unwrap();
        assert_eq!(config.capture.default_panels.len(), 2);
        assert_eq!(config.capture.default_panels[1].panel_id, "editor");
        assert_eq!(config.capture.default_panels[1].source_id, "window:42");
    }
}
