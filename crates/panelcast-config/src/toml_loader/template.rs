//! Default TOML config template with inline documentation comments.

/// Generate the default TOML config content with comments.
pub(crate) fn default_config_toml() -> String {
    r##"# panelcast configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[broker]
# bind = "0.0.0.0"
# port = 8080

[broker.tls]
# Serve wss:// when both files exist; plaintext otherwise.
# cert_path = "/etc/panelcast/cert.pem"
# key_path = "/etc/panelcast/key.pem"

[directory]
# url = "ws://127.0.0.1:8080"
# connect_timeout_secs = 15       # 1-120
# heartbeat_interval_secs = 25    # 5-300
# reconnect_delay_secs = 1        # 1-60
# max_reconnect_delay_secs = 30   # >= reconnect_delay_secs, <= 600

[media]
# codec_preferences = ["h264", "vp8", "vp9", "av1"]
# target_bitrate_kbps = 8000      # 250-100000
# max_bitrate_kbps = 20000        # >= target_bitrate_kbps
# max_framerate = 60              # 1-144
# priority = "high"               # very-low, low, medium, high

[session]
# early_candidate_limit = 32      # 0-1024

[capture]
# [[capture.default_panels]]
# panel_id = "desktop"
# source_id = "screen:0"

[logging]
# level = "info"                  # trace, debug, info, warn, error
"##
    .to_string()
}
