use panelcast_common::{StreamPriority, VideoCodec};
use serde::{Deserialize, Serialize};

/// Outgoing media policy applied by the capture role when a panel session
/// is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Codecs in preference order. Text-heavy desktop content decodes most
    /// reliably on headsets with H.264, so it leads the default list.
    pub codec_preferences: Vec<VideoCodec>,
    pub target_bitrate_kbps: u32,
    pub max_bitrate_kbps: u32,
    pub max_framerate: u32,
    pub priority: StreamPriority,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            codec_preferences: vec![
                VideoCodec::H264,
                VideoCodec::VP8,
                VideoCodec::VP9,
                VideoCodec::AV1,
            ],
            target_bitrate_kbps: 8000,
            max_bitrate_kbps: 20000,
            max_framerate: 60,
            priority: StreamPriority::High,
        }
    }
}
