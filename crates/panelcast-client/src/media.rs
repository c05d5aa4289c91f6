//! Outgoing media policy applied once when a capture session is created.

use panelcast_common::{StreamPriority, VideoCodec};
use panelcast_config::MediaConfig;

/// Every codec a session can negotiate, in no particular preference.
pub const SUPPORTED_CODECS: [VideoCodec; 4] = [
    VideoCodec::H264,
    VideoCodec::VP8,
    VideoCodec::VP9,
    VideoCodec::AV1,
];

/// Codec preference, bitrate and scheduling priority for one panel stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPolicy {
    pub codec_preferences: Vec<VideoCodec>,
    pub target_bitrate_kbps: u32,
    pub max_bitrate_kbps: u32,
    pub max_framerate: u32,
    pub priority: StreamPriority,
}

impl Default for MediaPolicy {
    fn default() -> Self {
        Self::from(&MediaConfig::default())
    }
}

impl From<&MediaConfig> for MediaPolicy {
    fn from(config: &MediaConfig) -> Self {
        Self {
            codec_preferences: config.codec_preferences.clone(),
            target_bitrate_kbps: config.target_bitrate_kbps,
            max_bitrate_kbps: config.max_bitrate_kbps,
            max_framerate: config.max_framerate,
            priority: config.priority,
        }
    }
}

impl MediaPolicy {
    /// Order `available` by preference. Preferred codecs come first in the
    /// configured order; anything not listed follows in its original order.
    pub fn ordered_codecs(&self, available: &[VideoCodec]) -> Vec<VideoCodec> {
        let mut ordered: Vec<VideoCodec> = self
            .codec_preferences
            .iter()
            .copied()
            .filter(|c| available.contains(c))
            .collect();
        for codec in available {
            if !ordered.contains(codec) {
                ordered.push(*codec);
            }
        }
        ordered
    }
}
