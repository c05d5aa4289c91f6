//! Media enums shared by configuration and the capture-side session policy.

use serde::{Deserialize, Serialize};

/// Video codec a capture session may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    VP8,
    VP9,
    AV1,
}

impl VideoCodec {
    /// RTP mime type as it appears in a session description.
    pub fn mime_type(self) -> &'static str {
        match self {
            VideoCodec::H264 => "video/H264",
            VideoCodec::VP8 => "video/VP8",
            VideoCodec::VP9 => "video/VP9",
            VideoCodec::AV1 => "video/AV1",
        }
    }

    /// Parse a mime type or a bare codec name, case-insensitively.
    pub fn from_mime(s: &str) -> Option<Self> {
        let name = s.rsplit('/').next().unwrap_or(s);
        match name.to_ascii_lowercase().as_str() {
            "h264" => Some(VideoCodec::H264),
            "vp8" => Some(VideoCodec::VP8),
            "vp9" => Some(VideoCodec::VP9),
            "av1" => Some(VideoCodec::AV1),
            _ => None,
        }
    }
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoCodec::H264 => write!(f, "H.264"),
            VideoCodec::VP8 => write!(f, "VP8"),
            VideoCodec::VP9 => write!(f, "VP9"),
            VideoCodec::AV1 => write!(f, "AV1"),
        }
    }
}

/// Sender scheduling priority for a panel's outgoing media.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamPriority {
    VeryLow,
    Low,
    Medium,
    #[default]
    High,
}

impl StreamPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamPriority::VeryLow => "very-low",
            StreamPriority::Low => "low",
            StreamPriority::Medium => "medium",
            StreamPriority::High => "high",
        }
    }
}
