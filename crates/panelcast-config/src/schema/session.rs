//! Panel session and capture endpoint configuration types.

use serde::{Deserialize, Serialize};

/// Per-endpoint session table settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// ICE candidates kept per session key while no session exists yet.
    pub early_candidate_limit: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            early_candidate_limit: 32,
        }
    }
}

/// Capture endpoint settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Panels published as soon as the endpoint registers. These are never
    /// removed by a viewer's release.
    pub default_panels: Vec<DefaultPanel>,
}

/// An auto-published panel bound to a capture source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultPanel {
    pub panel_id: String,
    pub source_id: String,
}
