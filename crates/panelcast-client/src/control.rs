//! Per-panel control channel: labels and the input event payload.

use serde::{Deserialize, Serialize};

const LABEL_PREFIX: &str = "input-";

/// Control channel label for a panel.
pub fn channel_label(panel_id: &str) -> String {
    format!("{LABEL_PREFIX}{panel_id}")
}

/// Panel id encoded in a control channel label, if it is one of ours.
pub fn panel_from_label(label: &str) -> Option<&str> {
    label.strip_prefix(LABEL_PREFIX).filter(|p| !p.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputKind {
    PointerMove,
    PointerDown,
    PointerUp,
    Wheel,
}

/// Pointer input in panel-normalized coordinates: `u` and `v` run from 0 at
/// the left/top edge to 1 at the right/bottom edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputEvent {
    #[serde(rename = "type")]
    pub kind: InputKind,
    pub u: f64,
    pub v: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_y: Option<f64>,
}

impl InputEvent {
    pub fn pointer(kind: InputKind, u: f64, v: f64) -> Self {
        Self {
            kind,
            u,
            v,
            button: None,
            delta_y: None,
        }
    }

    /// Parse a control channel payload, clamping coordinates into the panel.
    pub fn decode(data: &[u8]) -> Result<Self, serde_json::Error> {
        let mut event: Self = serde_json::from_slice(data)?;
        event.u = clamp_unit(event.u);
        event.v = clamp_unit(event.v);
        Ok(event)
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

fn clamp_unit(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}
