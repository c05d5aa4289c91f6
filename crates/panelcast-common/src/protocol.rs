//! Signaling wire protocol.
//!
//! Every frame is a JSON text message with a `type` discriminator. Peers send
//! [`ClientMessage`]s; the broker sends [`ServerMessage`]s. Directed messages
//! carry `targetId` on the way in and leave the broker with `fromId` instead.
//! Negotiation payloads (`sdp`, `candidate`) and catalogue entries are opaque
//! JSON blobs the broker never looks inside.

use serde::{Deserialize, Serialize};

use crate::id::PeerId;

/// Opaque JSON payload routed without inspection.
pub type Blob = serde_json::Value;

// ---------------------------------------------------------------------------
// Shared types
// ---------------------------------------------------------------------------

/// Declared role of a registered peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Owns and publishes panels; always the offerer.
    Capture,
    /// Consumes panels; always the answerer.
    Viewer,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Capture => write!(f, "capture"),
            Role::Viewer => write!(f, "viewer"),
        }
    }
}

/// Directory entry for a registered peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub peer_id: PeerId,
    pub role: Role,
    #[serde(default)]
    pub panel_ids: Vec<String>,
}

/// Most recent window catalogue published by a capture peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogueSnapshot {
    pub from_id: PeerId,
    pub windows: Vec<Blob>,
}

// ---------------------------------------------------------------------------
// Peer -> broker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Register {
        role: Role,
        #[serde(default)]
        panel_ids: Vec<String>,
    },
    Offer {
        target_id: PeerId,
        panel_id: String,
        sdp: Blob,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        negotiation_id: Option<u64>,
    },
    Answer {
        target_id: PeerId,
        panel_id: String,
        sdp: Blob,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        negotiation_id: Option<u64>,
    },
    IceCandidate {
        target_id: PeerId,
        panel_id: String,
        candidate: Blob,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        negotiation_id: Option<u64>,
    },
    PanelRequest {
        panel_id: String,
    },
    CaptureWindow {
        target_id: PeerId,
        source_id: String,
        panel_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        orientation: Option<Blob>,
    },
    ReleasePanel {
        target_id: PeerId,
        panel_id: String,
    },
    #[serde(alias = "catalogue-update")]
    WindowList {
        #[serde(default)]
        windows: Vec<Blob>,
    },
    #[serde(alias = "catalogue-request")]
    RequestWindowList,
}

impl ClientMessage {
    /// Wire name of the message kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::PanelRequest { .. } => "panel-request",
            Self::CaptureWindow { .. } => "capture-window",
            Self::ReleasePanel { .. } => "release-panel",
            Self::WindowList { .. } => "window-list",
            Self::RequestWindowList => "request-window-list",
        }
    }

    /// Converts a directed message into the `(target, forwarded)` pair the
    /// broker delivers, with `from` attached as `fromId`.
    ///
    /// Returns `Err(self)` for registration and broadcast kinds.
    pub fn into_directed(self, from: PeerId) -> Result<(PeerId, ServerMessage), Self> {
        match self {
            Self::Offer {
                target_id,
                panel_id,
                sdp,
                negotiation_id,
            } => Ok((
                target_id,
                ServerMessage::Offer {
                    from_id: from,
                    panel_id,
                    sdp,
                    negotiation_id,
                },
            )),
            Self::Answer {
                target_id,
                panel_id,
                sdp,
                negotiation_id,
            } => Ok((
                target_id,
                ServerMessage::Answer {
                    from_id: from,
                    panel_id,
                    sdp,
                    negotiation_id,
                },
            )),
            Self::IceCandidate {
                target_id,
                panel_id,
                candidate,
                negotiation_id,
            } => Ok((
                target_id,
                ServerMessage::IceCandidate {
                    from_id: from,
                    panel_id,
                    candidate,
                    negotiation_id,
                },
            )),
            Self::CaptureWindow {
                target_id,
                source_id,
                panel_id,
                orientation,
            } => Ok((
                target_id,
                ServerMessage::CaptureWindow {
                    from_id: from,
                    source_id,
                    panel_id,
                    orientation,
                },
            )),
            Self::ReleasePanel {
                target_id,
                panel_id,
            } => Ok((
                target_id,
                ServerMessage::ReleasePanel {
                    from_id: from,
                    panel_id,
                },
            )),
            other => Err(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Broker -> peer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Welcome {
        peer_id: PeerId,
        peers: Vec<PeerInfo>,
        catalogue_snapshot: Option<CatalogueSnapshot>,
    },
    PeerRegistered {
        peer_id: PeerId,
        role: Role,
        panel_ids: Vec<String>,
    },
    PeerDisconnected {
        peer_id: PeerId,
    },
    Offer {
        from_id: PeerId,
        panel_id: String,
        sdp: Blob,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        negotiation_id: Option<u64>,
    },
    Answer {
        from_id: PeerId,
        panel_id: String,
        sdp: Blob,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        negotiation_id: Option<u64>,
    },
    IceCandidate {
        from_id: PeerId,
        panel_id: String,
        candidate: Blob,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        negotiation_id: Option<u64>,
    },
    PanelRequest {
        from_id: PeerId,
        panel_id: String,
    },
    CaptureWindow {
        from_id: PeerId,
        source_id: String,
        panel_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        orientation: Option<Blob>,
    },
    ReleasePanel {
        from_id: PeerId,
        panel_id: String,
    },
    #[serde(alias = "catalogue-update")]
    WindowList {
        from_id: PeerId,
        windows: Vec<Blob>,
    },
    #[serde(alias = "catalogue-request")]
    RequestWindowList {
        from_id: PeerId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn register_parses_wire_shape() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"register","role":"capture","panelIds":["a","b"]}"#)
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Register {
                role: Role::Capture,
                panel_ids: vec!["a".into(), "b".into()],
            }
        );
    }

    #[test]
    fn register_without_panels_defaults_to_empty() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"register","role":"viewer"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Register { ref panel_ids, .. } if panel_ids.is_empty()));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"type":"shout","text":"hi"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn server_only_types_are_not_client_messages() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"type":"peer-disconnected","peerId":3}"#);
        assert!(result.is_err());
    }

    #[test]
    fn catalogue_aliases_are_accepted() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"catalogue-update","windows":[{"sourceId":"screen:0"}]}"#)
                .unwrap();
        assert!(matches!(msg, ClientMessage::WindowList { ref windows } if windows.len() == 1));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"catalogue-request"}"#).unwrap();
        assert_eq!(msg, ClientMessage::RequestWindowList);
    }

    #[test]
    fn welcome_serializes_null_snapshot() {
        let msg = ServerMessage::Welcome {
            peer_id: PeerId(4),
            peers: vec![PeerInfo {
                peer_id: PeerId(1),
                role: Role::Capture,
                panel_ids: vec!["panel-main".into()],
            }],
            catalogue_snapshot: None,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "welcome",
                "peerId": 4,
                "peers": [{"peerId": 1, "role": "capture", "panelIds": ["panel-main"]}],
                "catalogueSnapshot": null
            })
        );
    }

    #[test]
    fn negotiation_id_is_omitted_when_absent() {
        let msg = ServerMessage::IceCandidate {
            from_id: PeerId(2),
            panel_id: "p".into(),
            candidate: json!({"candidate": "host"}),
            negotiation_id: None,
        };
        let text = serde_json::to_string(&msg).unwrap();
        assert!(!text.contains("negotiationId"));
        assert!(text.contains(r#""type":"ice-candidate""#));
        assert!(text.contains(r#""fromId":2"#));
    }

    #[test]
    fn directed_offer_swaps_target_for_sender() {
        let msg = ClientMessage::Offer {
            target_id: PeerId(9),
            panel_id: "panel-main".into(),
            sdp: json!({"type": "offer", "sdp": "v=0"}),
            negotiation_id: Some(3),
        };
        let (target, forwarded) = msg.into_directed(PeerId(1)).unwrap();
        assert_eq!(target, PeerId(9));
        assert_eq!(
            forwarded,
            ServerMessage::Offer {
                from_id: PeerId(1),
                panel_id: "panel-main".into(),
                sdp: json!({"type": "offer", "sdp": "v=0"}),
                negotiation_id: Some(3),
            }
        );
    }

    #[test]
    fn directed_capture_window_keeps_orientation() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "capture-window",
            "targetId": 5,
            "sourceId": "screen:0",
            "panelId": "panel-main",
            "orientation": {"yaw": 90}
        }))
        .unwrap();
        let (target, forwarded) = msg.into_directed(PeerId(2)).unwrap();
        assert_eq!(target, PeerId(5));
        let value = serde_json::to_value(&forwarded).unwrap();
        assert_eq!(value["fromId"], json!(2));
        assert_eq!(value["orientation"], json!({"yaw": 90}));
        assert!(value.get("targetId").is_none());
    }

    #[test]
    fn broadcast_kinds_are_not_directed() {
        let msg = ClientMessage::PanelRequest {
            panel_id: "p".into(),
        };
        assert!(msg.into_directed(PeerId(1)).is_err());
        assert!(ClientMessage::RequestWindowList
            .into_directed(PeerId(1))
            .is_err());
    }

    #[test]
    fn kind_matches_wire_tag() {
        let msg = ClientMessage::ReleasePanel {
            target_id: PeerId(1),
            panel_id: "p".into(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], json!(msg.kind()));
    }

    #[test]
    fn role_display() {
        assert_eq!(Role::Capture.to_string(), "capture");
        assert_eq!(Role::Viewer.to_string(), "viewer");
    }
}
