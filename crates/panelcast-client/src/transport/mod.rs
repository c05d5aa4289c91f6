//! Peer connection abstraction.
//!
//! A [`PeerTransport`] opens one [`PeerConnection`] per panel session. The
//! connection reports asynchronous happenings (gathered candidates, state
//! changes, control channel traffic) as [`TransportEvent`]s on a sink owned
//! by the endpoint, tagged with the session key and generation they were
//! opened for so late events from a replaced connection can be ignored.

mod memory;

pub use memory::{MemoryNetwork, MemoryTransport};

use async_trait::async_trait;
use panelcast_common::protocol::Blob;
use panelcast_common::TransportError;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::media::MediaPolicy;
use crate::providers::MediaStream;
use crate::session::SessionKey;

// ---------------------------------------------------------------------------
// Descriptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// A session description as carried in the `sdp` field of offer and answer
/// messages: `{"type": "offer", "sdp": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Decode the opaque `sdp` blob from a signaling message.
    pub fn from_blob(blob: &Blob) -> Result<Self, TransportError> {
        serde_json::from_value(blob.clone())
            .map_err(|e| TransportError::InvalidDescription(e.to_string()))
    }

    pub fn to_blob(&self) -> Blob {
        serde_json::json!({ "type": self.kind, "sdp": self.sdp })
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Connection-level state as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEventKind {
    /// A local candidate to send to the remote side.
    LocalCandidate(Blob),
    StateChanged(ConnectionState),
    ControlOpened { label: String },
    ControlMessage { label: String, data: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    pub key: SessionKey,
    pub generation: u64,
    pub kind: TransportEventKind,
}

/// Where a connection delivers its events.
pub type TransportEventSink = mpsc::UnboundedSender<TransportEvent>;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Factory for peer connections.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn open(
        &self,
        key: SessionKey,
        generation: u64,
        events: TransportEventSink,
    ) -> Result<Box<dyn PeerConnection>, TransportError>;
}

/// One negotiated media + control connection to a remote peer.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Attach outgoing media, applying codec order, bitrate and priority.
    async fn attach_media(
        &self,
        stream: &MediaStream,
        policy: &MediaPolicy,
    ) -> Result<(), TransportError>;

    /// Create an out-of-band control channel. Offerer only, before the offer.
    async fn create_control_channel(&self, label: &str) -> Result<(), TransportError>;

    /// Build an offer and apply it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    /// Build an answer to the applied remote offer and apply it locally.
    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_remote_description(&self, desc: SessionDescription)
        -> Result<(), TransportError>;

    async fn add_ice_candidate(&self, candidate: Blob) -> Result<(), TransportError>;

    async fn send_control(&self, label: &str, data: Vec<u8>) -> Result<(), TransportError>;

    /// Release all resources. Idempotent.
    async fn close(&self);
}
