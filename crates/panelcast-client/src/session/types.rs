//! Session keys, states and close reasons.

use std::fmt;

use panelcast_common::PeerId;
use serde::Serialize;

/// Identifies one negotiation from the local endpoint's point of view:
/// the remote peer and the panel being carried. Displayed as
/// `remote:panel`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKey {
    pub remote: PeerId,
    pub panel_id: String,
}

impl SessionKey {
    pub fn new(remote: PeerId, panel_id: impl Into<String>) -> Self {
        Self {
            remote,
            panel_id: panel_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.remote, self.panel_id)
    }
}

/// Lifecycle of a panel session. A key with no record is idle; `Closed` is
/// only ever reported, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    /// Capture side: connection opened, offer being built.
    Offering,
    /// Viewer side: capture requested, waiting for the offer.
    AwaitingOffer,
    /// Descriptions exchanged or in flight.
    Negotiating,
    /// The connection reported a usable path.
    Active,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Offering => write!(f, "offering"),
            SessionState::AwaitingOffer => write!(f, "awaiting-offer"),
            SessionState::Negotiating => write!(f, "negotiating"),
            SessionState::Active => write!(f, "active"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Capture peers always offer; viewers always answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NegotiationRole {
    Offerer,
    Answerer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Released by the viewer or the local user.
    Released,
    /// The remote peer left the directory.
    PeerLeft,
    /// Replaced by a newer negotiation for the same key.
    Superseded,
    /// The panel was rebound to a different source.
    PanelReplaced,
    /// Negotiation failed.
    Failed(String),
    TransportFailed,
    TransportClosed,
    /// The broker connection dropped.
    BrokerLost,
    Shutdown,
}

impl CloseReason {
    /// Silent closes are not surfaced as events.
    pub fn is_silent(&self) -> bool {
        matches!(self, CloseReason::Superseded)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Released => write!(f, "released"),
            CloseReason::PeerLeft => write!(f, "peer-left"),
            CloseReason::Superseded => write!(f, "superseded"),
            CloseReason::PanelReplaced => write!(f, "panel-replaced"),
            CloseReason::Failed(msg) => write!(f, "failed: {msg}"),
            CloseReason::TransportFailed => write!(f, "transport-failed"),
            CloseReason::TransportClosed => write!(f, "transport-closed"),
            CloseReason::BrokerLost => write!(f, "broker-lost"),
            CloseReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Point-in-time view of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub key: SessionKey,
    pub state: SessionState,
    pub role: NegotiationRole,
    pub generation: u64,
    pub negotiation_id: Option<u64>,
    pub source_id: Option<String>,
}
