//! Event, command and signal enums for the directory client.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::stream::SplitSink;
use panelcast_common::protocol::Blob;
use panelcast_common::{CatalogueSnapshot, ClientMessage, PeerId, PeerInfo, Role, ServerMessage};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// A message another peer addressed to us (or to our role) through the
/// broker. The sender is carried alongside as `from_id`.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Offer {
        panel_id: String,
        sdp: Blob,
        negotiation_id: Option<u64>,
    },
    Answer {
        panel_id: String,
        sdp: Blob,
        negotiation_id: Option<u64>,
    },
    IceCandidate {
        panel_id: String,
        candidate: Blob,
        negotiation_id: Option<u64>,
    },
    PanelRequest {
        panel_id: String,
    },
    CaptureWindow {
        source_id: String,
        panel_id: String,
        orientation: Option<Blob>,
    },
    ReleasePanel {
        panel_id: String,
    },
    RequestWindowList,
}

impl Signal {
    pub fn kind(&self) -> &'static str {
        match self {
            Signal::Offer { .. } => "offer",
            Signal::Answer { .. } => "answer",
            Signal::IceCandidate { .. } => "ice-candidate",
            Signal::PanelRequest { .. } => "panel-request",
            Signal::CaptureWindow { .. } => "capture-window",
            Signal::ReleasePanel { .. } => "release-panel",
            Signal::RequestWindowList => "request-window-list",
        }
    }

    /// Split a peer-originated server message into sender and signal.
    /// Directory and catalogue messages are handed back unchanged.
    pub fn from_server(msg: ServerMessage) -> Result<(PeerId, Signal), ServerMessage> {
        match msg {
            ServerMessage::Offer {
                from_id,
                panel_id,
                sdp,
                negotiation_id,
            } => Ok((
                from_id,
                Signal::Offer {
                    panel_id,
                    sdp,
                    negotiation_id,
                },
            )),
            ServerMessage::Answer {
                from_id,
                panel_id,
                sdp,
                negotiation_id,
            } => Ok((
                from_id,
                Signal::Answer {
                    panel_id,
                    sdp,
                    negotiation_id,
                },
            )),
            ServerMessage::IceCandidate {
                from_id,
                panel_id,
                candidate,
                negotiation_id,
            } => Ok((
                from_id,
                Signal::IceCandidate {
                    panel_id,
                    candidate,
                    negotiation_id,
                },
            )),
            ServerMessage::PanelRequest { from_id, panel_id } => {
                Ok((from_id, Signal::PanelRequest { panel_id }))
            }
            ServerMessage::CaptureWindow {
                from_id,
                source_id,
                panel_id,
                orientation,
            } => Ok((
                from_id,
                Signal::CaptureWindow {
                    source_id,
                    panel_id,
                    orientation,
                },
            )),
            ServerMessage::ReleasePanel { from_id, panel_id } => {
                Ok((from_id, Signal::ReleasePanel { panel_id }))
            }
            ServerMessage::RequestWindowList { from_id } => Ok((from_id, Signal::RequestWindowList)),
            other => Err(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Events & Commands
// ---------------------------------------------------------------------------

/// Events emitted by the directory client.
#[derive(Debug, Clone, PartialEq)]
pub enum DirectoryEvent {
    /// Welcomed by the broker. `peers` is the full directory at that moment.
    Connected { local_id: PeerId, peers: Vec<PeerInfo> },
    PeerJoined(PeerInfo),
    /// A known peer re-registered with a new role or panel set.
    PeerUpdated(PeerInfo),
    PeerLeft { peer_id: PeerId },
    Catalogue(CatalogueSnapshot),
    Signal { from_id: PeerId, signal: Signal },
    /// Connection to the broker lost; a reconnect is scheduled.
    Disconnected,
    Error(String),
}

/// Commands sent from the client handle to the background tasks.
#[derive(Debug)]
pub enum DirectoryCommand {
    Send(ClientMessage),
    /// Replace the registered panel set and re-register.
    UpdatePanels(Vec<String>),
    Disconnect,
}

// ---------------------------------------------------------------------------
// Shared State
// ---------------------------------------------------------------------------

pub(crate) type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// What we register as; replayed on every (re)connect.
#[derive(Debug, Clone)]
pub(crate) struct Registration {
    pub(crate) role: Role,
    pub(crate) panel_ids: Vec<String>,
}

impl Registration {
    pub(crate) fn message(&self) -> ClientMessage {
        ClientMessage::Register {
            role: self.role,
            panel_ids: self.panel_ids.clone(),
        }
    }
}

/// State shared between the client handle and its background tasks.
#[derive(Clone)]
pub(crate) struct Shared {
    pub(crate) connected: Arc<RwLock<bool>>,
    pub(crate) local_id: Arc<RwLock<Option<PeerId>>>,
    pub(crate) peers: Arc<RwLock<BTreeMap<PeerId, PeerInfo>>>,
    pub(crate) registration: Arc<RwLock<Registration>>,
    pub(crate) writer: Arc<Mutex<Option<WsWriter>>>,
}

impl Shared {
    pub(crate) fn new(role: Role, panel_ids: Vec<String>) -> Self {
        Self {
            connected: Arc::new(RwLock::new(false)),
            local_id: Arc::new(RwLock::new(None)),
            peers: Arc::new(RwLock::new(BTreeMap::new())),
            registration: Arc::new(RwLock::new(Registration { role, panel_ids })),
            writer: Arc::new(Mutex::new(None)),
        }
    }

    /// Forget everything learned from the broker.
    pub(crate) async fn reset(&self) {
        *self.connected.write().await = false;
        *self.local_id.write().await = None;
        self.peers.write().await.clear();
    }
}
