//! Shared event loop for capture and viewer endpoints.
//!
//! One task per endpoint drains directory events, transport events and
//! caller commands, so every session mutation happens in one place. Role
//! specific behaviour plugs in through [`RoleHandler`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use panelcast_common::protocol::Blob;
use panelcast_common::{CatalogueSnapshot, ClientMessage, PeerId, PeerInfo, TransportError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::directory::{DirectoryClient, DirectoryEvent, Signal};
use crate::media::MediaPolicy;
use crate::session::{
    CandidateRoute, CloseReason, Session, SessionInfo, SessionKey, SessionState, SessionTable,
};
use crate::transport::{
    ConnectionState, PeerConnection, PeerTransport, TransportEvent, TransportEventKind,
    TransportEventSink,
};


// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Events surfaced to the owner of an endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointEvent {
    /// Registered with the broker under `peer_id`.
    Connected { peer_id: PeerId },
    /// Broker connection lost; every session has been closed.
    Disconnected,
    PeerJoined(PeerInfo),
    PeerUpdated(PeerInfo),
    PeerLeft { peer_id: PeerId },
    Catalogue(CatalogueSnapshot),
    SessionState { key: SessionKey, state: SessionState },
    SessionClosed { key: SessionKey, reason: CloseReason },
    Error(String),
}

// ---------------------------------------------------------------------------
// Core
// ---------------------------------------------------------------------------

/// State every endpoint carries regardless of role.
pub(crate) struct EndpointCore {
    pub(crate) directory: DirectoryClient,
    pub(crate) transport: Arc<dyn PeerTransport>,
    pub(crate) sessions: SessionTable,
    pub(crate) transport_tx: TransportEventSink,
    pub(crate) events: mpsc::UnboundedSender<EndpointEvent>,
    pub(crate) policy: MediaPolicy,
}

impl EndpointCore {
    pub(crate) fn emit(&self, event: EndpointEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn emit_closed(&self, closed: Vec<SessionInfo>, reason: &CloseReason) {
        if reason.is_silent() {
            return;
        }
        for info in closed {
            self.emit(EndpointEvent::SessionClosed {
                key: info.key,
                reason: reason.clone(),
            });
        }
    }

    pub(crate) async fn send(&self, msg: ClientMessage) {
        self.directory.send(msg).await;
    }

    /// Allocate a generation and open a connection for `key`.
    pub(crate) async fn open_connection(
        &mut self,
        key: &SessionKey,
    ) -> Result<(u64, Box<dyn PeerConnection>), TransportError> {
        let generation = self.sessions.allocate_generation();
        let connection = self
            .transport
            .open(key.clone(), generation, self.transport_tx.clone())
            .await?;
        Ok((generation, connection))
    }

    /// Store `session`, replacing whatever held its key.
    pub(crate) async fn open_session(&mut self, session: Session) {
        let key = session.key.clone();
        if let Some(replaced) = self.sessions.open(session).await {
            debug!(session = %key, generation = replaced.generation, "Superseded existing session");
            self.emit_closed(vec![replaced], &CloseReason::Superseded);
        }
    }

    pub(crate) fn set_state(&mut self, key: &SessionKey, state: SessionState) {
        if self.sessions.set_state(key, state) {
            debug!(session = %key, state = %state, "Session state changed");
            self.emit(EndpointEvent::SessionState {
                key: key.clone(),
                state,
            });
        }
    }

    pub(crate) async fn close_session(&mut self, key: &SessionKey, reason: CloseReason) {
        if let Some(info) = self.sessions.close(key, reason.clone()).await {
            info!(session = %key, reason = %reason, "Session closed");
            self.emit_closed(vec![info], &reason);
        }
    }

    /// Close one session after a negotiation failure.
    pub(crate) async fn fail_session(&mut self, key: &SessionKey, error: impl fmt::Display) {
        warn!(session = %key, error = %error, "Negotiation failed");
        self.close_session(key, CloseReason::Failed(error.to_string()))
            .await;
    }

    async fn handle_candidate(
        &mut self,
        from: PeerId,
        panel_id: String,
        candidate: Blob,
        negotiation_id: Option<u64>,
    ) {
        let key = SessionKey::new(from, panel_id);
        match self.sessions.route_candidate(&key, negotiation_id) {
            CandidateRoute::Apply => {
                if let Some(session) = self.sessions.get_mut(&key) {
                    if let Err(e) = session.add_remote_candidate(candidate).await {
                        warn!(session = %key, error = %e, "Failed to apply remote candidate");
                    }
                }
            }
            CandidateRoute::Buffer => {
                debug!(session = %key, "Buffering early candidate");
                self.sessions.buffer_early(key, candidate, negotiation_id);
            }
            CandidateRoute::Stale => {
                debug!(session = %key, ?negotiation_id, "Dropping stale candidate");
            }
        }
    }

    /// Apply connection callbacks. Control channel data is handed back for
    /// the role to interpret.
    async fn handle_transport(
        &mut self,
        event: TransportEvent,
    ) -> Option<(SessionKey, String, Vec<u8>)> {
        if !self.sessions.is_current(&event.key, event.generation) {
            debug!(
                session = %event.key,
                generation = event.generation,
                "Ignoring event from replaced connection"
            );
            return None;
        }
        let key = event.key;

        match event.kind {
            TransportEventKind::LocalCandidate(candidate) => {
                let negotiation_id = self.sessions.get(&key).and_then(|s| s.negotiation_id);
                self.send(ClientMessage::IceCandidate {
                    target_id: key.remote,
                    panel_id: key.panel_id.clone(),
                    candidate,
                    negotiation_id,
                })
                .await;
            }
            TransportEventKind::StateChanged(state) => match state {
                ConnectionState::Connected => self.set_state(&key, SessionState::Active),
                ConnectionState::Failed => {
                    self.close_session(&key, CloseReason::TransportFailed).await
                }
                ConnectionState::Closed => {
                    self.close_session(&key, CloseReason::TransportClosed).await
                }
                ConnectionState::Disconnected => {
                    info!(session = %key, "Remote side went away, waiting for signaling");
                }
                other => debug!(session = %key, state = %other, "Connection state"),
            },
            TransportEventKind::ControlOpened { label } => {
                debug!(session = %key, label = %label, "Control channel open");
            }
            TransportEventKind::ControlMessage { label, data } => {
                return Some((key, label, data));
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Role Hooks
// ---------------------------------------------------------------------------

#[async_trait]
pub(crate) trait RoleHandler: Send {
    type Command: Send;

    /// Welcomed by the broker, with the directory as it stands.
    async fn on_connected(&mut self, core: &mut EndpointCore, peers: &[PeerInfo]);

    /// A peer-addressed message other than an ICE candidate.
    async fn on_signal(&mut self, core: &mut EndpointCore, from: PeerId, signal: Signal);

    async fn on_command(&mut self, core: &mut EndpointCore, command: Self::Command);

    /// Called after the peer's sessions have been closed.
    async fn on_peer_left(&mut self, _core: &mut EndpointCore, _peer_id: PeerId) {}

    /// A peer registered or changed its role or panel set.
    async fn on_peer_joined(&mut self, _core: &mut EndpointCore, _peer: &PeerInfo) {}

    /// Called after the broker connection dropped and every session closed.
    async fn on_disconnected(&mut self, _core: &mut EndpointCore) {}

    async fn on_catalogue(&mut self, _core: &mut EndpointCore, _snapshot: &CatalogueSnapshot) {}

    async fn on_control(
        &mut self,
        _core: &mut EndpointCore,
        key: SessionKey,
        label: String,
        _data: Vec<u8>,
    ) {
        debug!(session = %key, label = %label, "Ignoring control message");
    }
}

// ---------------------------------------------------------------------------
// Event Loop
// ---------------------------------------------------------------------------

pub(crate) struct EndpointChannels<C> {
    pub(crate) directory: mpsc::Receiver<DirectoryEvent>,
    pub(crate) transport: mpsc::UnboundedReceiver<TransportEvent>,
    pub(crate) commands: mpsc::UnboundedReceiver<C>,
}

pub(crate) async fn run_endpoint<H: RoleHandler>(
    mut core: EndpointCore,
    mut handler: H,
    mut channels: EndpointChannels<H::Command>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = channels.directory.recv() => match event {
                Some(event) => dispatch_directory(&mut core, &mut handler, event).await,
                None => break,
            },
            Some(event) = channels.transport.recv() => {
                if let Some((key, label, data)) = core.handle_transport(event).await {
                    handler.on_control(&mut core, key, label, data).await;
                }
            }
            command = channels.commands.recv() => match command {
                Some(command) => handler.on_command(&mut core, command).await,
                None => break,
            },
        }
    }

    let closed = core.sessions.close_all(CloseReason::Shutdown).await;
    core.emit_closed(closed, &CloseReason::Shutdown);
    core.directory.disconnect().await;
    info!("Endpoint stopped");
}

async fn dispatch_directory<H: RoleHandler>(
    core: &mut EndpointCore,
    handler: &mut H,
    event: DirectoryEvent,
) {
    match event {
        DirectoryEvent::Connected { local_id, peers } => {
            info!(peer = %local_id, peers = peers.len(), "Endpoint registered");
            core.emit(EndpointEvent::Connected { peer_id: local_id });
            handler.on_connected(core, &peers).await;
        }
        DirectoryEvent::PeerJoined(info) => {
            handler.on_peer_joined(core, &info).await;
            core.emit(EndpointEvent::PeerJoined(info));
        }
        DirectoryEvent::PeerUpdated(info) => {
            handler.on_peer_joined(core, &info).await;
            core.emit(EndpointEvent::PeerUpdated(info));
        }
        DirectoryEvent::PeerLeft { peer_id } => {
            let closed = core.sessions.close_peer(peer_id, CloseReason::PeerLeft).await;
            if !closed.is_empty() {
                info!(peer = %peer_id, sessions = closed.len(), "Closed sessions for departed peer");
            }
            core.emit_closed(closed, &CloseReason::PeerLeft);
            handler.on_peer_left(core, peer_id).await;
            core.emit(EndpointEvent::PeerLeft { peer_id });
        }
        DirectoryEvent::Catalogue(snapshot) => {
            handler.on_catalogue(core, &snapshot).await;
            core.emit(EndpointEvent::Catalogue(snapshot));
        }
        DirectoryEvent::Signal { from_id, signal } => match signal {
            Signal::IceCandidate {
                panel_id,
                candidate,
                negotiation_id,
            } => {
                core.handle_candidate(from_id, panel_id, candidate, negotiation_id)
                    .await
            }
            other => {
                debug!(from = %from_id, kind = other.kind(), "Signal");
                handler.on_signal(core, from_id, other).await
            }
        },
        DirectoryEvent::Disconnected => {
            let closed = core.sessions.close_all(CloseReason::BrokerLost).await;
            if !closed.is_empty() {
                warn!(sessions = closed.len(), "Broker lost, sessions closed");
            }
            core.emit_closed(closed, &CloseReason::BrokerLost);
            handler.on_disconnected(core).await;
            core.emit(EndpointEvent::Disconnected);
        }
        DirectoryEvent::Error(message) => {
            warn!(error = %message, "Directory error");
            core.emit(EndpointEvent::Error(message));
        }
    }
}
