//! Viewer endpoint: requests panels from capture peers, answers their
//! offers and forwards input over each panel's control channel.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use panelcast_common::protocol::Blob;
use panelcast_common::{
    CatalogueSnapshot, ClientMessage, PanelcastError, PeerId, PeerInfo, Role, TransportError,
};
use panelcast_config::{validation, PanelcastConfig};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::control::{channel_label, InputEvent};
use crate::directory::{DirectoryClient, Signal};
use crate::endpoint::{run_endpoint, EndpointChannels, EndpointCore, EndpointEvent, RoleHandler};
use crate::media::MediaPolicy;
use crate::providers::WindowInfo;
use crate::session::{CloseReason, Session, SessionInfo, SessionKey, SessionState, SessionTable};
use crate::transport::{PeerTransport, SessionDescription};

#[derive(Debug)]
pub enum ViewerCommand {
    CaptureWindow {
        capture: PeerId,
        source_id: String,
        panel_id: String,
    },
    RequestPanel {
        panel_id: String,
    },
    Release {
        capture: PeerId,
        panel_id: String,
    },
    RequestCatalogue,
    SendInput {
        key: SessionKey,
        event: InputEvent,
        reply: oneshot::Sender<Result<(), PanelcastError>>,
    },
    Sessions(oneshot::Sender<Vec<SessionInfo>>),
    Catalogues(oneshot::Sender<BTreeMap<PeerId, Vec<WindowInfo>>>),
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to a running viewer endpoint.
pub struct ViewerEndpoint {
    commands: mpsc::UnboundedSender<ViewerCommand>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ViewerEndpoint {
    /// Connect to the broker as a viewer. Fails if `config` does not
    /// validate.
    pub fn start(
        config: &PanelcastConfig,
        transport: Arc<dyn PeerTransport>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<EndpointEvent>), PanelcastError> {
        validation::validate(config)?;
        let (directory, directory_rx) =
            DirectoryClient::connect(config.directory.clone(), Role::Viewer, Vec::new());
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let core = EndpointCore {
            directory,
            transport,
            sessions: SessionTable::new(config.session.early_candidate_limit as usize),
            transport_tx,
            events: event_tx,
            policy: MediaPolicy::from(&config.media),
        };
        let channels = EndpointChannels {
            directory: directory_rx,
            transport: transport_rx,
            commands: command_rx,
        };
        let task = tokio::spawn(run_endpoint(
            core,
            ViewerRole::default(),
            channels,
            shutdown.clone(),
        ));

        let endpoint = Self {
            commands: command_tx,
            shutdown,
            task,
        };
        Ok((endpoint, event_rx))
    }

    /// Ask `capture` to show `source_id` as `panel_id`.
    pub fn capture_window(
        &self,
        capture: PeerId,
        source_id: impl Into<String>,
        panel_id: impl Into<String>,
    ) {
        let _ = self.commands.send(ViewerCommand::CaptureWindow {
            capture,
            source_id: source_id.into(),
            panel_id: panel_id.into(),
        });
    }

    /// Ask every capture peer for an existing panel.
    pub fn request_panel(&self, panel_id: impl Into<String>) {
        let _ = self.commands.send(ViewerCommand::RequestPanel {
            panel_id: panel_id.into(),
        });
    }

    pub fn release(&self, capture: PeerId, panel_id: impl Into<String>) {
        let _ = self.commands.send(ViewerCommand::Release {
            capture,
            panel_id: panel_id.into(),
        });
    }

    pub fn request_catalogue(&self) {
        let _ = self.commands.send(ViewerCommand::RequestCatalogue);
    }

    /// Send pointer input to an active panel.
    pub async fn send_input(&self, key: SessionKey, event: InputEvent) -> Result<(), PanelcastError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(ViewerCommand::SendInput { key, event, reply })
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }

    pub async fn sessions(&self) -> Result<Vec<SessionInfo>, PanelcastError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(ViewerCommand::Sessions(tx))
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    /// Latest window catalogue from each capture peer.
    pub async fn catalogues(&self) -> Result<BTreeMap<PeerId, Vec<WindowInfo>>, PanelcastError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(ViewerCommand::Catalogues(tx))
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    /// Close every session, leave the broker and wait for the task to end.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.task.await;
    }
}

fn stopped() -> PanelcastError {
    PanelcastError::Other("viewer endpoint stopped".into())
}

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// What the user asked for, kept so it can be asked for again after a
/// reconnect or once an owning capture peer shows up.
#[derive(Default)]
struct ViewerRole {
    /// Windows requested from a specific capture peer, by session key, with
    /// the source each one shows.
    wanted: BTreeMap<SessionKey, String>,
    /// Panels requested from whichever capture peer owns them.
    requested: BTreeSet<String>,
    catalogues: BTreeMap<PeerId, Vec<WindowInfo>>,
}

impl ViewerRole {
    /// Open a session that waits for the capture peer's offer, replacing any
    /// current one for the key.
    async fn await_offer(&mut self, core: &mut EndpointCore, key: SessionKey) {
        match core.open_connection(&key).await {
            Ok((generation, connection)) => {
                core.open_session(Session::answerer(key.clone(), generation, connection))
                    .await;
                core.emit(EndpointEvent::SessionState {
                    key,
                    state: SessionState::AwaitingOffer,
                });
            }
            Err(e) => {
                warn!(session = %key, error = %e, "Failed to open connection");
                core.emit(EndpointEvent::Error(format!("{key}: {e}")));
            }
        }
    }

    async fn request_capture(
        &mut self,
        core: &mut EndpointCore,
        capture: PeerId,
        source_id: String,
        panel_id: String,
    ) {
        self.await_offer(core, SessionKey::new(capture, panel_id.clone()))
            .await;
        core.send(ClientMessage::CaptureWindow {
            target_id: capture,
            source_id,
            panel_id,
            orientation: None,
        })
        .await;
    }

    async fn answer_offer(
        &mut self,
        core: &mut EndpointCore,
        from: PeerId,
        panel_id: String,
        sdp: Blob,
        negotiation_id: Option<u64>,
    ) {
        let key = SessionKey::new(from, panel_id.clone());

        let reuse = match core.sessions.get(&key) {
            Some(session) if session.state == SessionState::AwaitingOffer => true,
            Some(session) => {
                if let (Some(theirs), Some(ours)) = (negotiation_id, session.negotiation_id) {
                    if theirs < ours {
                        debug!(session = %key, theirs, ours, "Dropping stale offer");
                        return;
                    }
                }
                false
            }
            None => false,
        };
        if !reuse {
            match core.open_connection(&key).await {
                Ok((generation, connection)) => {
                    core.open_session(Session::answerer(key.clone(), generation, connection))
                        .await;
                }
                Err(e) => {
                    warn!(session = %key, error = %e, "Failed to open connection");
                    core.emit(EndpointEvent::Error(format!("{key}: {e}")));
                    return;
                }
            }
        }
        let early = core.sessions.take_early(&key, negotiation_id);
        let result = match core.sessions.get_mut(&key) {
            Some(session) => {
                session.negotiation_id = negotiation_id;
                accept_offer(session, &sdp, early).await
            }
            None => Err(TransportError::Closed.into()),
        };

        match result {
            Ok(answer) => {
                core.set_state(&key, SessionState::Negotiating);
                core.send(ClientMessage::Answer {
                    target_id: from,
                    panel_id,
                    sdp: answer.to_blob(),
                    negotiation_id,
                })
                .await;
            }
            Err(e) => core.fail_session(&key, e).await,
        }
    }
}

/// Write one input event to the panel's control channel. The session must
/// be active.
async fn send_input(
    core: &EndpointCore,
    key: &SessionKey,
    event: &InputEvent,
) -> Result<(), PanelcastError> {
    let session = core
        .sessions
        .get(key)
        .ok_or_else(|| TransportError::InvalidState(format!("no session {key}")))?;
    if session.state != SessionState::Active {
        return Err(TransportError::InvalidState(format!(
            "session {key} is {}",
            session.state
        ))
        .into());
    }
    let data = event.encode()?;
    session
        .connection()
        .send_control(&channel_label(&key.panel_id), data)
        .await?;
    Ok(())
}

/// Apply a remote offer plus any candidates that arrived ahead of it, then
/// build the answer.
async fn accept_offer(
    session: &mut Session,
    sdp: &Blob,
    early: Vec<Blob>,
) -> Result<SessionDescription, PanelcastError> {
    let desc = SessionDescription::from_blob(sdp)?;
    session.apply_remote_description(desc).await?;
    for candidate in early {
        if let Err(e) = session.add_remote_candidate(candidate).await {
            warn!(session = %session.key, error = %e, "Dropping early candidate");
        }
    }
    Ok(session.connection().create_answer().await?)
}

#[async_trait]
impl RoleHandler for ViewerRole {
    type Command = ViewerCommand;

    async fn on_connected(&mut self, core: &mut EndpointCore, peers: &[PeerInfo]) {
        let wanted = std::mem::take(&mut self.wanted);
        for (key, source_id) in wanted {
            let present = peers
                .iter()
                .any(|p| p.peer_id == key.remote && p.role == Role::Capture);
            if present {
                info!(session = %key, "Re-requesting capture");
                self.wanted.insert(key.clone(), source_id.clone());
                self.request_capture(core, key.remote, source_id, key.panel_id)
                    .await;
            } else {
                self.requested.insert(key.panel_id);
            }
        }
        for panel_id in self.requested.clone() {
            info!(panel = %panel_id, "Re-requesting panel");
            core.send(ClientMessage::PanelRequest { panel_id }).await;
        }
    }

    async fn on_peer_joined(&mut self, core: &mut EndpointCore, peer: &PeerInfo) {
        if peer.role != Role::Capture {
            return;
        }
        let windows: Vec<(SessionKey, String)> = self
            .wanted
            .iter()
            .filter(|(key, _)| key.remote == peer.peer_id && !core.sessions.contains(key))
            .map(|(key, source)| (key.clone(), source.clone()))
            .collect();
        for (key, source_id) in windows {
            info!(session = %key, "Capture peer registered, requesting capture");
            self.request_capture(core, key.remote, source_id, key.panel_id)
                .await;
        }

        let panels: Vec<String> = peer
            .panel_ids
            .iter()
            .filter(|p| self.requested.contains(*p) && !core.sessions.panel_in_use(p))
            .cloned()
            .collect();
        for panel_id in panels {
            info!(panel = %panel_id, capture = %peer.peer_id, "Owner registered, requesting panel");
            core.send(ClientMessage::PanelRequest { panel_id }).await;
        }
    }

    async fn on_signal(&mut self, core: &mut EndpointCore, from: PeerId, signal: Signal) {
        match signal {
            Signal::Offer {
                panel_id,
                sdp,
                negotiation_id,
            } => {
                self.answer_offer(core, from, panel_id, sdp, negotiation_id)
                    .await
            }
            other => debug!(from = %from, kind = other.kind(), "Ignoring signal"),
        }
    }

    async fn on_command(&mut self, core: &mut EndpointCore, command: ViewerCommand) {
        match command {
            ViewerCommand::CaptureWindow {
                capture,
                source_id,
                panel_id,
            } => {
                self.wanted.insert(
                    SessionKey::new(capture, panel_id.clone()),
                    source_id.clone(),
                );
                self.request_capture(core, capture, source_id, panel_id)
                    .await;
            }
            ViewerCommand::RequestPanel { panel_id } => {
                self.requested.insert(panel_id.clone());
                core.send(ClientMessage::PanelRequest { panel_id }).await;
            }
            ViewerCommand::Release { capture, panel_id } => {
                let key = SessionKey::new(capture, panel_id.clone());
                self.wanted.remove(&key);
                self.requested.remove(&panel_id);
                core.close_session(&key, CloseReason::Released).await;
                core.send(ClientMessage::ReleasePanel {
                    target_id: capture,
                    panel_id,
                })
                .await;
            }
            ViewerCommand::RequestCatalogue => {
                core.send(ClientMessage::RequestWindowList).await;
            }
            ViewerCommand::SendInput { key, event, reply } => {
                let _ = reply.send(send_input(core, &key, &event).await);
            }
            ViewerCommand::Sessions(reply) => {
                let _ = reply.send(core.sessions.snapshot());
            }
            ViewerCommand::Catalogues(reply) => {
                let _ = reply.send(self.catalogues.clone());
            }
        }
    }

    /// Windows wanted from a departed capture peer fall back to a request
    /// for the panel from whoever owns it next.
    async fn on_peer_left(&mut self, _core: &mut EndpointCore, peer_id: PeerId) {
        self.catalogues.remove(&peer_id);
        let orphaned: Vec<SessionKey> = self
            .wanted
            .keys()
            .filter(|key| key.remote == peer_id)
            .cloned()
            .collect();
        for key in orphaned {
            self.wanted.remove(&key);
            self.requested.insert(key.panel_id);
        }
    }

    async fn on_catalogue(&mut self, _core: &mut EndpointCore, snapshot: &CatalogueSnapshot) {
        let windows: Vec<WindowInfo> = snapshot
            .windows
            .iter()
            .filter_map(WindowInfo::from_blob)
            .collect();
        debug!(capture = %snapshot.from_id, windows = windows.len(), "Catalogue updated");
        self.catalogues.insert(snapshot.from_id, windows);
    }
}
