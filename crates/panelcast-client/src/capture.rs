//! Capture endpoint: publishes a window catalogue, owns panels and offers
//! a media session to every viewer that asks for one.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use panelcast_common::{ClientMessage, PanelcastError, PeerId, PeerInfo, Role, TransportError};
use panelcast_config::{validation, PanelcastConfig};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::control::{channel_label, panel_from_label, InputEvent};
use crate::directory::{DirectoryClient, Signal};
use crate::endpoint::{run_endpoint, EndpointChannels, EndpointCore, EndpointEvent, RoleHandler};
use crate::media::MediaPolicy;
use crate::providers::{CaptureProvider, InputInjector, WindowProvider};
use crate::session::{CloseReason, Session, SessionInfo, SessionKey, SessionState, SessionTable};
use crate::transport::{PeerTransport, SessionDescription};

/// Collaborators a capture endpoint drives.
#[derive(Clone)]
pub struct CaptureProviders {
    pub windows: Arc<dyn WindowProvider>,
    pub capture: Arc<dyn CaptureProvider>,
    pub input: Arc<dyn InputInjector>,
}

/// A panel this endpoint advertises and the source it shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelBinding {
    pub panel_id: String,
    pub source_id: String,
    /// Pinned panels survive release by every viewer.
    pub pinned: bool,
}

#[derive(Debug)]
pub enum CaptureCommand {
    PublishCatalogue,
    AddPanel { panel_id: String, source_id: String },
    RemovePanel { panel_id: String },
    Sessions(oneshot::Sender<Vec<SessionInfo>>),
    Panels(oneshot::Sender<Vec<PanelBinding>>),
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to a running capture endpoint.
pub struct CaptureEndpoint {
    commands: mpsc::UnboundedSender<CaptureCommand>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl CaptureEndpoint {
    /// Connect to the broker and start serving panels. Default panels from
    /// `config.capture` are registered immediately. Fails if `config` does
    /// not validate.
    pub fn start(
        config: &PanelcastConfig,
        transport: Arc<dyn PeerTransport>,
        providers: CaptureProviders,
    ) -> Result<(Self, mpsc::UnboundedReceiver<EndpointEvent>), PanelcastError> {
        validation::validate(config)?;
        let role = CaptureRole::new(providers, config);
        let (directory, directory_rx) =
            DirectoryClient::connect(config.directory.clone(), Role::Capture, role.panel_ids());
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
        let task = tokio::spawn(run_endpoint(core, role, channels, shutdown.clone()));

        let endpoint = Self {
            commands: command_tx,
            shutdown,
            task,
        };
        Ok((endpoint, event_rx))
    }

    /// Send the current window list to every viewer.
    pub fn publish_catalogue(&self) {
        let _ = self.commands.send(CaptureCommand::PublishCatalogue);
    }

    /// Advertise a pinned panel bound to `source_id`.
    pub fn add_panel(&self, panel_id: impl Into<String>, source_id: impl Into<String>) {
        let _ = self.commands.send(CaptureCommand::AddPanel {
            panel_id: panel_id.into(),
            source_id: source_id.into(),
        });
    }

    /// Stop advertising a panel and close its sessions.
    pub fn remove_panel(&self, panel_id: impl Into<String>) {
        let _ = self.commands.send(CaptureCommand::RemovePanel {
            panel_id: panel_id.into(),
        });
    }

    pub async fn sessions(&self) -> Result<Vec<SessionInfo>, PanelcastError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(CaptureCommand::Sessions(tx))
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    pub async fn panels(&self) -> Result<Vec<PanelBinding>, PanelcastError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(CaptureCommand::Panels(tx))
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
    PanelcastError::Other("capture endpoint stopped".into())
}

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

struct PanelEntry {
    source_id: String,
    pinned: bool,
}

struct CaptureRole {
    providers: CaptureProviders,
    panels: BTreeMap<String, PanelEntry>,
}

impl CaptureRole {
    fn new(providers: CaptureProviders, config: &PanelcastConfig) -> Self {
        let panels = config
            .capture
            .default_panels
            .iter()
            .map(|p| {
                (
                    p.panel_id.clone(),
                    PanelEntry {
                        source_id: p.source_id.clone(),
                        pinned: true,
                    },
                )
            })
            .collect();
        Self { providers, panels }
    }

    fn panel_ids(&self) -> Vec<String> {
        self.panels.keys().cloned().collect()
    }

    fn bindings(&self) -> Vec<PanelBinding> {
        self.panels
            .iter()
            .map(|(id, entry)| PanelBinding {
                panel_id: id.clone(),
                source_id: entry.source_id.clone(),
                pinned: entry.pinned,
            })
            .collect()
    }

    async fn sync_panels(&self, core: &EndpointCore) {
        core.directory.update_panels(self.panel_ids()).await;
    }

    /// Drop viewer-created panels nobody is watching any more.
    async fn prune_panels(&mut self, core: &EndpointCore) {
        let before = self.panels.len();
        self.panels
            .retain(|id, entry| entry.pinned || core.sessions.panel_in_use(id));
        if self.panels.len() != before {
            debug!(panels = self.panels.len(), "Pruned released panels");
            self.sync_panels(core).await;
        }
    }

    async fn publish_catalogue(&self, core: &EndpointCore) {
        match self.providers.windows.list_windows().await {
            Ok(windows) => {
                let windows: Vec<_> = windows
                    .iter()
                    .filter_map(|w| serde_json::to_value(w).ok())
                    .collect();
                info!(windows = windows.len(), "Publishing catalogue");
                core.send(ClientMessage::WindowList { windows }).await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to list windows");
                core.emit(EndpointEvent::Error(format!("window listing failed: {e}")));
            }
        }
    }

    async fn capture_window(
        &mut self,
        core: &mut EndpointCore,
        from: PeerId,
        source_id: String,
        panel_id: String,
    ) {
        match self.panels.get_mut(&panel_id) {
            Some(entry) if entry.source_id != source_id => {
                info!(panel = %panel_id, old = %entry.source_id, new = %source_id, "Rebinding panel");
                entry.source_id = source_id;
                let closed = core
                    .sessions
                    .close_panel(&panel_id, CloseReason::PanelReplaced)
                    .await;
                core.emit_closed(closed, &CloseReason::PanelReplaced);
            }
            Some(_) => {}
            None => {
                self.panels.insert(
                    panel_id.clone(),
                    PanelEntry {
                        source_id,
                        pinned: false,
                    },
                );
                self.sync_panels(core).await;
            }
        }
        self.start_offer(core, from, panel_id).await;
    }

    /// Open a fresh offering session for `(viewer, panel)`, replacing any
    /// existing one.
    async fn start_offer(&mut self, core: &mut EndpointCore, viewer: PeerId, panel_id: String) {
        let Some(source_id) = self.panels.get(&panel_id).map(|p| p.source_id.clone()) else {
            return;
        };
        let key = SessionKey::new(viewer, panel_id.clone());

        let (generation, connection) = match core.open_connection(&key).await {
            Ok(opened) => opened,
            Err(e) => {
                warn!(session = %key, error = %e, "Failed to open connection");
                core.emit(EndpointEvent::Error(format!("{key}: {e}")));
                return;
            }
        };
        core.open_session(Session::offerer(
            key.clone(),
            generation,
            connection,
            source_id.clone(),
        ))
        .await;
        core.emit(EndpointEvent::SessionState {
            key: key.clone(),
            state: SessionState::Offering,
        });

        let offer = match self.build_offer(core, &key, &source_id).await {
            Ok(offer) => offer,
            Err(e) => {
                core.fail_session(&key, e).await;
                return;
            }
        };

        core.set_state(&key, SessionState::Negotiating);
        core.send(ClientMessage::Offer {
            target_id: viewer,
            panel_id,
            sdp: offer.to_blob(),
            negotiation_id: Some(generation),
        })
        .await;

        let early = core.sessions.take_early(&key, Some(generation));
        if let Some(session) = core.sessions.get_mut(&key) {
            for candidate in early {
                if let Err(e) = session.add_remote_candidate(candidate).await {
                    warn!(session = %key, error = %e, "Dropping early candidate");
                }
            }
        }
    }

    async fn build_offer(
        &self,
        core: &EndpointCore,
        key: &SessionKey,
        source_id: &str,
    ) -> Result<SessionDescription, PanelcastError> {
        let stream = self.providers.capture.start_capture(source_id).await?;
        let session = core.sessions.get(key).ok_or(TransportError::Closed)?;
        let connection = session.connection();
        connection.attach_media(&stream, &core.policy).await?;
        connection
            .create_control_channel(&channel_label(&key.panel_id))
            .await?;
        Ok(connection.create_offer().await?)
    }

    async fn apply_answer(
        &mut self,
        core: &mut EndpointCore,
        from: PeerId,
        panel_id: String,
        sdp: serde_json::Value,
        negotiation_id: Option<u64>,
    ) {
        let key = SessionKey::new(from, panel_id);
        let Some(session) = core.sessions.get_mut(&key) else {
            debug!(session = %key, "Answer for unknown session");
            return;
        };
        if negotiation_id.is_some() && negotiation_id != session.negotiation_id {
            debug!(session = %key, ?negotiation_id, "Dropping stale answer");
            return;
        }
        if session.state != SessionState::Negotiating {
            debug!(session = %key, state = %session.state, "Unexpected answer");
            return;
        }

        let result = match SessionDescription::from_blob(&sdp) {
            Ok(desc) => session.apply_remote_description(desc).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            core.fail_session(&key, e).await;
        }
    }
}

#[async_trait]
impl RoleHandler for CaptureRole {
    type Command = CaptureCommand;

    async fn on_connected(&mut self, core: &mut EndpointCore, _peers: &[PeerInfo]) {
        self.publish_catalogue(core).await;
    }

    async fn on_signal(&mut self, core: &mut EndpointCore, from: PeerId, signal: Signal) {
        match signal {
            Signal::CaptureWindow {
                source_id,
                panel_id,
                ..
            } => self.capture_window(core, from, source_id, panel_id).await,
            Signal::PanelRequest { panel_id } => {
                if self.panels.contains_key(&panel_id) {
                    self.start_offer(core, from, panel_id).await;
                } else {
                    debug!(panel = %panel_id, "Panel request for a panel we do not own");
                }
            }
            Signal::ReleasePanel { panel_id } => {
                let key = SessionKey::new(from, panel_id);
                core.close_session(&key, CloseReason::Released).await;
                self.prune_panels(core).await;
            }
            Signal::Answer {
                panel_id,
                sdp,
                negotiation_id,
            } => {
                self.apply_answer(core, from, panel_id, sdp, negotiation_id)
                    .await
            }
            Signal::RequestWindowList => self.publish_catalogue(core).await,
            other => debug!(from = %from, kind = other.kind(), "Ignoring signal"),
        }
    }

    async fn on_command(&mut self, core: &mut EndpointCore, command: CaptureCommand) {
        match command {
            CaptureCommand::PublishCatalogue => self.publish_catalogue(core).await,
            CaptureCommand::AddPanel {
                panel_id,
                source_id,
            } => {
                self.panels.insert(
                    panel_id,
                    PanelEntry {
                        source_id,
                        pinned: true,
                    },
                );
                self.sync_panels(core).await;
            }
            CaptureCommand::RemovePanel { panel_id } => {
                if self.panels.remove(&panel_id).is_some() {
                    let closed = core
                        .sessions
                        .close_panel(&panel_id, CloseReason::Released)
                        .await;
                    core.emit_closed(closed, &CloseReason::Released);
                    self.sync_panels(core).await;
                }
            }
            CaptureCommand::Sessions(reply) => {
                let _ = reply.send(core.sessions.snapshot());
            }
            CaptureCommand::Panels(reply) => {
                let _ = reply.send(self.bindings());
            }
        }
    }

    async fn on_peer_left(&mut self, core: &mut EndpointCore, _peer_id: PeerId) {
        self.prune_panels(core).await;
    }

    async fn on_disconnected(&mut self, core: &mut EndpointCore) {
        self.prune_panels(core).await;
    }

    async fn on_control(
        &mut self,
        core: &mut EndpointCore,
        key: SessionKey,
        label: String,
        data: Vec<u8>,
    ) {
        if panel_from_label(&label) != Some(key.panel_id.as_str()) {
            debug!(session = %key, label = %label, "Ignoring message on foreign channel");
            return;
        }
        let Some(source_id) = core.sessions.get(&key).and_then(|s| s.source_id.clone()) else {
            return;
        };
        let event = match InputEvent::decode(&data) {
            Ok(event) => event,
            Err(e) => {
                debug!(session = %key, error = %e, "Malformed input event");
                return;
            }
        };
        if let Err(e) = self.providers.input.inject(&source_id, &event).await {
            warn!(session = %key, source = %source_id, error = %e, "Input injection failed");
        }
    }
}
