//! Public handle for interacting with the broker connection.

use panelcast_common::{ClientMessage, PeerId, PeerInfo, Role};
use panelcast_config::DirectoryConfig;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::connection::{command_loop, connection_loop};
use super::types::{DirectoryCommand, DirectoryEvent, Shared};

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Handle for interacting with the broker.
///
/// All methods are non-blocking and send commands to the background
/// connection task.
pub struct DirectoryClient {
    command_tx: mpsc::Sender<DirectoryCommand>,
    shared: Shared,
}

impl DirectoryClient {
    /// Create a new client and start the background connection.
    /// Returns `(client, event_receiver)`.
    pub fn connect(
        config: DirectoryConfig,
        role: Role,
        panel_ids: Vec<String>,
    ) -> (Self, mpsc::Receiver<DirectoryEvent>) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (command_tx, command_rx) = mpsc::channel(256);
        let shared = Shared::new(role, panel_ids);
        let shutdown = CancellationToken::new();

        tokio::spawn(connection_loop(
            config,
            shared.clone(),
            event_tx,
            shutdown.clone(),
        ));
        tokio::spawn(command_loop(command_rx, shared.clone(), shutdown));

        (Self { command_tx, shared }, event_rx)
    }

    /// A client with no connection behind it. Commands land in the returned
    /// receiver instead of on the wire.
    pub fn detached(role: Role, panel_ids: Vec<String>) -> (Self, mpsc::Receiver<DirectoryCommand>) {
        let (command_tx, command_rx) = mpsc::channel(256);
        let client = Self {
            command_tx,
            shared: Shared::new(role, panel_ids),
        };
        (client, command_rx)
    }

    /// Send a message to the broker. Dropped if not connected.
    pub async fn send(&self, msg: ClientMessage) {
        let _ = self.command_tx.send(DirectoryCommand::Send(msg)).await;
    }

    /// Replace the advertised panel set and re-register.
    pub async fn update_panels(&self, panel_ids: Vec<String>) {
        let _ = self
            .command_tx
            .send(DirectoryCommand::UpdatePanels(panel_ids))
            .await;
    }

    /// Disconnect from the broker and stop reconnecting.
    pub async fn disconnect(&self) {
        let _ = self.command_tx.send(DirectoryCommand::Disconnect).await;
    }

    /// Check if connected and welcomed.
    pub async fn is_connected(&self) -> bool {
        *self.shared.connected.read().await
    }

    /// Our broker-assigned id for the current connection.
    pub async fn local_peer_id(&self) -> Option<PeerId> {
        *self.shared.local_id.read().await
    }

    /// Known peers, ordered by id.
    pub async fn peers(&self) -> Vec<PeerInfo> {
        self.shared.peers.read().await.values().cloned().collect()
    }

    pub async fn role(&self) -> Role {
        self.shared.registration.read().await.role
    }
}
