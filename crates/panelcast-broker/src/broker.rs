//! Broker actor.
//!
//! A single task owns the [`Router`] and drains one command queue, so every
//! inbound message is handled to completion before the next. Connection
//! tasks talk to it through a cloneable [`BrokerHandle`]. Outbound frames go
//! to each connection's unbounded outbox and are never awaited.

use std::net::SocketAddr;

use panelcast_common::PeerId;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::BrokerError;
use crate::router::{Delivery, Router, RouterStats};

/// Queue of serialized frames waiting to be written to one connection.
pub type Outbox = mpsc::UnboundedSender<String>;

/// What the actor keeps per connection.
#[derive(Debug)]
pub struct PeerHandle {
    pub addr: SocketAddr,
    pub outbox: Outbox,
}

/// Snapshot of broker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerStats {
    /// Peers currently connected, registered or not.
    pub connected: usize,
    pub router: RouterStats,
}

#[derive(Debug)]
pub enum BrokerCommand {
    Connect {
        addr: SocketAddr,
        outbox: Outbox,
        reply: oneshot::Sender<Result<PeerId, BrokerError>>,
    },
    Inbound {
        peer_id: PeerId,
        text: String,
    },
    Disconnect {
        peer_id: PeerId,
    },
    Stats {
        reply: oneshot::Sender<BrokerStats>,
    },
}

/// Cloneable handle to the broker actor.
#[derive(Debug, Clone)]
pub struct BrokerHandle {
    tx: mpsc::UnboundedSender<BrokerCommand>,
}

impl BrokerHandle {
    /// Admit a connection. The welcome is queued on `outbox` before this
    /// returns.
    pub async fn connect(&self, addr: SocketAddr, outbox: Outbox) -> Result<PeerId, BrokerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(BrokerCommand::Connect {
                addr,
                outbox,
                reply,
            })
            .map_err(|_| BrokerError::Stopped)?;
        rx.await.map_err(|_| BrokerError::Stopped)?
    }

    /// Hand a text frame to the router.
    pub fn inbound(&self, peer_id: PeerId, text: String) {
        let _ = self.tx.send(BrokerCommand::Inbound { peer_id, text });
    }

    pub fn disconnect(&self, peer_id: PeerId) {
        let _ = self.tx.send(BrokerCommand::Disconnect { peer_id });
    }

    pub async fn stats(&self) -> Result<BrokerStats, BrokerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(BrokerCommand::Stats { reply })
            .map_err(|_| BrokerError::Stopped)?;
        rx.await.map_err(|_| BrokerError::Stopped)
    }
}

/// Spawn the broker actor. It stops once every handle is dropped.
pub fn spawn() -> (BrokerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(rx));
    (BrokerHandle { tx }, task)
}

async fn run(mut rx: mpsc::UnboundedReceiver<BrokerCommand>) {
    let mut router: Router<PeerHandle> = Router::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            BrokerCommand::Connect {
                addr,
                outbox,
                reply,
            } => match router.connect(PeerHandle { addr, outbox }) {
                Ok((peer_id, welcome)) => {
                    tracing::info!(peer = %peer_id, addr = %addr, "Peer connected");
                    deliver(&router, vec![welcome]);
                    let _ = reply.send(Ok(peer_id));
                }
                Err(e) => {
                    tracing::error!(addr = %addr, error = %e, "Refusing connection");
                    let _ = reply.send(Err(e.into()));
                }
            },
            BrokerCommand::Inbound { peer_id, text } => {
                let deliveries = router.inbound(peer_id, &text);
                deliver(&router, deliveries);
            }
            BrokerCommand::Disconnect { peer_id } => {
                let deliveries = router.disconnect(peer_id);
                let stats = router.stats();
                tracing::info!(
                    peer = %peer_id,
                    remaining = router.registry().len(),
                    routed = stats.routed,
                    dropped = stats.dropped_unknown_target,
                    malformed = stats.malformed,
                    "Peer disconnected"
                );
                deliver(&router, deliveries);
            }
            BrokerCommand::Stats { reply } => {
                let _ = reply.send(BrokerStats {
                    connected: router.registry().len(),
                    router: router.stats(),
                });
            }
        }
    }

    tracing::debug!("Broker actor stopped");
}

fn deliver(router: &Router<PeerHandle>, deliveries: Vec<Delivery>) {
    for Delivery { to, message } in deliveries {
        let Some(handle) = router.handle(to) else {
            continue;
        };
        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(peer = %to, error = %e, "Failed to serialize message");
                continue;
            }
        };
        if handle.outbox.send(json).is_err() {
            // The connection task is gone; its Disconnect is already queued.
            tracing::debug!(peer = %to, "Outbox closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use panelcast_common::ServerMessage;

    fn addr() -> SocketAddr {
        "127.0.0.1:9".parse().unwrap()
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> ServerMessage {
        let text = rx.recv().await.unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn connect_queues_welcome() {
        let (broker, _task) = spawn();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = broker.connect(addr(), tx).await.unwrap();

        match next(&mut rx).await {
            ServerMessage::Welcome { peer_id, peers, .. } => {
                assert_eq!(peer_id, id);
                assert!(peers.is_empty());
            }
            other => panic!("expected welcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn routes_between_connections_in_order() {
        let (broker, _task) = spawn();
        let (cap_tx, mut cap_rx) = mpsc::unbounded_channel();
        let (view_tx, mut view_rx) = mpsc::unbounded_channel();
        let cap = broker.connect(addr(), cap_tx).await.unwrap();
        let viewer = broker.connect(addr(), view_tx).await.unwrap();
        next(&mut cap_rx).await;
        next(&mut view_rx).await;

        broker.inbound(cap, r#"{"type":"register","role":"capture","panelIds":["p"]}"#.into());
        broker.inbound(
            viewer,
            format!(r#"{{"type":"release-panel","targetId":{cap},"panelId":"p"}}"#),
        );

        assert!(matches!(
            next(&mut view_rx).await,
            ServerMessage::PeerRegistered { peer_id, .. } if peer_id == cap
        ));
        assert_eq!(
            next(&mut cap_rx).await,
            ServerMessage::ReleasePanel {
                from_id: viewer,
                panel_id: "p".into()
            }
        );
    }

    #[tokio::test]
    async fn disconnect_broadcasts_and_updates_stats() {
        let (broker, _task) = spawn();
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, _b_rx) = mpsc::unbounded_channel();
        let _a = broker.connect(addr(), a_tx).await.unwrap();
        let b = broker.connect(addr(), b_tx).await.unwrap();
        next(&mut a_rx).await;

        broker.inbound(b, "garbage".into());
        broker.disconnect(b);

        assert_eq!(
            next(&mut a_rx).await,
            ServerMessage::PeerDisconnected { peer_id: b }
        );
        let stats = broker.stats().await.unwrap();
        assert_eq!(stats.connected, 1);
        assert_eq!(stats.router.connected_total, 2);
        assert_eq!(stats.router.malformed, 1);
    }

    #[tokio::test]
    async fn closed_outbox_does_not_stop_the_actor() {
        let (broker, _task) = spawn();
        let (dead_tx, dead_rx) = mpsc::unbounded_channel();
        let dead = broker.connect(addr(), dead_tx).await.unwrap();
        drop(dead_rx);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let live = broker.connect(addr(), tx).await.unwrap();
        next(&mut rx).await;

        broker.inbound(
            live,
            format!(r#"{{"type":"release-panel","targetId":{dead},"panelId":"p"}}"#),
        );
        let stats = broker.stats().await.unwrap();
        assert_eq!(stats.router.routed, 1);
        assert_eq!(stats.connected, 2);
    }
}
