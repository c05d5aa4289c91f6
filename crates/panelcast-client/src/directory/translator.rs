//! Translates broker messages into `DirectoryEvent`s, keeping the local
//! copy of the peer directory up to date along the way.

use panelcast_common::{CatalogueSnapshot, PeerInfo, ServerMessage};
use tracing::{debug, info};

use super::types::{DirectoryEvent, Shared, Signal};

pub(crate) async fn translate(msg: ServerMessage, shared: &Shared) -> Vec<DirectoryEvent> {
    let msg = match Signal::from_server(msg) {
        Ok((from_id, signal)) => return vec![DirectoryEvent::Signal { from_id, signal }],
        Err(msg) => msg,
    };

    match msg {
        ServerMessage::Welcome {
            peer_id,
            peers,
            catalogue_snapshot,
        } => {
            info!(peer = %peer_id, known = peers.len(), "Welcomed by broker");
            *shared.local_id.write().await = Some(peer_id);
            *shared.connected.write().await = true;
            {
                let mut directory = shared.peers.write().await;
                directory.clear();
                directory.extend(peers.iter().map(|p| (p.peer_id, p.clone())));
            }

            let mut events = vec![DirectoryEvent::Connected {
                local_id: peer_id,
                peers,
            }];
            if let Some(snapshot) = catalogue_snapshot {
                events.push(DirectoryEvent::Catalogue(snapshot));
            }
            events
        }
        ServerMessage::PeerRegistered {
            peer_id,
            role,
            panel_ids,
        } => {
            let info = PeerInfo {
                peer_id,
                role,
                panel_ids,
            };
            let previous = shared.peers.write().await.insert(peer_id, info.clone());
            if previous.is_some() {
                debug!(peer = %peer_id, role = %role, "Peer updated");
                vec![DirectoryEvent::PeerUpdated(info)]
            } else {
                debug!(peer = %peer_id, role = %role, "Peer joined");
                vec![DirectoryEvent::PeerJoined(info)]
            }
        }
        ServerMessage::PeerDisconnected { peer_id } => {
            shared.peers.write().await.remove(&peer_id);
            debug!(peer = %peer_id, "Peer left");
            vec![DirectoryEvent::PeerLeft { peer_id }]
        }
        ServerMessage::WindowList { from_id, windows } => {
            vec![DirectoryEvent::Catalogue(CatalogueSnapshot { from_id, windows })]
        }
        other => {
            debug!(message = ?other, "Unhandled broker message");
            Vec::new()
        }
    }
}
