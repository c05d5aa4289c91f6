//! Routing rules.
//!
//! [`Router`] owns the [`Registry`] and turns each inbound event into a list
//! of [`Delivery`]s. It performs no I/O; the broker actor serializes and
//! sends the deliveries. Routing problems are logged and counted here and
//! never produce a response to the sender.

use std::collections::BTreeMap;

use panelcast_common::protocol::Blob;
use panelcast_common::{CatalogueSnapshot, ClientMessage, PeerId, Role, ServerMessage};

use crate::registry::{Registry, RegistryError, RoleChange};

/// A message bound for one connected peer.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub to: PeerId,
    pub message: ServerMessage,
}

/// Running counters, reported through the broker handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Connections admitted since start.
    pub connected_total: u64,
    /// Directed messages forwarded to a present target.
    pub routed: u64,
    /// Fan-out operations (each counts once regardless of recipients).
    pub broadcasts: u64,
    /// Directed messages dropped because the target was absent.
    pub dropped_unknown_target: u64,
    /// Frames that did not parse as a known message.
    pub malformed: u64,
    /// Well-formed messages refused for the sender's role.
    pub rejected: u64,
}

#[derive(Debug)]
struct CachedCatalogue {
    seq: u64,
    windows: Vec<Blob>,
}

/// Broker routing state: the registry plus the catalogue cache.
#[derive(Debug)]
pub struct Router<H> {
    registry: Registry<H>,
    catalogues: BTreeMap<PeerId, CachedCatalogue>,
    catalogue_seq: u64,
    stats: RouterStats,
}

impl<H> Default for Router<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> Router<H> {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            catalogues: BTreeMap::new(),
            catalogue_seq: 0,
            stats: RouterStats::default(),
        }
    }

    pub fn registry(&self) -> &Registry<H> {
        &self.registry
    }

    pub fn stats(&self) -> RouterStats {
        self.stats
    }

    /// Connection handle for a peer, if it is still connected.
    pub fn handle(&self, id: PeerId) -> Option<&H> {
        self.registry.find(id).map(|p| &p.handle)
    }

    /// Admit a new connection and build its welcome.
    pub fn connect(&mut self, handle: H) -> Result<(PeerId, Delivery), RegistryError> {
        let id = self.registry.register(handle)?;
        self.stats.connected_total += 1;

        let welcome = ServerMessage::Welcome {
            peer_id: id,
            peers: self.registry.directory_except(id),
            catalogue_snapshot: self.latest_catalogue(),
        };
        Ok((
            id,
            Delivery {
                to: id,
                message: welcome,
            },
        ))
    }

    /// Parse and route one text frame from `from`.
    pub fn inbound(&mut self, from: PeerId, text: &str) -> Vec<Delivery> {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => self.route(from, msg),
            Err(e) => {
                self.stats.malformed += 1;
                tracing::warn!(peer = %from, error = %e, "Discarding malformed message");
                Vec::new()
            }
        }
    }

    /// Route a parsed message from `from`.
    pub fn route(&mut self, from: PeerId, msg: ClientMessage) -> Vec<Delivery> {
        if self.registry.find(from).is_none() {
            tracing::debug!(peer = %from, kind = msg.kind(), "Message from departed peer");
            return Vec::new();
        }

        let msg = match msg.into_directed(from) {
            Ok((target, forwarded)) => return self.forward(from, target, forwarded),
            Err(msg) => msg,
        };

        match msg {
            ClientMessage::Register { role, panel_ids } => self.on_register(from, role, panel_ids),
            ClientMessage::PanelRequest { panel_id } => {
                tracing::debug!(peer = %from, panel = %panel_id, "Panel request");
                self.broadcast_to_role(
                    from,
                    Role::Capture,
                    ServerMessage::PanelRequest {
                        from_id: from,
                        panel_id,
                    },
                )
            }
            ClientMessage::WindowList { windows } => self.on_window_list(from, windows),
            ClientMessage::RequestWindowList => self.broadcast_to_role(
                from,
                Role::Capture,
                ServerMessage::RequestWindowList { from_id: from },
            ),
            // Directed kinds were handled above.
            directed => {
                tracing::warn!(peer = %from, kind = directed.kind(), "Unroutable message");
                Vec::new()
            }
        }
    }

    /// Remove a peer and notify everyone left.
    pub fn disconnect(&mut self, id: PeerId) -> Vec<Delivery> {
        if self.registry.remove(id).is_none() {
            return Vec::new();
        }
        self.catalogues.remove(&id);

        let recipients = self.registry.ids();
        if recipients.is_empty() {
            return Vec::new();
        }
        self.stats.broadcasts += 1;
        recipients
            .into_iter()
            .map(|to| Delivery {
                to,
                message: ServerMessage::PeerDisconnected { peer_id: id },
            })
            .collect()
    }

    fn forward(&mut self, from: PeerId, target: PeerId, message: ServerMessage) -> Vec<Delivery> {
        if self.registry.find(target).is_none() {
            self.stats.dropped_unknown_target += 1;
            tracing::debug!(peer = %from, target = %target, "Dropping message for absent target");
            return Vec::new();
        }
        self.stats.routed += 1;
        vec![Delivery {
            to: target,
            message,
        }]
    }

    fn on_register(&mut self, from: PeerId, role: Role, panel_ids: Vec<String>) -> Vec<Delivery> {
        let change = match self.registry.set_role(from, role, panel_ids) {
            Ok(change) => change,
            Err(e) => {
                tracing::debug!(peer = %from, error = %e, "Register for departed peer");
                return Vec::new();
            }
        };

        match change {
            RoleChange::Unchanged => return Vec::new(),
            RoleChange::Initial => {
                tracing::info!(peer = %from, role = %role, "Peer registered");
            }
            RoleChange::PanelsUpdated => {
                tracing::debug!(peer = %from, "Panel set updated");
            }
            RoleChange::RoleChanged { previous } => {
                tracing::warn!(peer = %from, from_role = %previous, to_role = %role, "Peer changed role");
                if previous == Role::Capture {
                    self.catalogues.remove(&from);
                }
            }
        }

        let Some(info) = self.registry.find(from).and_then(|p| p.info()) else {
            return Vec::new();
        };
        let recipients: Vec<PeerId> = self
            .registry
            .ids()
            .into_iter()
            .filter(|id| *id != from)
            .collect();
        if recipients.is_empty() {
            return Vec::new();
        }
        self.stats.broadcasts += 1;
        recipients
            .into_iter()
            .map(|to| Delivery {
                to,
                message: ServerMessage::PeerRegistered {
                    peer_id: info.peer_id,
                    role: info.role,
                    panel_ids: info.panel_ids.clone(),
                },
            })
            .collect()
    }

    fn on_window_list(&mut self, from: PeerId, windows: Vec<Blob>) -> Vec<Delivery> {
        let is_capture = self
            .registry
            .find(from)
            .is_some_and(|p| p.role == Some(Role::Capture));
        if !is_capture {
            self.stats.rejected += 1;
            tracing::warn!(peer = %from, "Ignoring window list from non-capture peer");
            return Vec::new();
        }

        self.catalogue_seq += 1;
        self.catalogues.insert(
            from,
            CachedCatalogue {
                seq: self.catalogue_seq,
                windows: windows.clone(),
            },
        );
        tracing::debug!(peer = %from, windows = windows.len(), "Catalogue updated");

        self.broadcast_to_role(
            from,
            Role::Viewer,
            ServerMessage::WindowList {
                from_id: from,
                windows,
            },
        )
    }

    fn broadcast_to_role(&mut self, from: PeerId, role: Role, message: ServerMessage) -> Vec<Delivery> {
        let recipients: Vec<PeerId> = self
            .registry
            .list_by_role(role)
            .into_iter()
            .map(|p| p.id)
            .filter(|id| *id != from)
            .collect();
        if recipients.is_empty() {
            return Vec::new();
        }
        self.stats.broadcasts += 1;
        recipients
            .into_iter()
            .map(|to| Delivery {
                to,
                message: message.clone(),
            })
            .collect()
    }

    fn latest_catalogue(&self) -> Option<CatalogueSnapshot> {
        self.catalogues
            .iter()
            .max_by_key(|(_, c)| c.seq)
            .map(|(from_id, c)| CatalogueSnapshot {
                from_id: *from_id,
                windows: c.windows.clone(),
            })
    }
}

#[cfg(test)]
mod tests;
