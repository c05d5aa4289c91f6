//! Session registry: the broker's directory of connected peers.
//!
//! Pure state with synchronous operations. The registry is owned by the
//! broker actor and never shared across tasks, so it needs no locking.

use std::collections::{BTreeMap, BTreeSet};

use panelcast_common::{PeerId, PeerInfo, Role};

/// A connected endpoint. `H` is the connection handle used to reach it.
#[derive(Debug)]
pub struct Peer<H> {
    pub id: PeerId,
    /// `None` until the peer registers.
    pub role: Option<Role>,
    pub panel_ids: BTreeSet<String>,
    pub handle: H,
}

impl<H> Peer<H> {
    pub fn is_registered(&self) -> bool {
        self.role.is_some()
    }

    /// Directory view of this peer, if it has registered.
    pub fn info(&self) -> Option<PeerInfo> {
        self.role.map(|role| PeerInfo {
            peer_id: self.id,
            role,
            panel_ids: self.panel_ids.iter().cloned().collect(),
        })
    }
}

/// Outcome of [`Registry::set_role`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleChange {
    /// First registration of this peer.
    Initial,
    /// Same role and panel set as before.
    Unchanged,
    /// Same role, different panel set.
    PanelsUpdated,
    /// The peer re-registered with a different role. Last write wins.
    RoleChanged { previous: Role },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    #[error("peer id space exhausted")]
    IdSpaceExhausted,
}

/// Directory of connected peers keyed by broker-assigned id.
#[derive(Debug)]
pub struct Registry<H> {
    peers: BTreeMap<PeerId, Peer<H>>,
    next_id: u64,
}

impl<H> Default for Registry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> Registry<H> {
    pub fn new() -> Self {
        Self {
            peers: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Admit a new connection. Ids are monotonic and never reused.
    pub fn register(&mut self, handle: H) -> Result<PeerId, RegistryError> {
        let id = PeerId(self.next_id);
        self.next_id = self
            .next_id
            .checked_add(1)
            .ok_or(RegistryError::IdSpaceExhausted)?;
        self.peers.insert(
            id,
            Peer {
                id,
                role: None,
                panel_ids: BTreeSet::new(),
                handle,
            },
        );
        Ok(id)
    }

    /// Record a peer's declared role and panel set, replacing whatever was
    /// stored before.
    pub fn set_role(
        &mut self,
        id: PeerId,
        role: Role,
        panel_ids: impl IntoIterator<Item = String>,
    ) -> Result<RoleChange, RegistryError> {
        let peer = self.peers.get_mut(&id).ok_or(RegistryError::UnknownPeer(id))?;
        let panel_ids: BTreeSet<String> = panel_ids.into_iter().collect();

        let change = match peer.role {
            None => RoleChange::Initial,
            Some(previous) if previous != role => RoleChange::RoleChanged { previous },
            Some(_) if peer.panel_ids != panel_ids => RoleChange::PanelsUpdated,
            Some(_) => RoleChange::Unchanged,
        };

        peer.role = Some(role);
        peer.panel_ids = panel_ids;
        Ok(change)
    }

    /// Replace a peer's panel set. Returns whether the stored set changed.
    pub fn update_panel_ids(
        &mut self,
        id: PeerId,
        panel_ids: impl IntoIterator<Item = String>,
    ) -> Result<bool, RegistryError> {
        let peer = self.peers.get_mut(&id).ok_or(RegistryError::UnknownPeer(id))?;
        let panel_ids: BTreeSet<String> = panel_ids.into_iter().collect();
        if peer.panel_ids == panel_ids {
            return Ok(false);
        }
        peer.panel_ids = panel_ids;
        Ok(true)
    }

    /// Look up a peer. Absence is a normal condition: the peer may have
    /// disconnected while a message addressed to it was in flight.
    pub fn find(&self, id: PeerId) -> Option<&Peer<H>> {
        self.peers.get(&id)
    }

    /// Registered peers with the given role, in id order.
    pub fn list_by_role(&self, role: Role) -> Vec<&Peer<H>> {
        self.peers
            .values()
            .filter(|p| p.role == Some(role))
            .collect()
    }

    /// Directory entries for every registered peer except `exclude`.
    pub fn directory_except(&self, exclude: PeerId) -> Vec<PeerInfo> {
        self.peers
            .values()
            .filter(|p| p.id != exclude)
            .filter_map(Peer::info)
            .collect()
    }

    pub fn remove(&mut self, id: PeerId) -> Option<Peer<H>> {
        self.peers.remove(&id)
    }

    /// All connected peer ids, registered or not.
    pub fn ids(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
