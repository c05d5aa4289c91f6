//! The per-endpoint session table.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use panelcast_common::protocol::Blob;
use panelcast_common::{PeerId, TransportError};
use tracing::{debug, warn};

use crate::transport::{PeerConnection, SessionDescription};

use super::types::{CloseReason, NegotiationRole, SessionInfo, SessionKey, SessionState};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One live negotiation and the connection it drives.
pub struct Session {
    pub key: SessionKey,
    pub role: NegotiationRole,
    pub state: SessionState,
    /// Local generation; tags transport events from this connection.
    pub generation: u64,
    /// Wire negotiation id: our generation when offering, the offer's id
    /// when answering.
    pub negotiation_id: Option<u64>,
    /// Captured source (capture side only).
    pub source_id: Option<String>,
    connection: Box<dyn PeerConnection>,
    remote_applied: bool,
    /// Candidates received before the remote description was applied.
    pending_remote: Vec<Blob>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("negotiation_id", &self.negotiation_id)
            .field("source_id", &self.source_id)
            .field("remote_applied", &self.remote_applied)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// A capture-side session. Its negotiation id is its generation.
    pub fn offerer(
        key: SessionKey,
        generation: u64,
        connection: Box<dyn PeerConnection>,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            key,
            role: NegotiationRole::Offerer,
            state: SessionState::Offering,
            generation,
            negotiation_id: Some(generation),
            source_id: Some(source_id.into()),
            connection,
            remote_applied: false,
            pending_remote: Vec::new(),
        }
    }

    /// A viewer-side session waiting for an offer.
    pub fn answerer(key: SessionKey, generation: u64, connection: Box<dyn PeerConnection>) -> Self {
        Self {
            key,
            role: NegotiationRole::Answerer,
            state: SessionState::AwaitingOffer,
            generation,
            negotiation_id: None,
            source_id: None,
            connection,
            remote_applied: false,
            pending_remote: Vec::new(),
        }
    }

    pub fn connection(&self) -> &dyn PeerConnection {
        self.connection.as_ref()
    }

    pub fn remote_applied(&self) -> bool {
        self.remote_applied
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            key: self.key.clone(),
            state: self.state,
            role: self.role,
            generation: self.generation,
            negotiation_id: self.negotiation_id,
            source_id: self.source_id.clone(),
        }
    }

    /// Apply the remote description, then any candidates that were waiting
    /// for it.
    pub async fn apply_remote_description(
        &mut self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        self.connection.set_remote_description(desc).await?;
        self.remote_applied = true;
        for candidate in std::mem::take(&mut self.pending_remote) {
            if let Err(e) = self.connection.add_ice_candidate(candidate).await {
                warn!(session = %self.key, error = %e, "Dropping buffered candidate");
            }
        }
        Ok(())
    }

    pub async fn add_remote_candidate(&mut self, candidate: Blob) -> Result<(), TransportError> {
        if !self.remote_applied {
            self.pending_remote.push(candidate);
            return Ok(());
        }
        self.connection.add_ice_candidate(candidate).await
    }
}

// ---------------------------------------------------------------------------
// Candidate routing
// ---------------------------------------------------------------------------

/// What to do with an incoming remote candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateRoute {
    /// Hand it to the live session.
    Apply,
    /// Hold it until a session (or a newer negotiation) for the key exists.
    Buffer,
    /// It belongs to a negotiation that has been replaced.
    Stale,
}

#[derive(Debug)]
struct EarlyCandidate {
    candidate: Blob,
    negotiation_id: Option<u64>,
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// All sessions of one endpoint, at most one per key.
#[derive(Debug)]
pub struct SessionTable {
    sessions: BTreeMap<SessionKey, Session>,
    early: BTreeMap<SessionKey, VecDeque<EarlyCandidate>>,
    early_limit: usize,
    next_generation: u64,
}

impl SessionTable {
    pub fn new(early_limit: usize) -> Self {
        Self {
            sessions: BTreeMap::new(),
            early: BTreeMap::new(),
            early_limit,
            next_generation: 1,
        }
    }

    /// Generation for the next connection. Never repeats within an endpoint.
    pub fn allocate_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    /// Insert a session, closing any previous one for its key as
    /// superseded. Buffered candidates for the key are kept for the new
    /// session. Returns the replaced session.
    pub async fn open(&mut self, session: Session) -> Option<SessionInfo> {
        let key = session.key.clone();
        let replaced = self.close(&key, CloseReason::Superseded).await;
        self.sessions.insert(key, session);
        replaced
    }

    pub fn get(&self, key: &SessionKey) -> Option<&Session> {
        self.sessions.get(key)
    }

    pub fn get_mut(&mut self, key: &SessionKey) -> Option<&mut Session> {
        self.sessions.get_mut(key)
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.sessions.contains_key(key)
    }

    /// Whether `generation` is the live connection for `key`.
    pub fn is_current(&self, key: &SessionKey, generation: u64) -> bool {
        self.sessions
            .get(key)
            .is_some_and(|s| s.generation == generation)
    }

    /// Returns whether the state actually changed.
    pub fn set_state(&mut self, key: &SessionKey, state: SessionState) -> bool {
        match self.sessions.get_mut(key) {
            Some(session) if session.state != state => {
                debug!(session = %key, from = %session.state, to = %state, "Session state");
                session.state = state;
                true
            }
            _ => false,
        }
    }

    /// Remove a session and release its connection. Buffered candidates for
    /// the key are discarded unless the key is about to be reopened.
    pub async fn close(&mut self, key: &SessionKey, reason: CloseReason) -> Option<SessionInfo> {
        if reason != CloseReason::Superseded {
            self.early.remove(key);
        }
        let session = self.sessions.remove(key)?;
        session.connection.close().await;
        debug!(session = %key, reason = %reason, "Session closed");
        Some(session.info())
    }

    /// Close every session whose key matches `pred`.
    pub async fn close_matching<F>(&mut self, pred: F, reason: CloseReason) -> Vec<SessionInfo>
    where
        F: Fn(&SessionKey) -> bool,
    {
        let keys: Vec<SessionKey> = self.sessions.keys().filter(|k| pred(k)).cloned().collect();
        let mut closed = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(info) = self.close(&key, reason.clone()).await {
                closed.push(info);
            }
        }
        closed
    }

    /// Close everything involving `peer` and forget its buffered candidates.
    pub async fn close_peer(&mut self, peer: PeerId, reason: CloseReason) -> Vec<SessionInfo> {
        self.early.retain(|k, _| k.remote != peer);
        self.close_matching(|k| k.remote == peer, reason).await
    }

    pub async fn close_panel(&mut self, panel_id: &str, reason: CloseReason) -> Vec<SessionInfo> {
        self.close_matching(|k| k.panel_id == panel_id, reason).await
    }

    pub async fn close_all(&mut self, reason: CloseReason) -> Vec<SessionInfo> {
        self.early.clear();
        self.close_matching(|_| true, reason).await
    }

    /// Decide where an incoming candidate goes.
    pub fn route_candidate(&self, key: &SessionKey, negotiation_id: Option<u64>) -> CandidateRoute {
        let Some(session) = self.sessions.get(key) else {
            return CandidateRoute::Buffer;
        };
        if session.role == NegotiationRole::Answerer && !session.remote_applied {
            return CandidateRoute::Buffer;
        }
        match (negotiation_id, session.negotiation_id) {
            (Some(theirs), Some(ours)) if theirs < ours => CandidateRoute::Stale,
            (Some(theirs), Some(ours)) if theirs > ours => match session.role {
                NegotiationRole::Answerer => CandidateRoute::Buffer,
                NegotiationRole::Offerer => CandidateRoute::Stale,
            },
            _ => CandidateRoute::Apply,
        }
    }

    /// Hold a candidate for a key with no usable session yet. The oldest
    /// entry is dropped once the per-key limit is reached.
    pub fn buffer_early(&mut self, key: SessionKey, candidate: Blob, negotiation_id: Option<u64>) {
        if self.early_limit == 0 {
            debug!(session = %key, "Early candidate buffering disabled, dropping");
            return;
        }
        let queue = self.early.entry(key).or_default();
        if queue.len() >= self.early_limit {
            queue.pop_front();
        }
        queue.push_back(EarlyCandidate {
            candidate,
            negotiation_id,
        });
    }

    /// Take the buffered candidates that belong to negotiation
    /// `negotiation_id`. Older ones are discarded; newer ones stay buffered.
    pub fn take_early(&mut self, key: &SessionKey, negotiation_id: Option<u64>) -> Vec<Blob> {
        let Some(queue) = self.early.remove(key) else {
            return Vec::new();
        };
        let mut ready = Vec::new();
        let mut later = VecDeque::new();
        for entry in queue {
            match (entry.negotiation_id, negotiation_id) {
                (Some(theirs), Some(ours)) if theirs < ours => {}
                (Some(theirs), Some(ours)) if theirs > ours => later.push_back(entry),
                _ => ready.push(entry.candidate),
            }
        }
        if !later.is_empty() {
            self.early.insert(key.clone(), later);
        }
        ready
    }

    pub fn early_len(&self, key: &SessionKey) -> usize {
        self.early.get(key).map_or(0, VecDeque::len)
    }

    /// Whether any session is carrying `panel_id`.
    pub fn panel_in_use(&self, panel_id: &str) -> bool {
        self.sessions.keys().any(|k| k.panel_id == panel_id)
    }

    /// All sessions, ordered by key.
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        self.sessions.values().map(Session::info).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
