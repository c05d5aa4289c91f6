//! Tests for the session table: supersession, closing and candidate routing.

use panelcast_common::PeerId;
use serde_json::json;
use tokio::sync::mpsc;

use super::*;
use crate::transport::{MemoryNetwork, PeerTransport, TransportEvent};

struct Fixture {
    network: MemoryNetwork,
    table: SessionTable,
    tx: mpsc::UnboundedSender<TransportEvent>,
    _rx: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Fixture {
    fn new(early_limit: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            network: MemoryNetwork::new(),
            table: SessionTable::new(early_limit),
            tx,
            _rx: rx,
        }
    }

    async fn offerer(&mut self, peer: u64, panel: &str) -> SessionKey {
        let key = SessionKey::new(PeerId(peer), panel);
        let generation = self.table.allocate_generation();
        let conn = self
            .network
            .transport()
            .open(key.clone(), generation, self.tx.clone())
            .await
            .unwrap();
        self.table
            .open(Session::offerer(key.clone(), generation, conn, "screen:0"))
            .await;
        key
    }

    async fn answerer(&mut self, peer: u64, panel: &str) -> SessionKey {
        let key = SessionKey::new(PeerId(peer), panel);
        let generation = self.table.allocate_generation();
        let conn = self
            .network
            .transport()
            .open(key.clone(), generation, self.tx.clone())
            .await
            .unwrap();
        self.table
            .open(Session::answerer(key.clone(), generation, conn))
            .await;
        key
    }
}

fn candidate(n: u32) -> serde_json::Value {
    json!({ "candidate": format!("memory c{n}") })
}

#[test]
fn key_display() {
    assert_eq!(SessionKey::new(PeerId(7), "panel-main").to_string(), "7:panel-main");
}

#[test]
fn only_supersede_is_silent() {
    assert!(CloseReason::Superseded.is_silent());
    assert!(!CloseReason::Released.is_silent());
    assert!(!CloseReason::Failed("x".into()).is_silent());
}

#[tokio::test]
async fn new_sessions_start_in_role_state() {
    let mut fx = Fixture::new(8);
    let cap = fx.offerer(1, "a").await;
    let view = fx.answerer(2, "b").await;

    let cap_info = fx.table.get(&cap).unwrap().info();
    assert_eq!(cap_info.state, SessionState::Offering);
    assert_eq!(cap_info.role, NegotiationRole::Offerer);
    assert_eq!(cap_info.negotiation_id, Some(cap_info.generation));
    assert_eq!(cap_info.source_id.as_deref(), Some("screen:0"));

    let view_info = fx.table.get(&view).unwrap().info();
    assert_eq!(view_info.state, SessionState::AwaitingOffer);
    assert_eq!(view_info.negotiation_id, None);
}

#[tokio::test]
async fn reopening_a_key_leaves_one_session_and_releases_the_old_one() {
    let mut fx = Fixture::new(8);
    let key = fx.offerer(1, "panel-main").await;
    let first = fx.table.get(&key).unwrap().generation;
    let _ = fx.offerer(1, "panel-main").await;

    assert_eq!(fx.table.len(), 1);
    let second = fx.table.get(&key).unwrap().generation;
    assert!(second > first);
    assert!(!fx.table.is_current(&key, first));
    assert!(fx.table.is_current(&key, second));
    assert_eq!(fx.network.live_connections().await, 1);
}

#[tokio::test]
async fn close_removes_record_and_connection() {
    let mut fx = Fixture::new(8);
    let key = fx.offerer(1, "a").await;

    let info = fx.table.close(&key, CloseReason::Released).await.unwrap();
    assert_eq!(info.key, key);
    assert!(fx.table.is_empty());
    assert_eq!(fx.network.live_connections().await, 0);
    assert!(fx.table.close(&key, CloseReason::Released).await.is_none());
}

#[tokio::test]
async fn close_peer_only_touches_that_peer() {
    let mut fx = Fixture::new(8);
    fx.offerer(1, "a").await;
    fx.offerer(1, "b").await;
    let keep = fx.offerer(2, "a").await;
    fx.table
        .buffer_early(SessionKey::new(PeerId(1), "c"), candidate(1), None);

    let closed = fx.table.close_peer(PeerId(1), CloseReason::PeerLeft).await;
    assert_eq!(closed.len(), 2);
    assert_eq!(fx.table.snapshot().len(), 1);
    assert!(fx.table.contains(&keep));
    assert_eq!(fx.table.early_len(&SessionKey::new(PeerId(1), "c")), 0);
}

#[tokio::test]
async fn close_panel_and_panel_in_use() {
    let mut fx = Fixture::new(8);
    fx.offerer(1, "a").await;
    fx.offerer(2, "a").await;
    fx.offerer(2, "b").await;
    assert!(fx.table.panel_in_use("a"));

    let closed = fx.table.close_panel("a", CloseReason::PanelReplaced).await;
    assert_eq!(closed.len(), 2);
    assert!(!fx.table.panel_in_use("a"));
    assert!(fx.table.panel_in_use("b"));
}

#[tokio::test]
async fn set_state_reports_changes_only() {
    let mut fx = Fixture::new(8);
    let key = fx.offerer(1, "a").await;
    assert!(fx.table.set_state(&key, SessionState::Negotiating));
    assert!(!fx.table.set_state(&key, SessionState::Negotiating));
    assert!(!fx
        .table
        .set_state(&SessionKey::new(PeerId(9), "a"), SessionState::Active));
}

#[tokio::test]
async fn candidates_for_unknown_keys_are_buffered_with_a_bound() {
    let mut fx = Fixture::new(3);
    let key = SessionKey::new(PeerId(1), "a");
    assert_eq!(fx.table.route_candidate(&key, None), CandidateRoute::Buffer);

    for n in 0..5 {
        fx.table.buffer_early(key.clone(), candidate(n), None);
    }
    assert_eq!(fx.table.early_len(&key), 3);
    // Oldest dropped first.
    assert_eq!(
        fx.table.take_early(&key, None),
        vec![candidate(2), candidate(3), candidate(4)]
    );
    assert_eq!(fx.table.early_len(&key), 0);
}

#[tokio::test]
async fn zero_limit_disables_buffering() {
    let mut fx = Fixture::new(0);
    let key = SessionKey::new(PeerId(1), "a");
    fx.table.buffer_early(key.clone(), candidate(0), None);
    assert_eq!(fx.table.early_len(&key), 0);
}

#[tokio::test]
async fn take_early_filters_by_negotiation() {
    let mut fx = Fixture::new(8);
    let key = SessionKey::new(PeerId(1), "a");
    fx.table.buffer_early(key.clone(), candidate(1), Some(1));
    fx.table.buffer_early(key.clone(), candidate(2), Some(2));
    fx.table.buffer_early(key.clone(), candidate(3), Some(3));
    fx.table.buffer_early(key.clone(), candidate(4), None);

    assert_eq!(
        fx.table.take_early(&key, Some(2)),
        vec![candidate(2), candidate(4)]
    );
    // The newer negotiation's candidate waits for its own offer.
    assert_eq!(fx.table.early_len(&key), 1);
    assert_eq!(fx.table.take_early(&key, Some(3)), vec![candidate(3)]);
}

#[tokio::test]
async fn superseding_keeps_early_candidates_but_release_drops_them() {
    let mut fx = Fixture::new(8);
    let key = fx.answerer(1, "a").await;
    let first = fx.table.get(&key).unwrap().generation;
    fx.table.buffer_early(key.clone(), candidate(1), Some(5));

    let generation = fx.table.allocate_generation();
    let conn = fx
        .network
        .transport()
        .open(key.clone(), generation, fx.tx.clone())
        .await
        .unwrap();
    let replaced = fx
        .table
        .open(Session::answerer(key.clone(), generation, conn))
        .await
        .unwrap();
    assert_eq!(replaced.generation, first);
    assert_eq!(fx.table.early_len(&key), 1);

    fx.table.close(&key, CloseReason::Released).await;
    assert_eq!(fx.table.early_len(&key), 0);
}

#[tokio::test]
async fn offerer_routes_by_negotiation_id() {
    let mut fx = Fixture::new(8);
    let key = fx.offerer(1, "a").await;
    let current = fx.table.get(&key).unwrap().negotiation_id;

    assert_eq!(fx.table.route_candidate(&key, current), CandidateRoute::Apply);
    assert_eq!(fx.table.route_candidate(&key, None), CandidateRoute::Apply);
    assert_eq!(fx.table.route_candidate(&key, Some(0)), CandidateRoute::Stale);
    assert_eq!(
        fx.table.route_candidate(&key, current.map(|n| n + 1)),
        CandidateRoute::Stale
    );
}

#[tokio::test]
async fn answerer_buffers_until_offer_applied() {
    let mut fx = Fixture::new(8);
    let key = fx.answerer(1, "a").await;
    assert_eq!(fx.table.route_candidate(&key, Some(4)), CandidateRoute::Buffer);
    assert_eq!(fx.table.route_candidate(&key, None), CandidateRoute::Buffer);
}

#[tokio::test]
async fn candidates_before_remote_description_are_held_by_the_session() {
    let mut fx = Fixture::new(8);
    let key = fx.offerer(1, "a").await;
    let session = fx.table.get_mut(&key).unwrap();
    // The memory connection would reject this before a remote description.
    session.add_remote_candidate(candidate(1)).await.unwrap();
    assert!(!session.remote_applied());
}

#[tokio::test]
async fn snapshot_is_ordered_by_key() {
    let mut fx = Fixture::new(8);
    fx.offerer(2, "a").await;
    fx.offerer(1, "b").await;
    fx.offerer(1, "a").await;
    let keys: Vec<String> = fx
        .table
        .snapshot()
        .into_iter()
        .map(|s| s.key.to_string())
        .collect();
    assert_eq!(keys, vec!["1:a", "1:b", "2:a"]);
}
