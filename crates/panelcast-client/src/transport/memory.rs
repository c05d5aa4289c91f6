//! Process-local peer connections for headless runs and tests.
//!
//! Connections opened from the same [`MemoryNetwork`] find each other by the
//! origin id carried in their descriptions. Descriptions are line-based:
//!
//! ```text
//! v=memory
//! o=<connection id>
//! m=video H264 VP8 VP9 AV1
//! b=AS:8000
//! a=max-bitrate:20000
//! a=framerate:60
//! a=priority:high
//! a=channel:input-panel-main
//! ```
//!
//! A connection reports `Connected` once both descriptions are applied and
//! at least one remote candidate has arrived, then opens its control
//! channels. Closing a connection reports `Disconnected` on its linked peer,
//! and `Failed` once the network's disconnect grace passes without the peer
//! closing too.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use panelcast_common::protocol::Blob;
use panelcast_common::{new_id, TransportError, VideoCodec};
use tokio::sync::Mutex;
use tracing::debug;

use crate::media::{MediaPolicy, SUPPORTED_CODECS};
use crate::providers::MediaStream;
use crate::session::SessionKey;

use super::{
    ConnectionState, PeerConnection, PeerTransport, SdpType, SessionDescription, TransportEvent,
    TransportEventKind, TransportEventSink,
};

const VERSION_LINE: &str = "v=memory";
const CANDIDATE_PREFIX: &str = "memory ";
const DEFAULT_DISCONNECT_GRACE: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Descriptions
// ---------------------------------------------------------------------------

/// Parsed form of a memory session description.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemoryDescription {
    pub origin: String,
    pub codecs: Vec<VideoCodec>,
    pub bitrate_kbps: Option<u32>,
    pub max_bitrate_kbps: Option<u32>,
    pub framerate: Option<u32>,
    pub priority: Option<String>,
    pub channels: Vec<String>,
}

impl MemoryDescription {
    pub fn parse(sdp: &str) -> Result<Self, TransportError> {
        let mut lines = sdp.lines().map(str::trim).filter(|l| !l.is_empty());
        if lines.next() != Some(VERSION_LINE) {
            return Err(TransportError::InvalidDescription(
                "not a memory description".into(),
            ));
        }

        let mut desc = Self::default();
        for line in lines {
            if let Some(origin) = line.strip_prefix("o=") {
                desc.origin = origin.to_string();
            } else if let Some(codecs) = line.strip_prefix("m=video") {
                desc.codecs = codecs
                    .split_whitespace()
                    .map(|c| {
                        VideoCodec::from_mime(c).ok_or_else(|| {
                            TransportError::InvalidDescription(format!("unknown codec {c}"))
                        })
                    })
                    .collect::<Result<_, _>>()?;
            } else if let Some(bitrate) = line.strip_prefix("b=AS:") {
                desc.bitrate_kbps = Some(bitrate.parse().map_err(|_| {
                    TransportError::InvalidDescription(format!("bad bitrate {bitrate}"))
                })?);
            } else if let Some(max) = line.strip_prefix("a=max-bitrate:") {
                desc.max_bitrate_kbps = Some(max.parse().map_err(|_| {
                    TransportError::InvalidDescription(format!("bad max bitrate {max}"))
                })?);
            } else if let Some(fps) = line.strip_prefix("a=framerate:") {
                desc.framerate = Some(fps.parse().map_err(|_| {
                    TransportError::InvalidDescription(format!("bad framerate {fps}"))
                })?);
            } else if let Some(priority) = line.strip_prefix("a=priority:") {
                desc.priority = Some(priority.to_string());
            } else if let Some(label) = line.strip_prefix("a=channel:") {
                desc.channels.push(label.to_string());
            }
        }

        if desc.origin.is_empty() {
            return Err(TransportError::InvalidDescription("missing origin".into()));
        }
        Ok(desc)
    }

    pub fn render(&self) -> String {
        let mut lines = vec![VERSION_LINE.to_string(), format!("o={}", self.origin)];
        if !self.codecs.is_empty() {
            let names: Vec<&str> = self
                .codecs
                .iter()
                .map(|c| c.mime_type().trim_start_matches("video/"))
                .collect();
            lines.push(format!("m=video {}", names.join(" ")));
        }
        if let Some(bitrate) = self.bitrate_kbps {
            lines.push(format!("b=AS:{bitrate}"));
        }
        if let Some(max) = self.max_bitrate_kbps {
            lines.push(format!("a=max-bitrate:{max}"));
        }
        if let Some(fps) = self.framerate {
            lines.push(format!("a=framerate:{fps}"));
        }
        if let Some(priority) = &self.priority {
            lines.push(format!("a=priority:{priority}"));
        }
        for label in &self.channels {
            lines.push(format!("a=channel:{label}"));
        }
        lines.join("\r\n")
    }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// Shared switchboard connecting memory connections to each other.
#[derive(Clone)]
pub struct MemoryNetwork {
    connections: Arc<Mutex<HashMap<String, Weak<Shared>>>>,
    disconnect_grace: Duration,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self {
            connections: Arc::default(),
            disconnect_grace: DEFAULT_DISCONNECT_GRACE,
        }
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long a connection whose peer closed stays `Disconnected` before
    /// it reports `Failed`.
    pub fn with_disconnect_grace(mut self, grace: Duration) -> Self {
        self.disconnect_grace = grace;
        self
    }

    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            network: self.clone(),
        }
    }

    /// Connections opened and not yet closed.
    pub async fn live_connections(&self) -> usize {
        self.connections
            .lock()
            .await
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    async fn lookup(&self, id: &str) -> Option<Arc<Shared>> {
        self.connections.lock().await.get(id).and_then(Weak::upgrade)
    }
}

/// [`PeerTransport`] over a [`MemoryNetwork`].
#[derive(Clone, Default)]
pub struct MemoryTransport {
    network: MemoryNetwork,
}

impl MemoryTransport {
    pub fn new(network: MemoryNetwork) -> Self {
        Self { network }
    }
}

#[async_trait]
impl PeerTransport for MemoryTransport {
    async fn open(
        &self,
        key: SessionKey,
        generation: u64,
        events: TransportEventSink,
    ) -> Result<Box<dyn PeerConnection>, TransportError> {
        let shared = Arc::new(Shared {
            id: new_id(),
            key,
            generation,
            events,
            inner: Mutex::new(Inner::default()),
        });
        self.network
            .connections
            .lock()
            .await
            .insert(shared.id.clone(), Arc::downgrade(&shared));
        debug!(conn = %shared.id, session = %shared.key, "Memory connection opened");
        Ok(Box::new(MemoryConnection {
            shared,
            network: self.network.clone(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

struct Shared {
    id: String,
    key: SessionKey,
    generation: u64,
    events: TransportEventSink,
    inner: Mutex<Inner>,
}

impl Shared {
    fn emit(&self, kind: TransportEventKind) {
        let _ = self.events.send(TransportEvent {
            key: self.key.clone(),
            generation: self.generation,
            kind,
        });
    }

    /// The linked peer went away. The path is lost at once; the connection
    /// fails for good once `grace` passes without a local close.
    async fn remote_closed(self: Arc<Self>, grace: Duration) {
        {
            let mut inner = self.inner.lock().await;
            if matches!(
                inner.state,
                ConnectionState::Closed | ConnectionState::Disconnected | ConnectionState::Failed
            ) {
                return;
            }
            inner.state = ConnectionState::Disconnected;
        }
        self.emit(TransportEventKind::StateChanged(ConnectionState::Disconnected));

        let weak = Arc::downgrade(&self);
        drop(self);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let Some(shared) = weak.upgrade() else { return };
            let mut inner = shared.inner.lock().await;
            if inner.state != ConnectionState::Disconnected {
                return;
            }
            inner.state = ConnectionState::Failed;
            drop(inner);
            shared.emit(TransportEventKind::StateChanged(ConnectionState::Failed));
        });
    }
}

struct Inner {
    state: ConnectionState,
    media: Option<MemoryDescription>,
    channels: Vec<String>,
    local: Option<SdpType>,
    remote: Option<(SdpType, MemoryDescription)>,
    remote_candidate: bool,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            state: ConnectionState::New,
            media: None,
            channels: Vec::new(),
            local: None,
            remote: None,
            remote_candidate: false,
        }
    }
}

impl Inner {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.state == ConnectionState::Closed {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    /// Move to `Connected` once everything is in place. Returns the channels
    /// that opened, or `None` if nothing changed.
    fn try_connect(&mut self) -> Option<Vec<String>> {
        let ready = self.local.is_some() && self.remote.is_some() && self.remote_candidate;
        if !ready || !matches!(self.state, ConnectionState::New | ConnectionState::Connecting) {
            return None;
        }
        self.state = ConnectionState::Connected;
        Some(self.channels.clone())
    }
}

struct MemoryConnection {
    shared: Arc<Shared>,
    network: MemoryNetwork,
}

impl MemoryConnection {
    fn local_candidate(&self) -> Blob {
        serde_json::json!({
            "candidate": format!("{CANDIDATE_PREFIX}{}", self.shared.id),
            "sdpMid": "0",
            "sdpMLineIndex": 0
        })
    }

    fn announce(&self, opened: Option<Vec<String>>) {
        let Some(channels) = opened else { return };
        self.shared
            .emit(TransportEventKind::StateChanged(ConnectionState::Connected));
        for label in channels {
            self.shared.emit(TransportEventKind::ControlOpened { label });
        }
    }
}

#[async_trait]
impl PeerConnection for MemoryConnection {
    async fn attach_media(
        &self,
        stream: &MediaStream,
        policy: &MediaPolicy,
    ) -> Result<(), TransportError> {
        let mut inner = self.shared.inner.lock().await;
        inner.ensure_open()?;
        debug!(conn = %self.shared.id, stream = %stream.id, source = %stream.source_id, "Attaching media");
        inner.media = Some(MemoryDescription {
            origin: String::new(),
            codecs: policy.ordered_codecs(&SUPPORTED_CODECS),
            bitrate_kbps: Some(policy.target_bitrate_kbps),
            max_bitrate_kbps: Some(policy.max_bitrate_kbps),
            framerate: Some(policy.max_framerate),
            priority: Some(policy.priority.as_str().to_string()),
            channels: Vec::new(),
        });
        Ok(())
    }

    async fn create_control_channel(&self, label: &str) -> Result<(), TransportError> {
        let mut inner = self.shared.inner.lock().await;
        inner.ensure_open()?;
        if inner.local.is_some() {
            return Err(TransportError::InvalidState(
                "control channels must be created before the offer".into(),
            ));
        }
        if !inner.channels.iter().any(|c| c == label) {
            inner.channels.push(label.to_string());
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let mut inner = self.shared.inner.lock().await;
        inner.ensure_open()?;
        if inner.remote.is_some() {
            return Err(TransportError::InvalidState(
                "remote description already applied".into(),
            ));
        }
        let mut desc = inner.media.clone().unwrap_or_default();
        desc.origin = self.shared.id.clone();
        desc.channels = inner.channels.clone();
        inner.local = Some(SdpType::Offer);
        inner.state = ConnectionState::Connecting;
        drop(inner);

        self.shared
            .emit(TransportEventKind::LocalCandidate(self.local_candidate()));
        Ok(SessionDescription::offer(desc.render()))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let mut inner = self.shared.inner.lock().await;
        inner.ensure_open()?;
        let remote = match &inner.remote {
            Some((SdpType::Offer, remote)) => remote.clone(),
            _ => {
                return Err(TransportError::InvalidState(
                    "no remote offer to answer".into(),
                ))
            }
        };
        let desc = MemoryDescription {
            origin: self.shared.id.clone(),
            ..remote
        };
        inner.local = Some(SdpType::Answer);
        let opened = inner.try_connect();
        drop(inner);

        self.shared
            .emit(TransportEventKind::LocalCandidate(self.local_candidate()));
        self.announce(opened);
        Ok(SessionDescription::answer(desc.render()))
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        let parsed = MemoryDescription::parse(&desc.sdp)?;
        let mut inner = self.shared.inner.lock().await;
        inner.ensure_open()?;
        let expected = match inner.local {
            Some(SdpType::Offer) => SdpType::Answer,
            None => SdpType::Offer,
            Some(SdpType::Answer) => {
                return Err(TransportError::InvalidState("negotiation complete".into()))
            }
        };
        if desc.kind != expected {
            return Err(TransportError::InvalidState(format!(
                "expected {expected:?}, got {:?}",
                desc.kind
            )));
        }
        if desc.kind == SdpType::Offer {
            inner.channels = parsed.channels.clone();
            inner.state = ConnectionState::Connecting;
        }
        inner.remote = Some((desc.kind, parsed));
        let opened = inner.try_connect();
        drop(inner);

        self.announce(opened);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: Blob) -> Result<(), TransportError> {
        let text = candidate
            .get("candidate")
            .and_then(|c| c.as_str())
            .ok_or_else(|| TransportError::InvalidCandidate("missing candidate".into()))?;
        if !text.starts_with(CANDIDATE_PREFIX) {
            return Err(TransportError::InvalidCandidate(text.to_string()));
        }

        let mut inner = self.shared.inner.lock().await;
        inner.ensure_open()?;
        if inner.remote.is_none() {
            return Err(TransportError::InvalidState(
                "candidate before remote description".into(),
            ));
        }
        inner.remote_candidate = true;
        let opened = inner.try_connect();
        drop(inner);

        self.announce(opened);
        Ok(())
    }

    async fn send_control(&self, label: &str, data: Vec<u8>) -> Result<(), TransportError> {
        let inner = self.shared.inner.lock().await;
        if inner.state != ConnectionState::Connected || !inner.channels.iter().any(|c| c == label) {
            return Err(TransportError::ChannelNotOpen(label.to_string()));
        }
        let remote_id = inner.remote.as_ref().map(|(_, d)| d.origin.clone());
        drop(inner);

        let peer = match remote_id {
            Some(id) => self.network.lookup(&id).await,
            None => None,
        };
        let peer = peer.ok_or(TransportError::Closed)?;
        peer.emit(TransportEventKind::ControlMessage {
            label: label.to_string(),
            data,
        });
        Ok(())
    }

    async fn close(&self) {
        let mut inner = self.shared.inner.lock().await;
        inner.state = ConnectionState::Closed;
        let remote_id = inner.remote.as_ref().map(|(_, d)| d.origin.clone());
        drop(inner);

        self.network.connections.lock().await.remove(&self.shared.id);
        if let Some(peer) = match remote_id {
            Some(id) => self.network.lookup(&id).await,
            None => None,
        } {
            peer.remote_closed(self.network.disconnect_grace).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use panelcast_common::{PeerId, StreamPriority};
    use tokio::sync::mpsc;

    struct Side {
        conn: Box<dyn PeerConnection>,
        rx: mpsc::UnboundedReceiver<TransportEvent>,
    }

    async fn open(transport: &MemoryTransport, peer: u64) -> Side {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = transport
            .open(SessionKey::new(PeerId(peer), "panel-main"), 1, tx)
            .await
            .unwrap();
        Side { conn, rx }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Vec<TransportEventKind> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev.kind);
        }
        out
    }

    fn candidate_of(events: &[TransportEventKind]) -> Blob {
        events
            .iter()
            .find_map(|k| match k {
                TransportEventKind::LocalCandidate(c) => Some(c.clone()),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn description_round_trip() {
        let desc = MemoryDescription {
            origin: "abc".into(),
            codecs: vec![VideoCodec::VP9, VideoCodec::H264],
            bitrate_kbps: Some(4000),
            max_bitrate_kbps: Some(9000),
            framerate: Some(30),
            priority: Some("medium".into()),
            channels: vec!["input-a".into()],
        };
        assert_eq!(MemoryDescription::parse(&desc.render()).unwrap(), desc);
    }

    #[test]
    fn foreign_descriptions_are_rejected() {
        assert!(matches!(
            MemoryDescription::parse("v=0\r\no=- 0 0 IN IP4 127.0.0.1"),
            Err(TransportError::InvalidDescription(_))
        ));
        assert!(MemoryDescription::parse("v=memory\r\nm=video H264").is_err());
    }

    #[tokio::test]
    async fn offer_applies_media_policy() {
        let transport = MemoryTransport::default();
        let side = open(&transport, 2).await;
        let policy = MediaPolicy {
            codec_preferences: vec![VideoCodec::VP8],
            target_bitrate_kbps: 2500,
            max_bitrate_kbps: 6000,
            priority: StreamPriority::Low,
            ..MediaPolicy::default()
        };
        side.conn
            .attach_media(&MediaStream::new("screen:0"), &policy)
            .await
            .unwrap();
        side.conn.create_control_channel("input-panel-main").await.unwrap();
        let offer = side.conn.create_offer().await.unwrap();

        let parsed = MemoryDescription::parse(&offer.sdp).unwrap();
        assert_eq!(parsed.codecs[0], VideoCodec::VP8);
        assert_eq!(parsed.codecs.len(), SUPPORTED_CODECS.len());
        assert_eq!(parsed.bitrate_kbps, Some(2500));
        assert_eq!(parsed.max_bitrate_kbps, Some(6000));
        assert_eq!(parsed.priority.as_deref(), Some("low"));
        assert_eq!(parsed.channels, vec!["input-panel-main".to_string()]);

        assert!(matches!(
            side.conn.create_control_channel("late").await,
            Err(TransportError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn full_exchange_connects_both_sides_and_carries_control() {
        let network = MemoryNetwork::new().with_disconnect_grace(Duration::from_millis(20));
        let transport = network.transport();
        let mut offerer = open(&transport, 2).await;
        let mut answerer = open(&transport, 1).await;

        offerer.conn.create_control_channel("input-panel-main").await.unwrap();
        let offer = offerer.conn.create_offer().await.unwrap();
        answerer.conn.set_remote_description(offer).await.unwrap();
        let answer = answerer.conn.create_answer().await.unwrap();
        offerer.conn.set_remote_description(answer).await.unwrap();

        let offerer_candidate = candidate_of(&drain(&mut offerer.rx));
        let answerer_candidate = candidate_of(&drain(&mut answerer.rx));
        offerer.conn.add_ice_candidate(answerer_candidate).await.unwrap();
        answerer.conn.add_ice_candidate(offerer_candidate).await.unwrap();

        for side in [&mut offerer, &mut answerer] {
            let events = drain(&mut side.rx);
            assert!(events.contains(&TransportEventKind::StateChanged(ConnectionState::Connected)));
            assert!(events.contains(&TransportEventKind::ControlOpened {
                label: "input-panel-main".into()
            }));
        }

        answerer
            .conn
            .send_control("input-panel-main", b"hello".to_vec())
            .await
            .unwrap();
        assert_eq!(
            drain(&mut offerer.rx),
            vec![TransportEventKind::ControlMessage {
                label: "input-panel-main".into(),
                data: b"hello".to_vec()
            }]
        );
        assert!(matches!(
            answerer.conn.send_control("input-other", vec![]).await,
            Err(TransportError::ChannelNotOpen(_))
        ));

        assert_eq!(network.live_connections().await, 2);
        offerer.conn.close().await;
        assert_eq!(
            drain(&mut answerer.rx),
            vec![TransportEventKind::StateChanged(ConnectionState::Disconnected)]
        );
        let failed = tokio::time::timeout(Duration::from_secs(2), answerer.rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            failed.kind,
            TransportEventKind::StateChanged(ConnectionState::Failed)
        );
        answerer.conn.close().await;
        assert_eq!(network.live_connections().await, 0);
    }

    #[tokio::test]
    async fn answer_requires_remote_offer() {
        let transport = MemoryTransport::default();
        let side = open(&transport, 1).await;
        assert!(matches!(
            side.conn.create_answer().await,
            Err(TransportError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn candidates_are_validated() {
        let transport = MemoryTransport::default();
        let offerer = open(&transport, 2).await;
        let answerer = open(&transport, 1).await;
        let offer = offerer.conn.create_offer().await.unwrap();

        assert!(matches!(
            answerer
                .conn
                .add_ice_candidate(serde_json::json!({"candidate": "memory x"}))
                .await,
            Err(TransportError::InvalidState(_))
        ));
        answerer.conn.set_remote_description(offer).await.unwrap();
        assert!(matches!(
            answerer
                .conn
                .add_ice_candidate(serde_json::json!({"candidate": "candidate:1 udp"}))
                .await,
            Err(TransportError::InvalidCandidate(_))
        ));
    }

    #[tokio::test]
    async fn closed_connection_rejects_operations() {
        let transport = MemoryTransport::default();
        let side = open(&transport, 1).await;
        side.conn.close().await;
        side.conn.close().await;
        assert_eq!(side.conn.create_offer().await, Err(TransportError::Closed));
    }
}
