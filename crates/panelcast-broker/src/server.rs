//! TCP accept loop feeding WebSocket connections to the broker actor.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::accept_async;

use crate::broker::{self, BrokerHandle};
use crate::connection::handle_connection;
use crate::error::BrokerError;

/// A bound listener plus the broker actor it feeds.
pub struct BrokerServer {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    broker: BrokerHandle,
}

impl BrokerServer {
    /// Bind `addr` and start the broker actor. Pass port 0 for an ephemeral
    /// port and read it back with [`BrokerServer::local_addr`].
    pub async fn bind(addr: &str, tls: Option<TlsAcceptor>) -> Result<Self, BrokerError> {
        let listener = TcpListener::bind(addr).await?;
        let (broker, _task) = broker::spawn();
        Ok(Self {
            listener,
            tls,
            broker,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, BrokerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    pub fn handle(&self) -> BrokerHandle {
        self.broker.clone()
    }

    /// Accept connections forever.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let broker = self.broker.clone();
                    let tls = self.tls.clone();
                    tokio::spawn(async move {
                        serve_stream(stream, addr, tls, broker).await;
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
}

async fn serve_stream(
    stream: TcpStream,
    addr: SocketAddr,
    tls: Option<TlsAcceptor>,
    broker: BrokerHandle,
) {
    let _ = stream.set_nodelay(true);

    match tls {
        Some(acceptor) => {
            let stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(addr = %addr, error = %e, "TLS handshake failed");
                    return;
                }
            };
            match accept_async(stream).await {
                Ok(ws) => handle_connection(ws, addr, broker).await,
                Err(e) => tracing::warn!(addr = %addr, error = %e, "WS handshake failed"),
            }
        }
        None => match accept_async(stream).await {
            Ok(ws) => handle_connection(ws, addr, broker).await,
            Err(e) => tracing::warn!(addr = %addr, error = %e, "WS handshake failed"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use panelcast_common::ServerMessage;
    use tokio_tungstenite::tungstenite::Message;

    async fn recv(
        ws: &mut tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<TcpStream>,
        >,
    ) -> ServerMessage {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn welcome_then_disconnect_over_websocket() {
        let server = BrokerServer::bind("127.0.0.1:0", None).await.unwrap();
        let addr = server.local_addr().unwrap();
        let broker = server.handle();
        assert!(!server.is_tls());
        tokio::spawn(server.run());

        let url = format!("ws://{addr}");
        let (mut a, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let a_id = match recv(&mut a).await {
            ServerMessage::Welcome { peer_id, .. } => peer_id,
            other => panic!("expected welcome, got {other:?}"),
        };

        let (mut b, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let b_id = match recv(&mut b).await {
            ServerMessage::Welcome { peer_id, .. } => peer_id,
            other => panic!("expected welcome, got {other:?}"),
        };
        assert_ne!(a_id, b_id);

        b.send(Message::Text(
            r#"{"type":"register","role":"viewer","panelIds":[]}"#
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
        assert!(matches!(
            recv(&mut a).await,
            ServerMessage::PeerRegistered { peer_id, .. } if peer_id == b_id
        ));

        b.close(None).await.unwrap();
        assert_eq!(
            recv(&mut a).await,
            ServerMessage::PeerDisconnected { peer_id: b_id }
        );
        assert_eq!(broker.stats().await.unwrap().connected, 1);
    }

    #[tokio::test]
    async fn ping_is_answered_with_matching_pong() {
        let server = BrokerServer::bind("127.0.0.1:0", None).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        ws.send(Message::Ping(b"hb-1".to_vec().into())).await.unwrap();

        let payload = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                if let Message::Pong(data) = ws.next().await.unwrap().unwrap() {
                    return data;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(&payload[..], b"hb-1");
    }
}
