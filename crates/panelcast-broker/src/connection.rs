//! Per-connection handler: admit, then pump frames between the socket and
//! the broker actor until either side goes away.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::broker::BrokerHandle;

/// Handle a single WebSocket connection, plain or TLS.
pub async fn handle_connection<S>(ws: WebSocketStream<S>, addr: SocketAddr, broker: BrokerHandle)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws.split();

    // 1. Register with the broker; the welcome lands in our outbox.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let peer_id = match broker.connect(addr, tx).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(addr = %addr, error = %e, "Connection refused");
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };

    // 2. Forwarding loop.
    loop {
        tokio::select! {
            // Outbox → this client's WebSocket
            out = rx.recv() => {
                let Some(text) = out else { break };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }

            // This client's WebSocket → broker
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        broker.inbound(peer_id, text.to_string());
                    }
                    Some(Ok(Message::Binary(_))) => {
                        tracing::debug!(peer = %peer_id, "Ignoring binary frame");
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(peer = %peer_id, error = %e, "WS error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    // 3. Cleanup.
    broker.disconnect(peer_id);
}
