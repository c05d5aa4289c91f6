//! Background WebSocket connection loop with auto-reconnect.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use panelcast_common::{ClientMessage, ServerMessage};
use panelcast_config::DirectoryConfig;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::translator::translate;
use super::types::{DirectoryCommand, DirectoryEvent, Shared, WsWriter};

type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

// ---------------------------------------------------------------------------
// Connection Loop
// ---------------------------------------------------------------------------

/// Background task owning the broker connection. Registers with the current
/// panel set on every connect and backs off exponentially between attempts.
pub(crate) async fn connection_loop(
    config: DirectoryConfig,
    shared: Shared,
    event_tx: mpsc::Sender<DirectoryEvent>,
    shutdown: CancellationToken,
) {
    let mut reconnect_delay = config.reconnect_delay_secs;
    let timeout = Duration::from_secs(config.connect_timeout_secs);

    loop {
        info!(url = %config.url, "Connecting to broker");

        let attempt = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(config.url.as_str())) => result,
        };

        match attempt {
            Ok(Ok((ws_stream, _))) => {
                reconnect_delay = config.reconnect_delay_secs;
                let (ws_write, ws_read) = ws_stream.split();
                *shared.writer.lock().await = Some(ws_write);

                let register = shared.registration.read().await.message();
                if !send_message(&shared.writer, &register).await {
                    warn!("Failed to send registration");
                }

                let heartbeat_handle = tokio::spawn(heartbeat_task(
                    Arc::clone(&shared.writer),
                    config.heartbeat_interval_secs,
                ));

                read_loop(ws_read, &shared, &event_tx, &shutdown).await;

                // Cleanup.
                heartbeat_handle.abort();
                if let Some(mut writer) = shared.writer.lock().await.take() {
                    let _ = writer.close().await;
                }
                shared.reset().await;
                let _ = event_tx.send(DirectoryEvent::Disconnected).await;
            }
            Ok(Err(e)) => {
                error!(error = %e, "Failed to connect to broker");
                let _ = event_tx
                    .send(DirectoryEvent::Error(format!("Connection failed: {e}")))
                    .await;
            }
            Err(_elapsed) => {
                error!(
                    timeout_secs = config.connect_timeout_secs,
                    "Broker connection timed out"
                );
                let _ = event_tx
                    .send(DirectoryEvent::Error(format!(
                        "Connection timed out after {}s",
                        config.connect_timeout_secs
                    )))
                    .await;
            }
        }

        // Nobody is listening any more.
        if shutdown.is_cancelled() || event_tx.is_closed() {
            break;
        }

        // Exponential backoff reconnect.
        info!(
            delay = reconnect_delay,
            "Reconnecting in {} seconds", reconnect_delay
        );
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_secs(reconnect_delay)) => {}
        }
        reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay_secs);
    }

    debug!("Directory connection loop stopped");
}

async fn read_loop(
    mut read_stream: WsReader,
    shared: &Shared,
    event_tx: &mpsc::Sender<DirectoryEvent>,
    shutdown: &CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = read_stream.next() => frame,
        };

        match frame {
            Some(Ok(WsMessage::Text(text))) => {
                match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(msg) => {
                        for event in translate(msg, shared).await {
                            if event_tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, text = %text.as_str(), "Unrecognized message from broker");
                    }
                }
            }
            Some(Ok(WsMessage::Close(_))) | None => {
                info!("Broker closed connection");
                break;
            }
            Some(Err(e)) => {
                warn!(error = %e, "WebSocket error");
                break;
            }
            Some(Ok(_)) => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

async fn heartbeat_task(ws_write: Arc<Mutex<Option<WsWriter>>>, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    // The first tick completes immediately.
    interval.tick().await;
    loop {
        interval.tick().await;
        let mut guard = ws_write.lock().await;
        let Some(writer) = guard.as_mut() else {
            break;
        };
        if writer
            .send(WsMessage::Ping(Vec::<u8>::new().into()))
            .await
            .is_err()
        {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Command Loop
// ---------------------------------------------------------------------------

/// Long-lived task applying client commands to whichever connection is
/// current. Messages sent while disconnected are dropped; the registration
/// is remembered and replayed on the next connect.
pub(crate) async fn command_loop(
    mut command_rx: mpsc::Receiver<DirectoryCommand>,
    shared: Shared,
    shutdown: CancellationToken,
) {
    while let Some(cmd) = command_rx.recv().await {
        match cmd {
            DirectoryCommand::Send(msg) => {
                if !send_message(&shared.writer, &msg).await {
                    debug!(kind = msg.kind(), "Not connected, dropping message");
                }
            }
            DirectoryCommand::UpdatePanels(panel_ids) => {
                let register = {
                    let mut registration = shared.registration.write().await;
                    registration.panel_ids = panel_ids;
                    registration.message()
                };
                send_message(&shared.writer, &register).await;
            }
            DirectoryCommand::Disconnect => {
                info!("Disconnecting from broker");
                break;
            }
        }
    }
    shutdown.cancel();
}

/// Serialize and write one message. Returns `false` if there is no live
/// connection or the write failed.
pub(crate) async fn send_message(
    writer: &Mutex<Option<WsWriter>>,
    msg: &ClientMessage,
) -> bool {
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "Failed to serialize message");
            return false;
        }
    };
    let mut guard = writer.lock().await;
    match guard.as_mut() {
        Some(writer) => writer.send(WsMessage::Text(json.into())).await.is_ok(),
        None => false,
    }
}
