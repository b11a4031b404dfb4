//! WebSocket transport to the station
//!
//! Each connection attempt runs in its own task. The task reports `Open`,
//! every decoded message, and finally exactly one `Closed`; the caller talks
//! to it through a [`TransportHandle`].

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};

use crate::error::SyncError;
use crate::protocol::{ClientMessage, ServerMessage};

/// Events emitted by a connection task
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Handshake completed
    Open,
    /// Decoded station message
    Message(ServerMessage),
    /// The connection is gone (or never came up)
    Closed { reason: String },
}

#[derive(Debug)]
enum TransportCommand {
    Send(ClientMessage),
    Close,
}

/// Handle to a running connection task
#[derive(Debug, Clone)]
pub struct TransportHandle {
    command_tx: mpsc::UnboundedSender<TransportCommand>,
}

impl TransportHandle {
    pub fn send(&self, message: ClientMessage) -> Result<(), SyncError> {
        self.command_tx
            .send(TransportCommand::Send(message))
            .map_err(|_| SyncError::ChannelClosed)
    }

    pub fn close(&self) {
        let _ = self.command_tx.send(TransportCommand::Close);
    }
}

/// Connect to `url` in a background task
pub fn spawn(url: String) -> (TransportHandle, mpsc::UnboundedReceiver<TransportEvent>) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let reason = match run(&url, &event_tx, command_rx).await {
            Ok(reason) => reason,
            Err(e) => {
                warn!("Connection to {} failed: {}", url, e);
                e.to_string()
            }
        };
        let _ = event_tx.send(TransportEvent::Closed { reason });
    });

    (TransportHandle { command_tx }, event_rx)
}

async fn run(
    url: &str,
    event_tx: &mpsc::UnboundedSender<TransportEvent>,
    mut command_rx: mpsc::UnboundedReceiver<TransportCommand>,
) -> Result<String, SyncError> {
    debug!("Connecting to {}", url);
    let (ws_stream, _) = connect_async(url).await?;
    info!("WebSocket connected to {}", url);
    let _ = event_tx.send(TransportEvent::Open);

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            command = command_rx.recv() => match command {
                Some(TransportCommand::Send(message)) => {
                    let text = message.encode()?;
                    trace!("-> {}", text);
                    write.send(Message::Text(text.into())).await?;
                }
                Some(TransportCommand::Close) | None => {
                    let _ = write.close().await;
                    return Ok("closed by listener".to_string());
                }
            },
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    trace!("<- {}", text.as_str());
                    match ServerMessage::decode(&text) {
                        Ok(Some(message)) => {
                            if event_tx.send(TransportEvent::Message(message)).is_err() {
                                return Ok("session gone".to_string());
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!("Dropping malformed frame: {}", e),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "closed by station".to_string());
                    return Ok(reason);
                }
                // Ping/pong are answered by tungstenite, binary frames are not ours
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Ok("stream ended".to_string()),
            },
        }
    }
}
