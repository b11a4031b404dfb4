//! Session event loop
//!
//! Multiplexes transport events, timers, media events and user commands onto
//! one [`SyncSession`]. Each event is handled to completion before the next
//! one is picked up, so the session never sees concurrent mutation.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::media::{MediaBackend, MediaEvent};
use crate::session::{SessionObserver, SyncSession};
use crate::transport::{self, TransportEvent, TransportHandle};

/// User commands for a running session
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CastVote,
    CastDownvote,
    Resync,
    /// Retry playback after a user gesture
    Resume,
    SetVolume(u8),
    Admin(serde_json::Value),
    Shutdown,
}

type Link = (TransportHandle, mpsc::UnboundedReceiver<TransportEvent>);

async fn next_transport_event(link: &mut Option<Link>) -> Option<TransportEvent> {
    match link {
        Some((_, events)) => events.recv().await,
        None => std::future::pending().await,
    }
}

/// Run a listener session until `Command::Shutdown` or the command channel closes
pub async fn run<B: MediaBackend>(
    config: SyncConfig,
    backend: B,
    observer: Arc<dyn SessionObserver>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut media_events: mpsc::UnboundedReceiver<MediaEvent>,
) -> Result<(), SyncError> {
    config.validate()?;
    let url = config.server_url.clone();

    let mut position_timer = time::interval(config.position_query_interval());
    position_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut progress_timer = time::interval(config.progress_interval());
    progress_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut session = SyncSession::new(config, backend, observer);
    let mut link: Option<Link> = None;

    let reconnect = time::sleep(std::time::Duration::ZERO);
    tokio::pin!(reconnect);
    let mut reconnect_armed = true;

    info!("Listener session started for {}", url);

    loop {
        tokio::select! {
            () = &mut reconnect, if reconnect_armed => {
                reconnect_armed = false;
                session.on_connecting();
                link = Some(transport::spawn(url.clone()));
            }
            event = next_transport_event(&mut link) => match event {
                Some(TransportEvent::Open) => {
                    session.on_open(Instant::now());
                    // The open already queried; a tick overdue from the disconnected spell would supersede it
                    position_timer.reset();
                }
                Some(TransportEvent::Message(message)) => session.handle_message(message, Instant::now()),
                closed => {
                    match closed {
                        Some(TransportEvent::Closed { reason }) => debug!("Transport closed: {}", reason),
                        _ => warn!("Transport task vanished without closing"),
                    }
                    link = None;
                    let delay = session
                        .on_closed()
                        .unwrap_or_else(|| session.config().reconnect.delay_for(1));
                    reconnect.as_mut().reset(Instant::now() + delay);
                    reconnect_armed = true;
                }
            },
            _ = position_timer.tick(), if session.is_connected() => {
                session.request_position(Instant::now());
            }
            _ = progress_timer.tick() => session.refresh_progress(),
            Some(event) = media_events.recv() => session.on_media_event(event, Instant::now()),
            command = commands.recv() => {
                let Some(command) = command else {
                    debug!("Command channel closed");
                    break;
                };
                if command == Command::Shutdown {
                    break;
                }
                if let Err(e) = apply_command(&mut session, command) {
                    warn!("Command failed: {}", e);
                }
            }
        }

        if let Some((handle, _)) = &link {
            for message in session.drain_outbound() {
                if let Err(e) = handle.send(message) {
                    debug!("Dropping outbound message: {}", e);
                }
            }
        }
        if session.take_progress_restart() {
            progress_timer.reset();
        }
    }

    if let Some((handle, _)) = link {
        handle.close();
    }
    info!("Listener session stopped");
    Ok(())
}

fn apply_command<B: MediaBackend>(session: &mut SyncSession<B>, command: Command) -> Result<(), SyncError> {
    let now = Instant::now();
    match command {
        Command::CastVote => session.cast_vote()?,
        Command::CastDownvote => session.cast_downvote()?,
        Command::Resync => session.resync(now),
        Command::Resume => session.resume(now),
        Command::SetVolume(percent) => session.set_volume(percent),
        Command::Admin(payload) => session.send_admin(payload)?,
        Command::Shutdown => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::VirtualBackend;
    use crate::protocol::Track;
    use crate::reconnect::{ConnectionState, ReconnectPolicy};
    use crate::session::LagReport;
    use crate::votes::VoteState;
    use futures::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::Message;

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Debug, PartialEq)]
    enum Seen {
        Connection(ConnectionState),
        Track(String),
    }

    struct ChannelObserver {
        tx: mpsc::UnboundedSender<Seen>,
    }

    impl SessionObserver for ChannelObserver {
        fn on_connection_state(&self, state: ConnectionState) {
            let _ = self.tx.send(Seen::Connection(state));
        }
        fn on_track_changed(&self, track: &Track) {
            let _ = self.tx.send(Seen::Track(track.path.clone()));
        }
        fn on_progress(&self, _elapsed_ms: u64, _length_ms: u64) {}
        fn on_lag(&self, _report: LagReport) {}
        fn on_vote_state(&self, _state: VoteState, _required_quorum: u32) {}
        fn on_sync_degraded(&self) {}
        fn on_playback_blocked(&self) {}
        fn on_playback_resumed(&self) {}
    }

    async fn expect(seen: &mut mpsc::UnboundedReceiver<Seen>, wanted: Seen) {
        loop {
            let next = timeout(WAIT, seen.recv()).await.unwrap().unwrap();
            if next == wanted {
                return;
            }
        }
    }

    async fn next_text<S>(ws: &mut S) -> String
    where
        S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            match timeout(WAIT, ws.next()).await.unwrap() {
                Some(Ok(Message::Text(text))) => return text.as_str().to_string(),
                Some(Ok(_)) => continue,
                other => panic!("station socket ended: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_session_against_station() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = SyncConfig {
            reconnect: ReconnectPolicy::Fixed { delay_ms: 50 },
            ..SyncConfig::with_server(format!("ws://{}/stream", listener.local_addr().unwrap()))
        };

        let (media_tx, media_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (seen_tx, mut seen) = mpsc::unbounded_channel();
        let driver = tokio::spawn(run(
            config,
            VirtualBackend::new(media_tx),
            Arc::new(ChannelObserver { tx: seen_tx }),
            command_rx,
            media_rx,
        ));

        // First connection: the opening position query, then an announcement
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        expect(&mut seen, Seen::Connection(ConnectionState::Open)).await;
        let query = next_text(&mut ws).await;
        assert!(query.starts_with(r#"{"type":"position""#), "{}", query);

        let update = r#"{"type":"update","data":{"path":"a.mp3","title":"A","length_ms":60000,"elapsed_ms":1000}}"#;
        ws.send(Message::Text(update.into())).await.unwrap();
        expect(&mut seen, Seen::Track("a.mp3".to_string())).await;

        command_tx.send(Command::CastVote).unwrap();
        loop {
            if next_text(&mut ws).await == r#"{"type":"voteskip"}"# {
                break;
            }
        }

        // Station goes away; the listener comes back on its own
        drop(ws);
        expect(&mut seen, Seen::Connection(ConnectionState::Closed)).await;
        let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        expect(&mut seen, Seen::Connection(ConnectionState::Open)).await;
        let query = next_text(&mut ws).await;
        assert!(query.starts_with(r#"{"type":"position""#), "{}", query);

        command_tx.send(Command::Shutdown).unwrap();
        assert!(timeout(WAIT, driver).await.unwrap().unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_opening_query_is_not_superseded() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = SyncConfig {
            reconnect: ReconnectPolicy::Fixed { delay_ms: 50 },
            position_query_interval_ms: 60_000,
            ..SyncConfig::with_server(format!("ws://{}/stream", listener.local_addr().unwrap()))
        };

        let (_media_tx, media_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (seen_tx, mut seen) = mpsc::unbounded_channel();
        let driver = tokio::spawn(run(
            config,
            VirtualBackend::detached(),
            Arc::new(ChannelObserver { tx: seen_tx }),
            command_rx,
            media_rx,
        ));

        for _ in 0..2 {
            let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            expect(&mut seen, Seen::Connection(ConnectionState::Open)).await;
            let query = next_text(&mut ws).await;
            assert!(query.starts_with(r#"{"type":"position""#), "{}", query);

            // Exactly one query per open until the interval comes around
            let extra = timeout(Duration::from_millis(300), next_text(&mut ws)).await;
            assert!(extra.is_err(), "unexpected frame: {:?}", extra);

            drop(ws);
            expect(&mut seen, Seen::Connection(ConnectionState::Closed)).await;
        }

        command_tx.send(Command::Shutdown).unwrap();
        assert!(timeout(WAIT, driver).await.unwrap().unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let (_media_tx, media_rx) = mpsc::unbounded_channel();
        let (_command_tx, command_rx) = mpsc::unbounded_channel();
        let (seen_tx, _seen) = mpsc::unbounded_channel();
        let result = run(
            SyncConfig::with_server("http://not-a-websocket"),
            VirtualBackend::detached(),
            Arc::new(ChannelObserver { tx: seen_tx }),
            command_rx,
            media_rx,
        )
        .await;
        assert!(matches!(result, Err(SyncError::Config(_))));
    }
}
