//! Session implementation for FFI

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::driver::{self, Command};
use crate::media::MediaEvent;

use super::handlers::{CallbackObserver, SharedCallback};
use super::media::ForeignBackend;
use super::types::*;

static TRACING_INIT: Once = Once::new();

/// Channels into a running driver task
struct ActiveSession {
    commands: mpsc::UnboundedSender<Command>,
    media_events: mpsc::UnboundedSender<MediaEvent>,
}

impl ActiveSession {
    fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}

/// Main listener interface
#[derive(uniffi::Object)]
pub struct RadioSession {
    runtime: Runtime,
    callback: SharedCallback,
    player: RwLock<Option<Arc<dyn MediaPlayer>>>,
    active: Mutex<Option<ActiveSession>>,
    /// Mirrors the connection state reported by the running session
    connected: Arc<AtomicBool>,
}

#[uniffi::export]
impl RadioSession {
    /// Create a new session
    #[uniffi::constructor]
    pub fn new() -> Self {
        TRACING_INIT.call_once(|| {
            let filter = tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("radio_core=debug"));
            tracing_subscriber::fmt()
                .with_ansi(false)
                .with_target(false)
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        });

        info!("Initializing radio-core session");

        let runtime = Runtime::new().expect("Failed to create tokio runtime");

        Self {
            runtime,
            callback: Arc::new(RwLock::new(None)),
            player: RwLock::new(None),
            active: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set the event callback
    pub fn set_callback(&self, callback: Box<dyn SessionCallback>) {
        *self.callback.write() = Some(Arc::from(callback));
    }

    /// Set the platform player used for the next connection
    pub fn set_media_player(&self, player: Box<dyn MediaPlayer>) {
        *self.player.write() = Some(Arc::from(player));
    }

    /// Connect to a station and keep the connection alive until `disconnect`
    pub fn connect(&self, server_url: String) -> Result<(), CoreError> {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(ActiveSession::is_running) {
            return Err(CoreError::AlreadyConnected);
        }

        let player = self
            .player
            .read()
            .clone()
            .ok_or_else(|| CoreError::InvalidConfig("no media player set".to_string()))?;
        let config = SyncConfig::with_server(server_url);
        config.validate()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (media_tx, media_rx) = mpsc::unbounded_channel();
        let observer = Arc::new(CallbackObserver::new(
            Arc::clone(&self.callback),
            Arc::clone(&self.connected),
        ));

        info!("Connecting to {}", config.server_url);
        self.runtime.spawn(async move {
            let backend = ForeignBackend::new(player);
            if let Err(e) = driver::run(config, backend, observer, command_rx, media_rx).await {
                warn!("Session ended with error: {}", e);
            }
        });

        *active = Some(ActiveSession {
            commands: command_tx,
            media_events: media_tx,
        });
        Ok(())
    }

    /// Stop the session and close the connection
    pub fn disconnect(&self) -> Result<(), CoreError> {
        let active = self.active.lock().take().ok_or(CoreError::NotConnected)?;
        let _ = active.commands.send(Command::Shutdown);
        self.connected.store(false, Ordering::SeqCst);

        if let Some(cb) = self.callback.read().as_ref() {
            cb.on_connection_changed(ConnectionStatus::Closed);
        }
        info!("Disconnected");
        Ok(())
    }

    /// Toggle our skip vote
    pub fn vote_skip(&self) -> Result<(), CoreError> {
        self.send_when_connected(Command::CastVote)
    }

    /// Downvote the current track (also counts as a skip vote)
    pub fn downvote(&self) -> Result<(), CoreError> {
        self.send_when_connected(Command::CastDownvote)
    }

    /// Force a seek on the next position reply and re-enable automatic correction
    pub fn resync(&self) -> Result<(), CoreError> {
        self.send(Command::Resync)
    }

    /// Retry playback; call from a user gesture after `on_playback_blocked`
    pub fn resume_playback(&self) -> Result<(), CoreError> {
        self.send(Command::Resume)
    }

    /// Set volume, 0-100
    pub fn set_volume(&self, percent: u8) -> Result<(), CoreError> {
        self.send(Command::SetVolume(percent.min(100)))
    }

    /// Send an admin payload (JSON text) to the station untouched
    pub fn send_admin(&self, payload_json: String) -> Result<(), CoreError> {
        let payload = serde_json::from_str(&payload_json)
            .map_err(|e| CoreError::InvalidConfig(format!("admin payload is not JSON: {}", e)))?;
        self.send_when_connected(Command::Admin(payload))
    }

    /// The player finished buffering `handle_id`
    pub fn notify_media_ready(&self, handle_id: u64) {
        self.forward_media_event(MediaEvent::Ready(handle_id));
    }

    /// Playback of `handle_id` actually started
    pub fn notify_playback_started(&self, handle_id: u64) {
        self.forward_media_event(MediaEvent::Started(handle_id));
    }

    /// The platform refused to start `handle_id` without a user gesture
    pub fn notify_playback_blocked(&self, handle_id: u64) {
        self.forward_media_event(MediaEvent::Blocked(handle_id));
    }

    /// Check if the station connection is open
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl RadioSession {
    fn send(&self, command: Command) -> Result<(), CoreError> {
        let active = self.active.lock();
        let active = active.as_ref().ok_or(CoreError::NotConnected)?;
        active.commands.send(command).map_err(|_| CoreError::NotConnected)
    }

    fn send_when_connected(&self, command: Command) -> Result<(), CoreError> {
        if !self.is_connected() {
            return Err(CoreError::NotConnected);
        }
        self.send(command)
    }

    fn forward_media_event(&self, event: MediaEvent) {
        match self.active.lock().as_ref() {
            Some(active) => {
                let _ = active.media_events.send(event);
            }
            None => debug!("No session running, ignoring {:?}", event),
        }
    }
}

impl Drop for RadioSession {
    fn drop(&mut self) {
        if let Some(active) = self.active.lock().take() {
            let _ = active.commands.send(Command::Shutdown);
        }
    }
}
