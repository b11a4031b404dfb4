//! Listener session
//!
//! `SyncSession` owns every sync component and is the only thing that mutates
//! them. It is a plain state machine: the driver feeds it transport messages,
//! timer ticks, media events and user commands one at a time, then drains the
//! outbound messages it queued.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clock::{ClockSyncEngine, CorrectedPosition};
use crate::config::SyncConfig;
use crate::drift::{Action, DriftCorrector, LagGrade, LagStatistics};
use crate::error::SyncError;
use crate::media::{MediaBackend, MediaEvent};
use crate::protocol::{ClientMessage, ServerMessage, Track, TrackUpdate, VoteCounts};
use crate::reconnect::{ConnectionState, ReconnectionManager};
use crate::transition::{PlaybackSignal, TrackTransitionManager, Transition};
use crate::votes::{VoteQuorumTracker, VoteState};

/// Lag measurement handed to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LagReport {
    pub lag_ms: u64,
    pub grade: LagGrade,
    pub one_way_delay_ms: u64,
    /// None until the warm-up window has passed
    pub stats: Option<LagStatistics>,
}

/// UI-facing notifications
pub trait SessionObserver: Send + Sync {
    fn on_connection_state(&self, state: ConnectionState);
    fn on_track_changed(&self, track: &Track);
    /// Progress tick for the current track
    fn on_progress(&self, elapsed_ms: u64, length_ms: u64);
    fn on_lag(&self, report: LagReport);
    fn on_vote_state(&self, state: VoteState, required_quorum: u32);
    /// Automatic correction was switched off; the user should resync
    fn on_sync_degraded(&self);
    /// Playback needs a user gesture, see [`SyncSession::resume`]
    fn on_playback_blocked(&self);
    fn on_playback_resumed(&self);
    fn on_admin(&self, _payload: &serde_json::Value) {}
    fn on_error(&self, _message: &str) {}
}

/// Components whose state only makes sense for one connection.
/// Rebuilt from scratch whenever the connection opens.
struct LinkState {
    clock: ClockSyncEngine,
    drift: DriftCorrector,
    votes: VoteQuorumTracker,
}

impl LinkState {
    fn new(config: &SyncConfig) -> Self {
        Self {
            clock: ClockSyncEngine::new(),
            drift: DriftCorrector::new(config.drift()),
            votes: VoteQuorumTracker::new(),
        }
    }
}

/// Orchestrates one listener
pub struct SyncSession<B: MediaBackend> {
    observer: Arc<dyn SessionObserver>,
    config: SyncConfig,
    link: LinkState,
    transitions: TrackTransitionManager<B>,
    reconnect: ReconnectionManager,
    outbox: Vec<ClientMessage>,
    progress_restart: bool,
}

impl<B: MediaBackend> SyncSession<B> {
    pub fn new(config: SyncConfig, backend: B, observer: Arc<dyn SessionObserver>) -> Self {
        let transitions = TrackTransitionManager::new(
            backend,
            config.audio_base_url(),
            config.initial_volume_percent,
        );
        Self {
            observer,
            link: LinkState::new(&config),
            transitions,
            reconnect: ReconnectionManager::new(config.reconnect.clone()),
            outbox: Vec::new(),
            progress_restart: false,
            config,
        }
    }

    pub fn on_connecting(&mut self) {
        if self.reconnect.on_connecting() {
            self.observer.on_connection_state(ConnectionState::Connecting);
        }
    }

    /// The transport is up: start over with fresh sync state and ask where the station is
    pub fn on_open(&mut self, now: Instant) {
        if !self.reconnect.on_open() {
            return;
        }
        info!("Connected to {}", self.config.server_url);
        self.link = LinkState::new(&self.config);
        self.observer.on_connection_state(ConnectionState::Open);
        self.request_position(now);
    }

    /// The transport is gone. Returns the delay before reconnecting.
    pub fn on_closed(&mut self) -> Option<Duration> {
        let delay = self.reconnect.on_closed()?;
        // Queries for the dead connection will never be answered
        self.outbox.clear();
        self.observer.on_connection_state(ConnectionState::Closed);
        Some(delay)
    }

    pub fn handle_message(&mut self, message: ServerMessage, now: Instant) {
        match message {
            ServerMessage::Position(reply) => {
                if let Some(position) = self.link.clock.on_position_reply(&reply, now) {
                    self.apply_correction(position);
                }
            }
            ServerMessage::Update(update) => self.handle_update(update, now),
            ServerMessage::Heartbeat(heartbeat) => {
                let position = self.link.clock.on_pushed_position(heartbeat.elapsed_ms, now);
                self.apply_correction(position);
                self.apply_votes(heartbeat.votes());
            }
            ServerMessage::Admin(payload) => self.observer.on_admin(&payload),
            ServerMessage::Issue(issue) => {
                warn!("Station reported an issue: {}", issue);
                self.observer.on_error(&issue);
            }
        }
    }

    /// Queue a position query. Does nothing while disconnected.
    pub fn request_position(&mut self, now: Instant) {
        if !self.reconnect.is_open() {
            return;
        }
        let query = self.link.clock.request_position(now);
        self.outbox.push(ClientMessage::Position(query));
    }

    pub fn on_media_event(&mut self, event: MediaEvent, now: Instant) {
        match self.transitions.on_media_event(event, now) {
            Some(PlaybackSignal::Started) => debug!("Playback started"),
            Some(PlaybackSignal::Blocked) => self.observer.on_playback_blocked(),
            Some(PlaybackSignal::Unblocked) => {
                self.observer.on_playback_resumed();
                // We have no idea how far behind we are now
                self.link.drift.request_resync();
                self.request_position(now);
            }
            None => {}
        }
    }

    /// Progress timer tick
    pub fn refresh_progress(&self) {
        if let Some(track) = self.transitions.current_track() {
            let elapsed_ms = self.transitions.current_position_ms().min(track.length_ms);
            self.observer.on_progress(elapsed_ms, track.length_ms);
        }
    }

    pub fn cast_vote(&mut self) -> Result<(), SyncError> {
        self.ensure_open()?;
        let message = self.link.votes.cast_vote();
        self.outbox.push(message);
        self.notify_votes();
        Ok(())
    }

    pub fn cast_downvote(&mut self) -> Result<(), SyncError> {
        self.ensure_open()?;
        let messages = self.link.votes.cast_downvote();
        self.outbox.extend(messages);
        self.notify_votes();
        Ok(())
    }

    /// User-requested resync: re-enables automatic correction and seeks on the next reply
    pub fn resync(&mut self, now: Instant) {
        info!("Resync requested");
        self.link.drift.request_resync();
        self.request_position(now);
    }

    /// Retry playback after the user interacted with the page/app
    pub fn resume(&mut self, now: Instant) {
        self.transitions.resume(now);
    }

    pub fn set_volume(&mut self, percent: u8) {
        self.transitions.set_volume_percent(percent);
    }

    /// Forward an admin payload to the station untouched
    pub fn send_admin(&mut self, payload: serde_json::Value) -> Result<(), SyncError> {
        self.ensure_open()?;
        self.outbox.push(ClientMessage::Admin(payload));
        Ok(())
    }

    /// Take the messages queued for the station
    pub fn drain_outbound(&mut self) -> Vec<ClientMessage> {
        std::mem::take(&mut self.outbox)
    }

    /// Check (and clear) whether the progress timer must restart for a new track
    pub fn take_progress_restart(&mut self) -> bool {
        std::mem::take(&mut self.progress_restart)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.reconnect.state()
    }

    pub fn is_connected(&self) -> bool {
        self.reconnect.is_open()
    }

    pub fn vote_state(&self) -> VoteState {
        self.link.votes.state()
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.transitions.current_track()
    }

    pub fn is_degraded(&self) -> bool {
        self.link.drift.is_degraded()
    }

    pub fn lag_statistics(&self) -> &LagStatistics {
        self.link.drift.statistics()
    }

    pub fn transitions(&self) -> &TrackTransitionManager<B> {
        &self.transitions
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn handle_update(&mut self, update: TrackUpdate, now: Instant) {
        let track = update.track();
        let is_new = self.transitions.is_new_track(&track.path);
        if is_new {
            self.link.clock.forget_track();
        }

        match update.elapsed_ms {
            // Re-announcement of the track already playing, nothing to correct
            None if !is_new => debug!("Track {} re-announced without a position", track.path),
            elapsed => {
                // A new track without a position has just started; the query below refines it
                let position = self.link.clock.on_pushed_position(elapsed.unwrap_or(0), now);
                match self.transitions.on_track_announced(track.clone(), position, now) {
                    Transition::Refresh => self.apply_correction(position),
                    Transition::SeamlessSwap | Transition::HardLoad => {
                        self.observer.on_track_changed(&track);
                        self.progress_restart = true;
                        self.request_position(now);
                    }
                }
            }
        }

        if let Some(next_path) = &update.next_path {
            self.transitions.on_next_hint(next_path);
        }
        if let Some(votes) = update.votes() {
            self.apply_votes(votes);
        }
    }

    fn apply_correction(&mut self, position: CorrectedPosition) {
        if self.transitions.retarget_pending_start(position) {
            return;
        }
        if self.transitions.current_track().is_none() {
            debug!("No track loaded yet, ignoring position {}ms", position.corrected_elapsed_ms);
            return;
        }

        let paused = self.transitions.current_is_paused();
        let local_ms = self.transitions.current_position_ms();
        let correction = self.link.drift.evaluate(&position, local_ms, paused);

        if let Action::HardSeek(target_ms) = correction.action {
            self.transitions.seek_current(target_ms);
        }
        if correction.newly_degraded {
            self.observer.on_sync_degraded();
        }
        if !paused {
            let stats = self.link.drift.statistics();
            self.observer.on_lag(LagReport {
                lag_ms: correction.sample.lag_ms,
                grade: correction.grade,
                one_way_delay_ms: correction.sample.one_way_delay_ms,
                stats: (!stats.is_empty()).then_some(*stats),
            });
        }
    }

    fn apply_votes(&mut self, counts: VoteCounts) {
        if self.link.votes.on_server_update(counts) {
            self.notify_votes();
        }
    }

    fn notify_votes(&self) {
        let state = self.link.votes.state();
        self.observer.on_vote_state(state, state.required_quorum());
    }

    fn ensure_open(&self) -> Result<(), SyncError> {
        if self.reconnect.is_open() {
            Ok(())
        } else {
            Err(SyncError::NotConnected)
        }
    }
}

/// Render milliseconds as `MM:SS`
pub fn format_clock(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
