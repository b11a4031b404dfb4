//! FFI types exposed via uniffi

use crate::drift::LagGrade;
use crate::error::SyncError;
use crate::protocol::Track;
use crate::reconnect::ConnectionState;
use crate::session::LagReport;
use crate::votes::VoteState;

/// Error types exposed via FFI
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum CoreError {
    #[error("Not connected to a station")]
    NotConnected,

    #[error("Already connected to a station")]
    AlreadyConnected,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<SyncError> for CoreError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::NotConnected => CoreError::NotConnected,
            SyncError::Config(msg) => CoreError::InvalidConfig(msg),
            other => CoreError::Transport(other.to_string()),
        }
    }
}

/// Track information exposed via FFI
#[derive(Debug, Clone, uniffi::Record)]
pub struct TrackInfo {
    pub path: String,
    pub title: String,
    pub length_ms: u64,
}

impl From<&Track> for TrackInfo {
    fn from(t: &Track) -> Self {
        Self {
            path: t.path.clone(),
            title: t.title.clone(),
            length_ms: t.length_ms,
        }
    }
}

/// Connection status exposed via FFI
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Closed,
}

impl From<ConnectionState> for ConnectionStatus {
    fn from(s: ConnectionState) -> Self {
        match s {
            ConnectionState::Connecting => ConnectionStatus::Connecting,
            ConnectionState::Open => ConnectionStatus::Open,
            ConnectionState::Closed => ConnectionStatus::Closed,
        }
    }
}

/// Lag quality for colouring the lag display
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum LagLevel {
    Good,
    Fair,
    Poor,
}

impl From<LagGrade> for LagLevel {
    fn from(g: LagGrade) -> Self {
        match g {
            LagGrade::Good => LagLevel::Good,
            LagGrade::Fair => LagLevel::Fair,
            LagGrade::Poor => LagLevel::Poor,
        }
    }
}

/// Lag measurement for the debug display
#[derive(Debug, Clone, uniffi::Record)]
pub struct LagInfo {
    pub lag_ms: u64,
    pub level: LagLevel,
    /// Estimated one-way network delay to the station
    pub one_way_delay_ms: u64,
    /// Rolling statistics, absent during warm-up
    pub average_ms: Option<u64>,
    pub min_ms: Option<u64>,
    pub max_ms: Option<u64>,
    pub samples: u64,
}

impl From<LagReport> for LagInfo {
    fn from(r: LagReport) -> Self {
        let stats = r.stats.unwrap_or_default();
        let recorded = |v: u64| (!stats.is_empty()).then_some(v);
        Self {
            lag_ms: r.lag_ms,
            level: r.grade.into(),
            one_way_delay_ms: r.one_way_delay_ms,
            average_ms: stats.average_ms(),
            min_ms: recorded(stats.min),
            max_ms: recorded(stats.max),
            samples: stats.count,
        }
    }
}

/// Vote state exposed via FFI
#[derive(Debug, Clone, uniffi::Record)]
pub struct VoteInfo {
    pub user_count: u32,
    pub vote_count: u32,
    pub vote_ratio_percent: u8,
    pub self_voted: bool,
    pub required_quorum: u32,
}

impl VoteInfo {
    pub fn new(state: VoteState, required_quorum: u32) -> Self {
        Self {
            user_count: state.user_count,
            vote_count: state.vote_count,
            vote_ratio_percent: state.vote_ratio_percent,
            self_voted: state.self_voted,
            required_quorum,
        }
    }
}

/// Callback interface for session events
#[uniffi::export(callback_interface)]
pub trait SessionCallback: Send + Sync {
    fn on_connection_changed(&self, status: ConnectionStatus);
    fn on_track_changed(&self, track: TrackInfo);
    /// Called every progress tick (100ms by default)
    fn on_progress(&self, elapsed_ms: u64, length_ms: u64);
    fn on_lag(&self, lag: LagInfo);
    fn on_votes_changed(&self, votes: VoteInfo);
    /// Automatic correction gave up; offer the user a resync button
    fn on_sync_degraded(&self);
    /// Playback needs a user gesture; call `resume_playback` from one
    fn on_playback_blocked(&self);
    fn on_playback_resumed(&self);
    /// Admin payload from the station, as JSON text
    fn on_admin(&self, payload_json: String);
    fn on_error(&self, message: String);
}

/// Platform audio player, driven by handle id.
///
/// Readiness and autoplay outcomes are reported back through
/// `RadioSession::notify_media_ready`, `notify_playback_started` and
/// `notify_playback_blocked`.
#[uniffi::export(callback_interface)]
pub trait MediaPlayer: Send + Sync {
    fn create(&self, handle_id: u64);
    fn load(&self, handle_id: u64, url: String);
    fn play(&self, handle_id: u64);
    fn pause(&self, handle_id: u64);
    fn is_paused(&self, handle_id: u64) -> bool;
    fn position_ms(&self, handle_id: u64) -> u64;
    fn seek(&self, handle_id: u64, position_ms: u64);
    fn volume(&self, handle_id: u64) -> f32;
    fn set_volume(&self, handle_id: u64, volume: f32);
    fn set_output_connected(&self, handle_id: u64, connected: bool);
    /// The handle will not be used again
    fn release(&self, handle_id: u64);
}
