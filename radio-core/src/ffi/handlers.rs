//! Session observer forwarding to the foreign callback

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::protocol::Track;
use crate::reconnect::ConnectionState;
use crate::session::{LagReport, SessionObserver};
use crate::votes::VoteState;

use super::types::{ConnectionStatus, LagInfo, SessionCallback, TrackInfo, VoteInfo};

pub(crate) type SharedCallback = Arc<RwLock<Option<Arc<dyn SessionCallback>>>>;

/// Forwards session notifications to whatever callback is currently set
pub(crate) struct CallbackObserver {
    callback: SharedCallback,
    connected: Arc<AtomicBool>,
}

impl CallbackObserver {
    pub(crate) fn new(callback: SharedCallback, connected: Arc<AtomicBool>) -> Self {
        Self { callback, connected }
    }

    fn with_callback(&self, f: impl FnOnce(&dyn SessionCallback)) {
        // Clone out so the callback runs without the lock held
        let cb = self.callback.read().clone();
        match cb {
            Some(cb) => f(cb.as_ref()),
            None => debug!("No callback set, dropping session event"),
        }
    }
}

impl SessionObserver for CallbackObserver {
    fn on_connection_state(&self, state: ConnectionState) {
        self.connected.store(state == ConnectionState::Open, Ordering::SeqCst);
        self.with_callback(|cb| cb.on_connection_changed(ConnectionStatus::from(state)));
    }

    fn on_track_changed(&self, track: &Track) {
        self.with_callback(|cb| cb.on_track_changed(TrackInfo::from(track)));
    }

    fn on_progress(&self, elapsed_ms: u64, length_ms: u64) {
        self.with_callback(|cb| cb.on_progress(elapsed_ms, length_ms));
    }

    fn on_lag(&self, report: LagReport) {
        self.with_callback(|cb| cb.on_lag(LagInfo::from(report)));
    }

    fn on_vote_state(&self, state: VoteState, required_quorum: u32) {
        self.with_callback(|cb| cb.on_votes_changed(VoteInfo::new(state, required_quorum)));
    }

    fn on_sync_degraded(&self) {
        self.with_callback(|cb| cb.on_sync_degraded());
    }

    fn on_playback_blocked(&self) {
        self.with_callback(|cb| cb.on_playback_blocked());
    }

    fn on_playback_resumed(&self) {
        self.with_callback(|cb| cb.on_playback_resumed());
    }

    fn on_admin(&self, payload: &serde_json::Value) {
        self.with_callback(|cb| cb.on_admin(payload.to_string()));
    }

    fn on_error(&self, message: &str) {
        self.with_callback(|cb| cb.on_error(message.to_string()));
    }
}
