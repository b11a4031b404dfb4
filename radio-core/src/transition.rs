//! Track transitions
//!
//! Two media handles are alive at any time: `current`, routed to the output,
//! and `next`, which silently buffers the track the station says comes next.
//! When the station advances to the preloaded track the handles are swapped
//! instead of reloading, so natural track boundaries do not stall.

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clock::CorrectedPosition;
use crate::media::{HandleId, MediaBackend, MediaEvent, MediaHandle};
use crate::protocol::Track;

/// How an announcement was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Same track as before, only the position is new
    Refresh,
    /// The preloaded handle took over
    SeamlessSwap,
    /// The track had to be loaded from scratch
    HardLoad,
}

/// Playback state changes the session has to act on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackSignal {
    Started,
    /// The platform needs a user gesture before playback can start
    Blocked,
    /// Playback started after having been blocked
    Unblocked,
}

/// Map a 0-100 volume percentage to output gain on a perceptual curve
pub fn perceptual_gain(percent: u8) -> f32 {
    let p = percent.min(100) as f32 / 100.0;
    (101f32.powf(p) - 1.0) / 100.0
}

struct Slot<H> {
    handle: H,
    path: Option<String>,
    ready: bool,
}

impl<H: MediaHandle> Slot<H> {
    fn empty(handle: H) -> Self {
        Self {
            handle,
            path: None,
            ready: false,
        }
    }

    fn load(&mut self, path: &str, url: &str) {
        self.path = Some(path.to_string());
        self.ready = false;
        self.handle.load(url);
    }
}

/// Owns the current and preloading media handles
pub struct TrackTransitionManager<B: MediaBackend> {
    backend: B,
    last_handle_id: HandleId,
    current: Slot<B::Handle>,
    next: Slot<B::Handle>,
    current_track: Option<Track>,
    audio_base_url: String,
    volume_percent: u8,
    /// Where to start once the current handle can play
    pending_start: Option<CorrectedPosition>,
    blocked: bool,
}

impl<B: MediaBackend> TrackTransitionManager<B> {
    pub fn new(mut backend: B, audio_base_url: impl Into<String>, volume_percent: u8) -> Self {
        let gain = perceptual_gain(volume_percent);

        let mut current = backend.create_handle(1);
        current.set_volume(gain);
        current.connect_output();

        let mut next = backend.create_handle(2);
        next.set_volume(gain);
        next.disconnect_output();

        Self {
            backend,
            last_handle_id: 2,
            current: Slot::empty(current),
            next: Slot::empty(next),
            current_track: None,
            audio_base_url: audio_base_url.into().trim_end_matches('/').to_string(),
            volume_percent: volume_percent.min(100),
            pending_start: None,
            blocked: false,
        }
    }

    /// Start buffering the track the station announced as next.
    /// Returns false when that track is already current or already preloading.
    pub fn on_next_hint(&mut self, path: &str) -> bool {
        let is_current = self.current_track.as_ref().is_some_and(|t| t.is_at(path));
        if is_current || self.next.path.as_deref() == Some(path) {
            return false;
        }
        let url = self.url_for(path);
        debug!("Preloading next track {} into handle {}", path, self.next.handle.id());
        self.next.load(path, &url);
        true
    }

    /// Apply a "now playing" announcement. `start` is the station's position
    /// for the announced track; playback (re)starts there after a swap or load.
    pub fn on_track_announced(&mut self, track: Track, start: CorrectedPosition, now: Instant) -> Transition {
        if self.current_track.as_ref() == Some(&track) {
            return Transition::Refresh;
        }

        let transition = if self.next.path.as_deref() == Some(track.path.as_str()) {
            self.swap_to_next();
            info!("Seamless swap to {} ({})", track.title, track.path);
            Transition::SeamlessSwap
        } else {
            let url = self.url_for(&track.path);
            self.current.handle.pause();
            self.current.load(&track.path, &url);
            info!("Hard load of {} ({})", track.title, track.path);
            Transition::HardLoad
        };

        self.current_track = Some(track);
        self.pending_start = Some(start);
        if self.current.ready {
            self.start_current(now);
        }
        transition
    }

    /// Route a media event. Events for handles we no longer own are dropped.
    pub fn on_media_event(&mut self, event: MediaEvent, now: Instant) -> Option<PlaybackSignal> {
        let id = event.handle();
        if id == self.next.handle.id() {
            if let MediaEvent::Ready(_) = event {
                debug!("Next track buffered (handle {})", id);
                self.next.ready = true;
            }
            return None;
        }
        if id != self.current.handle.id() {
            debug!("Ignoring {:?} for released handle", event);
            return None;
        }

        match event {
            MediaEvent::Ready(_) => {
                self.current.ready = true;
                if self.pending_start.is_some() {
                    self.start_current(now);
                }
                None
            }
            MediaEvent::Started(_) => {
                self.pending_start = None;
                if std::mem::take(&mut self.blocked) {
                    info!("Playback unblocked");
                    Some(PlaybackSignal::Unblocked)
                } else {
                    Some(PlaybackSignal::Started)
                }
            }
            MediaEvent::Blocked(_) => {
                if self.blocked {
                    return None;
                }
                warn!("Playback blocked by autoplay policy, waiting for user");
                self.blocked = true;
                Some(PlaybackSignal::Blocked)
            }
        }
    }

    /// Move the pending start to a fresher position. Returns false when no
    /// start is pending (playback is running and drift correction applies).
    pub fn retarget_pending_start(&mut self, position: CorrectedPosition) -> bool {
        if self.pending_start.is_none() {
            return false;
        }
        self.pending_start = Some(position);
        true
    }

    /// Retry playback after a user gesture
    pub fn resume(&mut self, now: Instant) {
        if self.pending_start.is_some() && self.current.ready {
            self.start_current(now);
        } else {
            self.current.handle.play();
        }
    }

    pub fn set_volume_percent(&mut self, percent: u8) {
        self.volume_percent = percent.min(100);
        let gain = perceptual_gain(self.volume_percent);
        self.current.handle.set_volume(gain);
        self.next.handle.set_volume(gain);
    }

    pub fn volume_percent(&self) -> u8 {
        self.volume_percent
    }

    pub fn seek_current(&mut self, position_ms: u64) {
        self.current.handle.seek(position_ms);
    }

    pub fn current_position_ms(&self) -> u64 {
        self.current.handle.position_ms()
    }

    pub fn current_is_paused(&self) -> bool {
        self.current.handle.is_paused()
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.current_track.as_ref()
    }

    /// Path of the track buffering in the next handle
    pub fn next_path(&self) -> Option<&str> {
        self.next.path.as_deref()
    }

    /// Check whether `path` differs from the track now playing
    pub fn is_new_track(&self, path: &str) -> bool {
        !self.current_track.as_ref().is_some_and(|t| t.is_at(path))
    }

    pub fn has_pending_start(&self) -> bool {
        self.pending_start.is_some()
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn current_handle_id(&self) -> HandleId {
        self.current.handle.id()
    }

    pub fn next_handle_id(&self) -> HandleId {
        self.next.handle.id()
    }

    fn swap_to_next(&mut self) {
        let fresh = self.allocate_silent_handle();
        let promoted = std::mem::replace(&mut self.next, Slot::empty(fresh));
        let mut retired = std::mem::replace(&mut self.current, promoted);

        retired.handle.pause();
        retired.handle.disconnect_output();
        self.current.handle.set_volume(retired.handle.volume());
        self.current.handle.connect_output();
        debug!(
            "Handle {} retired, handle {} is now current",
            retired.handle.id(),
            self.current.handle.id()
        );
    }

    fn allocate_silent_handle(&mut self) -> B::Handle {
        self.last_handle_id += 1;
        let mut handle = self.backend.create_handle(self.last_handle_id);
        handle.set_volume(perceptual_gain(self.volume_percent));
        handle.disconnect_output();
        handle
    }

    fn start_current(&mut self, now: Instant) {
        let Some(start) = self.pending_start else {
            return;
        };
        let target = start.projected_ms(now);
        debug!("Starting handle {} at {}ms", self.current.handle.id(), target);
        self.current.handle.seek(target);
        if self.current.handle.is_paused() {
            self.current.handle.play();
        } else {
            self.pending_start = None;
        }
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.audio_base_url, path.trim_start_matches('/'))
    }
}
