//! Media playback primitives
//!
//! The sync core never decodes audio itself. It drives players through the
//! [`MediaHandle`] trait and learns about readiness and autoplay outcomes from
//! [`MediaEvent`]s the platform feeds back in.
//!
//! [`VirtualBackend`] is an in-process player with a virtual playhead, used by
//! the headless listener and the tests.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

/// Identifies a media handle across the FFI boundary
pub type HandleId = u64;

/// Asynchronous notifications from the platform player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaEvent {
    /// Enough data is buffered to start playback
    Ready(HandleId),
    /// Playback actually started
    Started(HandleId),
    /// The platform refused to start playback without a user gesture
    Blocked(HandleId),
}

impl MediaEvent {
    pub fn handle(&self) -> HandleId {
        match *self {
            MediaEvent::Ready(id) | MediaEvent::Started(id) | MediaEvent::Blocked(id) => id,
        }
    }
}

/// One platform player instance
pub trait MediaHandle: Send {
    fn id(&self) -> HandleId;
    /// Start fetching `url`. Readiness is reported later as [`MediaEvent::Ready`].
    fn load(&mut self, url: &str);
    /// Request playback. The outcome is reported as Started or Blocked.
    fn play(&mut self);
    fn pause(&mut self);
    fn is_paused(&self) -> bool;
    fn position_ms(&self) -> u64;
    fn seek(&mut self, position_ms: u64);
    /// Gain in `0.0..=1.0`
    fn volume(&self) -> f32;
    fn set_volume(&mut self, volume: f32);
    /// Route this handle to the audio output
    fn connect_output(&mut self);
    fn disconnect_output(&mut self);
}

/// Creates media handles
pub trait MediaBackend: Send {
    type Handle: MediaHandle;

    fn create_handle(&mut self, id: HandleId) -> Self::Handle;
}

/// Observable state of one virtual handle
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualHandleState {
    pub source: Option<String>,
    pub paused: bool,
    pub output_connected: bool,
    pub volume: f32,
    pub released: bool,
    /// Playhead at `anchor_at` (or the frozen playhead while paused)
    anchor_ms: u64,
    anchor_at: Option<Instant>,
}

impl VirtualHandleState {
    fn new() -> Self {
        Self {
            source: None,
            paused: true,
            output_connected: true,
            volume: 1.0,
            released: false,
            anchor_ms: 0,
            anchor_at: None,
        }
    }

    pub fn position_ms(&self) -> u64 {
        match self.anchor_at {
            Some(at) if !self.paused => self.anchor_ms + at.elapsed().as_millis() as u64,
            _ => self.anchor_ms,
        }
    }
}

#[derive(Debug)]
struct VirtualInner {
    handles: HashMap<HandleId, VirtualHandleState>,
    autoplay_allowed: bool,
    events: Option<mpsc::UnboundedSender<MediaEvent>>,
}

impl VirtualInner {
    fn emit(&self, event: MediaEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

/// In-process media backend with virtual playheads
#[derive(Debug, Clone)]
pub struct VirtualBackend {
    inner: Arc<Mutex<VirtualInner>>,
}

impl VirtualBackend {
    /// Create a backend reporting its events on `events`
    pub fn new(events: mpsc::UnboundedSender<MediaEvent>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VirtualInner {
                handles: HashMap::new(),
                autoplay_allowed: true,
                events: Some(events),
            })),
        }
    }

    /// A backend nobody listens to
    pub fn detached() -> Self {
        Self {
            inner: Arc::new(Mutex::new(VirtualInner {
                handles: HashMap::new(),
                autoplay_allowed: true,
                events: None,
            })),
        }
    }

    /// Simulate the platform's autoplay policy
    pub fn set_autoplay_allowed(&self, allowed: bool) {
        self.inner.lock().autoplay_allowed = allowed;
    }

    pub fn state(&self, id: HandleId) -> Option<VirtualHandleState> {
        self.inner.lock().handles.get(&id).cloned()
    }

    /// Handles that are not released, sorted by id
    pub fn live_handles(&self) -> Vec<HandleId> {
        let inner = self.inner.lock();
        let mut ids: Vec<_> = inner
            .handles
            .iter()
            .filter(|(_, s)| !s.released)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

impl MediaBackend for VirtualBackend {
    type Handle = VirtualHandle;

    fn create_handle(&mut self, id: HandleId) -> VirtualHandle {
        let mut inner = self.inner.lock();
        // Released handles stay inspectable until the next allocation
        inner.handles.retain(|_, s| !s.released);
        inner.handles.insert(id, VirtualHandleState::new());
        drop(inner);
        VirtualHandle {
            id,
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Handle into a [`VirtualBackend`]
#[derive(Debug)]
pub struct VirtualHandle {
    id: HandleId,
    inner: Arc<Mutex<VirtualInner>>,
}

impl VirtualHandle {
    fn with_state<R>(&self, f: impl FnOnce(&mut VirtualHandleState) -> R) -> Option<R> {
        self.inner.lock().handles.get_mut(&self.id).map(f)
    }
}

impl MediaHandle for VirtualHandle {
    fn id(&self) -> HandleId {
        self.id
    }

    fn load(&mut self, url: &str) {
        self.with_state(|s| {
            s.source = Some(url.to_string());
            s.paused = true;
            s.anchor_ms = 0;
            s.anchor_at = None;
        });
        debug!("Virtual handle {} loading {}", self.id, url);
        self.inner.lock().emit(MediaEvent::Ready(self.id));
    }

    fn play(&mut self) {
        let mut inner = self.inner.lock();
        let allowed = inner.autoplay_allowed;
        if let Some(s) = inner.handles.get_mut(&self.id) {
            if allowed && s.paused {
                s.paused = false;
                s.anchor_at = Some(Instant::now());
            }
        }
        inner.emit(if allowed {
            MediaEvent::Started(self.id)
        } else {
            MediaEvent::Blocked(self.id)
        });
    }

    fn pause(&mut self) {
        self.with_state(|s| {
            s.anchor_ms = s.position_ms();
            s.anchor_at = None;
            s.paused = true;
        });
    }

    fn is_paused(&self) -> bool {
        self.with_state(|s| s.paused).unwrap_or(true)
    }

    fn position_ms(&self) -> u64 {
        self.with_state(|s| s.position_ms()).unwrap_or(0)
    }

    fn seek(&mut self, position_ms: u64) {
        self.with_state(|s| {
            s.anchor_ms = position_ms;
            if !s.paused {
                s.anchor_at = Some(Instant::now());
            }
        });
    }

    fn volume(&self) -> f32 {
        self.with_state(|s| s.volume).unwrap_or(0.0)
    }

    fn set_volume(&mut self, volume: f32) {
        self.with_state(|s| s.volume = volume.clamp(0.0, 1.0));
    }

    fn connect_output(&mut self) {
        self.with_state(|s| s.output_connected = true);
    }

    fn disconnect_output(&mut self) {
        self.with_state(|s| s.output_connected = false);
    }
}

impl Drop for VirtualHandle {
    fn drop(&mut self) {
        self.with_state(|s| {
            s.released = true;
            s.paused = true;
            s.output_connected = false;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_virtual_playhead_advances_only_while_playing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut backend = VirtualBackend::new(tx);
        let mut handle = backend.create_handle(1);

        handle.load("http://station/audio/a.mp3");
        assert_eq!(rx.try_recv().unwrap(), MediaEvent::Ready(1));

        handle.seek(10_000);
        handle.play();
        assert_eq!(rx.try_recv().unwrap(), MediaEvent::Started(1));
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(handle.position_ms(), 10_500);

        handle.pause();
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(handle.position_ms(), 10_500);
        assert!(handle.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_autoplay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut backend = VirtualBackend::new(tx);
        backend.set_autoplay_allowed(false);
        let mut handle = backend.create_handle(7);

        handle.play();
        assert_eq!(rx.try_recv().unwrap(), MediaEvent::Blocked(7));
        assert!(handle.is_paused());

        backend.set_autoplay_allowed(true);
        handle.play();
        assert_eq!(rx.try_recv().unwrap(), MediaEvent::Started(7));
        assert!(!handle.is_paused());
    }

    #[test]
    fn test_drop_releases_handle() {
        let mut backend = VirtualBackend::detached();
        let handle = backend.create_handle(3);
        let _other = backend.create_handle(4);
        assert_eq!(backend.live_handles(), vec![3, 4]);

        drop(handle);
        let state = backend.state(3).unwrap();
        assert!(state.released);
        assert!(!state.output_connected);
        assert_eq!(backend.live_handles(), vec![4]);

        // Pruned once the next handle is allocated
        let _next = backend.create_handle(5);
        assert!(backend.state(3).is_none());
        assert_eq!(backend.live_handles(), vec![4, 5]);
    }

    #[test]
    fn test_released_handles_do_not_accumulate() {
        let mut backend = VirtualBackend::detached();
        for id in 1..=100 {
            drop(backend.create_handle(id));
        }
        assert_eq!(backend.inner.lock().handles.len(), 1);
        assert!(backend.state(100).unwrap().released);
    }
}
