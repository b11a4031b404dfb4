//! Media backend backed by the platform's `MediaPlayer` callback

use std::sync::Arc;

use crate::media::{HandleId, MediaBackend, MediaHandle};

use super::types::MediaPlayer;

pub(crate) struct ForeignBackend {
    player: Arc<dyn MediaPlayer>,
}

impl ForeignBackend {
    pub(crate) fn new(player: Arc<dyn MediaPlayer>) -> Self {
        Self { player }
    }
}

impl MediaBackend for ForeignBackend {
    type Handle = ForeignHandle;

    fn create_handle(&mut self, id: HandleId) -> ForeignHandle {
        self.player.create(id);
        ForeignHandle {
            id,
            player: Arc::clone(&self.player),
        }
    }
}

pub(crate) struct ForeignHandle {
    id: HandleId,
    player: Arc<dyn MediaPlayer>,
}

impl MediaHandle for ForeignHandle {
    fn id(&self) -> HandleId {
        self.id
    }

    fn load(&mut self, url: &str) {
        self.player.load(self.id, url.to_string());
    }

    fn play(&mut self) {
        self.player.play(self.id);
    }

    fn pause(&mut self) {
        self.player.pause(self.id);
    }

    fn is_paused(&self) -> bool {
        self.player.is_paused(self.id)
    }

    fn position_ms(&self) -> u64 {
        self.player.position_ms(self.id)
    }

    fn seek(&mut self, position_ms: u64) {
        self.player.seek(self.id, position_ms);
    }

    fn volume(&self) -> f32 {
        self.player.volume(self.id)
    }

    fn set_volume(&mut self, volume: f32) {
        self.player.set_volume(self.id, volume);
    }

    fn connect_output(&mut self) {
        self.player.set_output_connected(self.id, true);
    }

    fn disconnect_output(&mut self) {
        self.player.set_output_connected(self.id, false);
    }
}

impl Drop for ForeignHandle {
    fn drop(&mut self) {
        self.player.release(self.id);
    }
}
