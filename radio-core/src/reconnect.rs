//! Connection lifecycle and reconnect scheduling
//!
//! `Connecting -> Open -> Closed -> (delay) -> Connecting`, retried forever.
//! The default is a flat delay between attempts; exponential backoff is
//! available but never gives up either.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::SyncError;

/// Delay between reconnect attempts by default
const DEFAULT_RECONNECT_DELAY_MS: u64 = 5000;

/// Cap on the backoff exponent so the shift cannot overflow
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// State of the link to the station
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// How long to wait before the next connection attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// Same delay every time
    Fixed { delay_ms: u64 },
    /// `base * 2^(attempt-1)` capped at `max`, with up to 10% jitter
    Exponential { base_ms: u64, max_ms: u64 },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed {
            delay_ms: DEFAULT_RECONNECT_DELAY_MS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            ReconnectPolicy::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            ReconnectPolicy::Exponential { base_ms, max_ms } => {
                let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
                let delay_ms = base_ms.saturating_mul(1u64 << exponent).min(max_ms);
                let jitter_ms = rand::thread_rng().gen_range(0..=delay_ms / 10);
                Duration::from_millis(delay_ms.saturating_sub(jitter_ms))
            }
        }
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        match *self {
            ReconnectPolicy::Fixed { .. } => Ok(()),
            ReconnectPolicy::Exponential { base_ms, max_ms } if base_ms == 0 || max_ms < base_ms => {
                Err(SyncError::Config(format!(
                    "exponential reconnect needs 0 < base_ms <= max_ms (got {} / {})",
                    base_ms, max_ms
                )))
            }
            ReconnectPolicy::Exponential { .. } => Ok(()),
        }
    }
}

/// Tracks the connection state and schedules reconnects
#[derive(Debug)]
pub struct ReconnectionManager {
    state: ConnectionState,
    reconnect_attempt: u32,
    policy: ReconnectPolicy,
}

impl ReconnectionManager {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Closed,
            reconnect_attempt: 0,
            policy,
        }
    }

    /// A connection attempt is starting. Returns false if one already is.
    pub fn on_connecting(&mut self) -> bool {
        if self.state == ConnectionState::Connecting {
            return false;
        }
        self.state = ConnectionState::Connecting;
        debug!("Connecting (attempt {})", self.reconnect_attempt + 1);
        true
    }

    /// The transport is up. Returns false if it already was.
    pub fn on_open(&mut self) -> bool {
        if self.state == ConnectionState::Open {
            return false;
        }
        if self.reconnect_attempt > 0 {
            info!("Reconnected after {} attempt(s)", self.reconnect_attempt);
        }
        self.state = ConnectionState::Open;
        self.reconnect_attempt = 0;
        true
    }

    /// The transport is gone. Returns the delay before the next attempt,
    /// or `None` if we were already closed.
    pub fn on_closed(&mut self) -> Option<Duration> {
        if self.state == ConnectionState::Closed {
            return None;
        }
        self.state = ConnectionState::Closed;
        self.reconnect_attempt = self.reconnect_attempt.saturating_add(1);
        let delay = self.policy.delay_for(self.reconnect_attempt);
        info!(
            "Connection lost, reconnecting in {:?} (attempt {})",
            delay, self.reconnect_attempt
        );
        Some(delay)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect_attempt
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }
}
