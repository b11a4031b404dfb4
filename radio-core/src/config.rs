//! Listener configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::drift::DriftConfig;
use crate::error::SyncError;
use crate::reconnect::ReconnectPolicy;

/// Default station endpoint
const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8000/stream";

/// Lag tolerated before a hard seek. Coarse position-query cycles want ~250ms,
/// tight heartbeat-driven cycles can go down to ~100ms.
const DEFAULT_SOFT_THRESHOLD_MS: u64 = 250;

/// Lag above this is reported as "fair" rather than "good"
const DEFAULT_LAG_WARN_MS: u64 = 150;

/// Samples skipped before lag statistics start (connection setup skews them)
const DEFAULT_WARMUP_SAMPLES: u32 = 4;

/// Forced corrections tolerated in a row before automatic correction gives up
const DEFAULT_MAX_FORCED_CORRECTIONS: u32 = 4;

const DEFAULT_POSITION_QUERY_INTERVAL_MS: u64 = 1000;
const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 100;
const DEFAULT_VOLUME_PERCENT: u8 = 75;

/// Sync core configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// WebSocket endpoint of the station (`ws://` or `wss://`)
    pub server_url: String,
    /// Base URL audio paths are resolved against. Derived from `server_url` when unset.
    pub audio_base_url: Option<String>,
    pub soft_threshold_ms: u64,
    pub lag_warn_ms: u64,
    pub warmup_samples: u32,
    pub max_forced_corrections: u32,
    pub position_query_interval_ms: u64,
    pub progress_interval_ms: u64,
    pub reconnect: ReconnectPolicy,
    /// Initial volume, 0-100
    pub initial_volume_percent: u8,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            audio_base_url: None,
            soft_threshold_ms: DEFAULT_SOFT_THRESHOLD_MS,
            lag_warn_ms: DEFAULT_LAG_WARN_MS,
            warmup_samples: DEFAULT_WARMUP_SAMPLES,
            max_forced_corrections: DEFAULT_MAX_FORCED_CORRECTIONS,
            position_query_interval_ms: DEFAULT_POSITION_QUERY_INTERVAL_MS,
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
            reconnect: ReconnectPolicy::default(),
            initial_volume_percent: DEFAULT_VOLUME_PERCENT,
        }
    }
}

impl SyncConfig {
    /// Default configuration pointed at a specific station
    pub fn with_server(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the session cannot run with
    pub fn validate(&self) -> Result<(), SyncError> {
        if !(self.server_url.starts_with("ws://") || self.server_url.starts_with("wss://")) {
            return Err(SyncError::Config(format!(
                "server_url must be a ws:// or wss:// URL, got {}",
                self.server_url
            )));
        }
        if self.position_query_interval_ms == 0 || self.progress_interval_ms == 0 {
            return Err(SyncError::Config("timer intervals must be non-zero".to_string()));
        }
        if self.initial_volume_percent > 100 {
            return Err(SyncError::Config(format!(
                "initial_volume_percent must be 0-100, got {}",
                self.initial_volume_percent
            )));
        }
        if self.lag_warn_ms > self.soft_threshold_ms {
            return Err(SyncError::Config(
                "lag_warn_ms must not exceed soft_threshold_ms".to_string(),
            ));
        }
        self.reconnect.validate()
    }

    /// Base URL for audio paths (`ws://host/stream` serves audio from `http://host/audio`)
    pub fn audio_base_url(&self) -> String {
        if let Some(base) = &self.audio_base_url {
            return base.trim_end_matches('/').to_string();
        }

        let (scheme, rest) = if let Some(rest) = self.server_url.strip_prefix("wss://") {
            ("https", rest)
        } else if let Some(rest) = self.server_url.strip_prefix("ws://") {
            ("http", rest)
        } else {
            ("http", self.server_url.as_str())
        };
        let authority = rest.split('/').next().unwrap_or(rest);
        format!("{}://{}/audio", scheme, authority)
    }

    pub fn position_query_interval(&self) -> Duration {
        Duration::from_millis(self.position_query_interval_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Thresholds for the drift corrector
    pub fn drift(&self) -> DriftConfig {
        DriftConfig {
            soft_threshold_ms: self.soft_threshold_ms,
            lag_warn_ms: self.lag_warn_ms,
            warmup_samples: self.warmup_samples,
            max_forced_corrections: self.max_forced_corrections,
        }
    }
}
