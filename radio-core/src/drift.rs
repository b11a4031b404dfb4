//! Drift correction for listener playback
//!
//! Compares the station's corrected position with the local playhead and
//! decides whether to leave playback alone or seek. Repeated forced seeks
//! mean something is wrong with the connection or the player, so after too
//! many in a row automatic correction switches itself off until a reconnect
//! or a user-requested resync.

use tracing::{debug, info, warn};

use crate::clock::CorrectedPosition;

/// Thresholds driving the corrector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriftConfig {
    /// Lag at or below this is left alone
    pub soft_threshold_ms: u64,
    /// Lag at or above this is graded "fair" instead of "good"
    pub lag_warn_ms: u64,
    /// Samples skipped before statistics start
    pub warmup_samples: u32,
    /// Consecutive forced corrections tolerated before degrading
    pub max_forced_corrections: u32,
}

/// What to do with the local playhead
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Within tolerance
    NoOp,
    /// Out of tolerance but automatic correction is disabled
    SoftNote(u64),
    /// Seek the local playhead to this position
    HardSeek(u64),
}

/// One comparison between station and local playhead
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSample {
    pub one_way_delay_ms: u64,
    pub corrected_elapsed_ms: u64,
    pub local_elapsed_ms: u64,
    pub lag_ms: u64,
}

impl SyncSample {
    pub fn new(position: &CorrectedPosition, local_elapsed_ms: u64) -> Self {
        Self {
            one_way_delay_ms: position.one_way_delay_ms,
            corrected_elapsed_ms: position.corrected_elapsed_ms,
            local_elapsed_ms,
            lag_ms: position.corrected_elapsed_ms.abs_diff(local_elapsed_ms),
        }
    }
}

/// Coarse lag quality for display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LagGrade {
    Good,
    Fair,
    Poor,
}

impl LagGrade {
    pub fn of(lag_ms: u64, config: &DriftConfig) -> Self {
        if lag_ms > config.soft_threshold_ms {
            LagGrade::Poor
        } else if lag_ms >= config.lag_warn_ms {
            LagGrade::Fair
        } else {
            LagGrade::Good
        }
    }
}

/// Rolling lag aggregate, excluding the warm-up window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LagStatistics {
    /// Samples offered, warm-up included
    seen: u32,
    pub count: u64,
    pub total: u64,
    pub min: u64,
    pub max: u64,
}

impl LagStatistics {
    /// Offer a sample; it is only recorded once the warm-up window has passed
    pub fn observe(&mut self, lag_ms: u64, warmup_samples: u32) {
        self.seen = self.seen.saturating_add(1);
        if self.seen <= warmup_samples {
            return;
        }
        if self.count == 0 {
            self.min = lag_ms;
            self.max = lag_ms;
        } else {
            self.min = self.min.min(lag_ms);
            self.max = self.max.max(lag_ms);
        }
        self.count += 1;
        self.total += lag_ms;
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn average_ms(&self) -> Option<u64> {
        (self.count > 0).then(|| self.total / self.count)
    }
}

/// Result of evaluating one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Correction {
    pub action: Action,
    pub sample: SyncSample,
    pub grade: LagGrade,
    /// Set only on the evaluation that switched automatic correction off
    pub newly_degraded: bool,
}

/// Decides between leaving playback alone and seeking
#[derive(Debug)]
pub struct DriftCorrector {
    config: DriftConfig,
    stats: LagStatistics,
    consecutive_forced_corrections: u32,
    force_next: bool,
    degraded: bool,
}

impl DriftCorrector {
    pub fn new(config: DriftConfig) -> Self {
        Self {
            config,
            stats: LagStatistics::default(),
            consecutive_forced_corrections: 0,
            force_next: false,
            degraded: false,
        }
    }

    /// Compare the station's position against the local playhead
    pub fn evaluate(&mut self, position: &CorrectedPosition, local_elapsed_ms: u64, media_is_paused: bool) -> Correction {
        let sample = SyncSample::new(position, local_elapsed_ms);
        let lag_ms = sample.lag_ms;
        let grade = LagGrade::of(lag_ms, &self.config);
        let forced = std::mem::take(&mut self.force_next);

        // Paused playback would skew the numbers
        if !media_is_paused {
            self.stats.observe(lag_ms, self.config.warmup_samples);
        }

        let correction = |action, newly_degraded| Correction {
            action,
            sample,
            grade,
            newly_degraded,
        };

        if !forced && lag_ms <= self.config.soft_threshold_ms {
            self.consecutive_forced_corrections = 0;
            return correction(Action::NoOp, false);
        }

        if self.degraded {
            debug!("Drift {}ms ignored, automatic correction is disabled", lag_ms);
            return correction(Action::SoftNote(lag_ms), false);
        }

        self.consecutive_forced_corrections += 1;
        let target = position.corrected_elapsed_ms;
        info!(
            "Drift {}ms (station: {}ms, local: {}ms, forced: {}), seeking (correction #{})",
            lag_ms, target, local_elapsed_ms, forced, self.consecutive_forced_corrections
        );

        let newly_degraded = self.consecutive_forced_corrections > self.config.max_forced_corrections;
        if newly_degraded {
            warn!(
                "Failed to sync {} times in a row, disabling automatic correction",
                self.consecutive_forced_corrections
            );
            self.degraded = true;
        }

        correction(Action::HardSeek(target), newly_degraded)
    }

    /// User asked for a resync (or playback was just unblocked): clear the
    /// degraded state and statistics, and force a seek on the next evaluation
    pub fn request_resync(&mut self) {
        self.stats = LagStatistics::default();
        self.consecutive_forced_corrections = 0;
        self.degraded = false;
        self.force_next = true;
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn consecutive_forced_corrections(&self) -> u32 {
        self.consecutive_forced_corrections
    }

    pub fn statistics(&self) -> &LagStatistics {
        &self.stats
    }

    pub fn config(&self) -> &DriftConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn config() -> DriftConfig {
        DriftConfig {
            soft_threshold_ms: 250,
            lag_warn_ms: 150,
            warmup_samples: 4,
            max_forced_corrections: 4,
        }
    }

    fn at(corrected_elapsed_ms: u64) -> CorrectedPosition {
        CorrectedPosition {
            one_way_delay_ms: 20,
            corrected_elapsed_ms,
            observed_at: Instant::now(),
        }
    }

    #[test]
    fn test_within_threshold_is_noop() {
        let mut corrector = DriftCorrector::new(config());

        for lag in [0u64, 1, 100, 249, 250] {
            let result = corrector.evaluate(&at(10_000 + lag), 10_000, false);
            assert_eq!(result.action, Action::NoOp, "lag {}", lag);
            assert_eq!(corrector.consecutive_forced_corrections(), 0);
        }
        // Local ahead of the station counts the same
        let result = corrector.evaluate(&at(10_000), 10_200, false);
        assert_eq!(result.action, Action::NoOp);
        assert_eq!(result.sample.lag_ms, 200);
    }

    #[test]
    fn test_above_threshold_seeks_to_corrected_position() {
        let mut corrector = DriftCorrector::new(config());

        let result = corrector.evaluate(&at(12_000), 10_000, false);
        assert_eq!(result.action, Action::HardSeek(12_000));
        assert_eq!(result.grade, LagGrade::Poor);
        assert_eq!(corrector.consecutive_forced_corrections(), 1);

        // A good sample resets the streak
        corrector.evaluate(&at(13_000), 13_010, false);
        assert_eq!(corrector.consecutive_forced_corrections(), 0);
    }

    #[test]
    fn test_escalation_degrades_once_after_fifth_seek() {
        let mut corrector = DriftCorrector::new(config());
        let mut degraded_signals = 0;

        for i in 0..5u64 {
            let result = corrector.evaluate(&at(20_000 + i * 1_000), 1_000, false);
            assert_eq!(result.action, Action::HardSeek(20_000 + i * 1_000));
            if result.newly_degraded {
                degraded_signals += 1;
                assert_eq!(i, 4, "degraded before the fifth seek");
            }
        }
        assert_eq!(degraded_signals, 1);
        assert!(corrector.is_degraded());

        // No more seeks, and no repeated signal
        for _ in 0..3 {
            let result = corrector.evaluate(&at(40_000), 1_000, false);
            assert_eq!(result.action, Action::SoftNote(39_000));
            assert!(!result.newly_degraded);
        }
    }

    #[test]
    fn test_degraded_survives_good_samples_until_resync() {
        let mut corrector = DriftCorrector::new(config());
        for _ in 0..5 {
            corrector.evaluate(&at(50_000), 0, false);
        }
        assert!(corrector.is_degraded());

        corrector.evaluate(&at(50_000), 50_000, false);
        assert!(corrector.is_degraded());
        assert_eq!(corrector.evaluate(&at(60_000), 0, false).action, Action::SoftNote(60_000));

        corrector.request_resync();
        assert!(!corrector.is_degraded());
        assert_eq!(corrector.evaluate(&at(60_000), 0, false).action, Action::HardSeek(60_000));
    }

    #[test]
    fn test_forced_resync_seeks_even_within_threshold() {
        let mut corrector = DriftCorrector::new(config());

        corrector.request_resync();
        let result = corrector.evaluate(&at(10_010), 10_000, false);
        assert_eq!(result.action, Action::HardSeek(10_010));
        assert_eq!(corrector.consecutive_forced_corrections(), 1);

        // The flag is consumed
        assert_eq!(corrector.evaluate(&at(10_010), 10_000, false).action, Action::NoOp);
    }

    #[test]
    fn test_statistics_skip_warmup_and_pauses() {
        let mut corrector = DriftCorrector::new(config());

        for lag in [900u64, 800, 700, 600] {
            corrector.evaluate(&at(10_000 + lag), 10_000, false);
        }
        assert!(corrector.statistics().is_empty());

        for lag in [30u64, 10, 50] {
            corrector.evaluate(&at(10_000 + lag), 10_000, false);
        }
        // Paused samples are not recorded but may still seek
        let paused = corrector.evaluate(&at(20_000), 10_000, true);
        assert_eq!(paused.action, Action::HardSeek(20_000));

        let stats = corrector.statistics();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.total, 90);
        assert_eq!(stats.min, 10);
        assert_eq!(stats.max, 50);
        assert_eq!(stats.average_ms(), Some(30));
    }

    #[test]
    fn test_lag_grades() {
        let config = config();
        assert_eq!(LagGrade::of(0, &config), LagGrade::Good);
        assert_eq!(LagGrade::of(149, &config), LagGrade::Good);
        assert_eq!(LagGrade::of(150, &config), LagGrade::Fair);
        assert_eq!(LagGrade::of(250, &config), LagGrade::Fair);
        assert_eq!(LagGrade::of(251, &config), LagGrade::Poor);
    }
}
