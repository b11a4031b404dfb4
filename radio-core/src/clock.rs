//! Clock synchronization against the station
//!
//! Measures round-trip time with position queries and turns the station's
//! elapsed position into a corrected "true" position, assuming the delay is
//! split evenly between the two directions.

use std::collections::VecDeque;

use tokio::time::Instant;
use tracing::debug;

use crate::protocol::{PositionQuery, PositionReply};

/// Number of RTT samples to keep for averaging
const RTT_SAMPLE_COUNT: usize = 5;

/// A snapshot of the station's position, taken when we received it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthoritativePosition {
    pub elapsed_ms: u64,
    pub observed_at: Instant,
}

/// Station position corrected for one-way network delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrectedPosition {
    pub one_way_delay_ms: u64,
    pub corrected_elapsed_ms: u64,
    pub observed_at: Instant,
}

impl CorrectedPosition {
    /// Where the station is at `now`, assuming it kept playing since we observed it
    pub fn projected_ms(&self, now: Instant) -> u64 {
        let since = now.saturating_duration_since(self.observed_at).as_millis() as u64;
        self.corrected_elapsed_ms + since
    }
}

/// The one query whose reply we are still willing to accept
#[derive(Debug, Clone, Copy)]
struct PendingQuery {
    seq: u64,
    sent_at: Instant,
}

/// Rolling RTT window
#[derive(Debug, Default)]
struct RttWindow {
    samples: VecDeque<u64>,
    avg_rtt_ms: u64,
}

impl RttWindow {
    fn add_sample(&mut self, rtt_ms: u64) {
        if self.samples.len() >= RTT_SAMPLE_COUNT {
            self.samples.pop_front();
        }
        self.samples.push_back(rtt_ms);
        let sum: u64 = self.samples.iter().sum();
        self.avg_rtt_ms = sum / self.samples.len() as u64;
    }

    /// Estimated one-way delay (RTT / 2), zero until something was measured
    fn one_way_delay_ms(&self) -> u64 {
        self.avg_rtt_ms / 2
    }
}

/// Estimates network delay and the station's true position
#[derive(Debug, Default)]
pub struct ClockSyncEngine {
    next_seq: u64,
    pending: Option<PendingQuery>,
    rtt: RttWindow,
    /// Latest accepted snapshot; query replies older than it are discarded
    latest_snapshot: Option<AuthoritativePosition>,
    latest: Option<CorrectedPosition>,
}

impl ClockSyncEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the send time of a new position query. Supersedes any query in flight.
    pub fn request_position(&mut self, now: Instant) -> PositionQuery {
        self.next_seq += 1;
        if let Some(old) = self.pending.replace(PendingQuery {
            seq: self.next_seq,
            sent_at: now,
        }) {
            debug!("Position query #{} superseded by #{}", old.seq, self.next_seq);
        }
        PositionQuery { seq: self.next_seq }
    }

    /// Handle a position reply received at `t_recv`.
    ///
    /// Only the most recently sent query may update state. Replies to older
    /// queries, replies with nothing pending and snapshots older than the one
    /// already applied are discarded without touching anything.
    pub fn on_position_reply(&mut self, reply: &PositionReply, t_recv: Instant) -> Option<CorrectedPosition> {
        let Some(pending) = self.pending else {
            debug!("Discarding position reply ({}ms): no query pending", reply.elapsed_ms);
            return None;
        };
        if let Some(seq) = reply.seq {
            if seq != pending.seq {
                debug!("Discarding stale position reply #{} (latest #{})", seq, pending.seq);
                return None;
            }
        }
        if self.is_older_than_latest(reply.elapsed_ms) {
            debug!("Discarding position reply {}ms older than applied snapshot", reply.elapsed_ms);
            return None;
        }

        self.pending = None;
        let rtt_ms = t_recv.saturating_duration_since(pending.sent_at).as_millis() as u64;
        self.rtt.add_sample(rtt_ms);

        let one_way_delay_ms = rtt_ms / 2;
        debug!(
            "Position #{}: RTT={}ms, one-way={}ms, avg RTT={}ms",
            pending.seq, rtt_ms, one_way_delay_ms, self.rtt.avg_rtt_ms
        );
        Some(self.apply(reply.elapsed_ms, one_way_delay_ms, t_recv))
    }

    /// Handle a position the station pushed on its own (heartbeat or announcement).
    /// Corrected with the averaged one-way delay.
    ///
    /// Pushes arrive in order on the connection, so the newest one always wins.
    /// One that goes backwards means the station restarted the track: the query
    /// in flight was answered against the old timeline and is dropped.
    pub fn on_pushed_position(&mut self, elapsed_ms: u64, now: Instant) -> CorrectedPosition {
        if self.is_older_than_latest(elapsed_ms) {
            debug!("Station went back to {}ms, treating as a restart", elapsed_ms);
            self.pending = None;
        }
        self.apply(elapsed_ms, self.rtt.one_way_delay_ms(), now)
    }

    /// Forget position snapshots when the station moves to another track
    pub fn forget_track(&mut self) {
        self.latest_snapshot = None;
        self.latest = None;
    }

    /// Latest corrected position, if any
    pub fn latest(&self) -> Option<CorrectedPosition> {
        self.latest
    }

    /// Averaged one-way delay estimate
    pub fn one_way_delay_ms(&self) -> u64 {
        self.rtt.one_way_delay_ms()
    }

    /// Check whether a query is still waiting for its reply
    pub fn has_pending_query(&self) -> bool {
        self.pending.is_some()
    }

    fn is_older_than_latest(&self, elapsed_ms: u64) -> bool {
        self.latest_snapshot
            .map(|s| elapsed_ms < s.elapsed_ms)
            .unwrap_or(false)
    }

    fn apply(&mut self, elapsed_ms: u64, one_way_delay_ms: u64, observed_at: Instant) -> CorrectedPosition {
        self.latest_snapshot = Some(AuthoritativePosition {
            elapsed_ms,
            observed_at,
        });
        let corrected = CorrectedPosition {
            one_way_delay_ms,
            corrected_elapsed_ms: elapsed_ms + one_way_delay_ms,
            observed_at,
        };
        self.latest = Some(corrected);
        corrected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_reply_corrected_by_half_rtt() {
        let mut engine = ClockSyncEngine::new();
        let t0 = Instant::now();

        let query = engine.request_position(t0);
        assert_eq!(query.seq, 1);

        let reply = PositionReply { elapsed_ms: 30_000, seq: None };
        let corrected = engine.on_position_reply(&reply, t0 + ms(80)).unwrap();
        assert_eq!(corrected.one_way_delay_ms, 40);
        assert_eq!(corrected.corrected_elapsed_ms, 30_040);
        assert!(!engine.has_pending_query());
    }

    #[test]
    fn test_stale_reply_rejected_with_echoed_seq() {
        let mut engine = ClockSyncEngine::new();
        let t0 = Instant::now();

        let a = engine.request_position(t0);
        let b = engine.request_position(t0 + ms(5));

        // B answers first: sent at t=5, received at t=45 -> one-way 20
        let reply_b = PositionReply { elapsed_ms: 10_100, seq: Some(b.seq) };
        let corrected = engine.on_position_reply(&reply_b, t0 + ms(45)).unwrap();
        assert_eq!(corrected.corrected_elapsed_ms, 10_120);

        let reply_a = PositionReply { elapsed_ms: 10_003, seq: Some(a.seq) };
        assert!(engine.on_position_reply(&reply_a, t0 + ms(60)).is_none());
        assert_eq!(engine.latest().unwrap().corrected_elapsed_ms, 10_120);
    }

    #[test]
    fn test_stale_reply_rejected_without_seq() {
        let mut engine = ClockSyncEngine::new();
        let t0 = Instant::now();

        engine.request_position(t0);
        engine.request_position(t0 + ms(5));

        let reply_b = PositionReply { elapsed_ms: 10_100, seq: None };
        let corrected = engine.on_position_reply(&reply_b, t0 + ms(45)).unwrap();
        assert_eq!(corrected.corrected_elapsed_ms, 10_120);

        let reply_a = PositionReply { elapsed_ms: 10_003, seq: None };
        assert!(engine.on_position_reply(&reply_a, t0 + ms(60)).is_none());
        assert_eq!(engine.latest().unwrap().corrected_elapsed_ms, 10_120);
    }

    #[test]
    fn test_older_snapshot_discarded_even_when_pending() {
        let mut engine = ClockSyncEngine::new();
        let t0 = Instant::now();

        engine.request_position(t0);
        engine.on_position_reply(&PositionReply { elapsed_ms: 5_000, seq: None }, t0 + ms(10));

        engine.request_position(t0 + ms(20));
        let old = PositionReply { elapsed_ms: 4_000, seq: None };
        assert!(engine.on_position_reply(&old, t0 + ms(30)).is_none());
        // The query is still pending, a fresh reply is accepted
        assert!(engine.has_pending_query());
        let fresh = PositionReply { elapsed_ms: 5_030, seq: None };
        assert!(engine.on_position_reply(&fresh, t0 + ms(40)).is_some());
    }

    #[test]
    fn test_pushed_position_uses_average_delay() {
        let mut engine = ClockSyncEngine::new();
        let t0 = Instant::now();

        // Nothing measured yet: no correction
        let pushed = engine.on_pushed_position(1_000, t0);
        assert_eq!(pushed.corrected_elapsed_ms, 1_000);

        for (i, rtt) in [100u64, 200, 150].iter().enumerate() {
            let sent = t0 + ms(1_000 * (i as u64 + 1));
            engine.request_position(sent);
            let reply = PositionReply { elapsed_ms: 2_000 + 1_000 * i as u64, seq: None };
            engine.on_position_reply(&reply, sent + ms(*rtt));
        }
        // Average RTT 150 -> one-way 75
        assert_eq!(engine.one_way_delay_ms(), 75);
        let pushed = engine.on_pushed_position(9_000, t0 + ms(9_000));
        assert_eq!(pushed.corrected_elapsed_ms, 9_075);
    }

    #[test]
    fn test_pushed_restart_replaces_snapshot() {
        let mut engine = ClockSyncEngine::new();
        let t0 = Instant::now();

        engine.on_pushed_position(170_000, t0);
        engine.request_position(t0 + ms(10));

        // Same track started over
        let restarted = engine.on_pushed_position(0, t0 + ms(20));
        assert_eq!(restarted.corrected_elapsed_ms, 0);
        assert_eq!(engine.latest().unwrap().corrected_elapsed_ms, 0);

        // The query sent before the restart is no longer answerable
        assert!(!engine.has_pending_query());
        let late = PositionReply { elapsed_ms: 170_020, seq: None };
        assert!(engine.on_position_reply(&late, t0 + ms(40)).is_none());

        // Replies are now judged against the new timeline
        engine.request_position(t0 + ms(1_000));
        let fresh = PositionReply { elapsed_ms: 1_000, seq: None };
        assert!(engine.on_position_reply(&fresh, t0 + ms(1_020)).is_some());
    }

    #[test]
    fn test_forget_track_clears_snapshot() {
        let mut engine = ClockSyncEngine::new();
        let t0 = Instant::now();

        engine.on_pushed_position(120_000, t0);
        engine.forget_track();
        assert!(engine.latest().is_none());

        // No snapshot left to compare against
        engine.request_position(t0 + ms(10));
        let reply = PositionReply { elapsed_ms: 500, seq: None };
        assert_eq!(engine.on_position_reply(&reply, t0 + ms(30)).unwrap().corrected_elapsed_ms, 510);
    }

    #[test]
    fn test_projection() {
        let t0 = Instant::now();
        let position = CorrectedPosition {
            one_way_delay_ms: 10,
            corrected_elapsed_ms: 1_010,
            observed_at: t0,
        };
        assert_eq!(position.projected_ms(t0 + ms(500)), 1_510);
        assert_eq!(position.projected_ms(t0), 1_010);
    }
}
