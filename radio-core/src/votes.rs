//! Skip vote tracking
//!
//! The station tallies votes and decides when to skip. We only keep our own
//! optimistic vote flag and mirror the station's counts for display.

use tracing::debug;

use crate::protocol::{ClientMessage, VoteCounts};

/// Vote state as seen by this listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteState {
    pub user_count: u32,
    pub vote_count: u32,
    pub vote_ratio_percent: u8,
    /// Our own vote, optimistic until the station says otherwise
    pub self_voted: bool,
}

impl Default for VoteState {
    fn default() -> Self {
        Self {
            user_count: 0,
            vote_count: 0,
            vote_ratio_percent: 50,
            self_voted: false,
        }
    }
}

impl VoteState {
    /// Votes needed to skip: `ceil(user_count * ratio / 100)`. Display only.
    pub fn required_quorum(&self) -> u32 {
        let product = self.user_count as u64 * self.vote_ratio_percent as u64;
        product.div_ceil(100) as u32
    }
}

#[derive(Debug, Default)]
pub struct VoteQuorumTracker {
    state: VoteState,
}

impl VoteQuorumTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle our vote and produce the message that tells the station
    pub fn cast_vote(&mut self) -> ClientMessage {
        self.state.self_voted = !self.state.self_voted;
        debug!("Vote toggled, self_voted={}", self.state.self_voted);
        ClientMessage::VoteSkip
    }

    /// Downvote the current track. The station also counts it as a skip vote.
    pub fn cast_downvote(&mut self) -> [ClientMessage; 2] {
        [ClientMessage::Downvote, self.cast_vote()]
    }

    /// Take over the station's counts. A zero vote count clears our own flag.
    /// Returns true if anything visible changed.
    pub fn on_server_update(&mut self, counts: VoteCounts) -> bool {
        let before = self.state;
        self.state.user_count = counts.user_count;
        self.state.vote_count = counts.vote_count;
        self.state.vote_ratio_percent = counts.vote_ratio_percent;
        if counts.vote_count == 0 {
            self.state.self_voted = false;
        }
        self.state != before
    }

    pub fn state(&self) -> VoteState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(user_count: u32, vote_count: u32, vote_ratio_percent: u8) -> VoteCounts {
        VoteCounts {
            user_count,
            vote_count,
            vote_ratio_percent,
        }
    }

    #[test]
    fn test_quorum_rounds_up() {
        let mut tracker = VoteQuorumTracker::new();
        tracker.on_server_update(counts(3, 0, 50));
        assert_eq!(tracker.state().required_quorum(), 2);
        tracker.on_server_update(counts(4, 0, 50));
        assert_eq!(tracker.state().required_quorum(), 2);
        tracker.on_server_update(counts(7, 0, 30));
        assert_eq!(tracker.state().required_quorum(), 3);
        tracker.on_server_update(counts(0, 0, 50));
        assert_eq!(tracker.state().required_quorum(), 0);
        tracker.on_server_update(counts(1, 0, 100));
        assert_eq!(tracker.state().required_quorum(), 1);
    }

    #[test]
    fn test_cast_vote_toggles() {
        let mut tracker = VoteQuorumTracker::new();
        assert_eq!(tracker.cast_vote(), ClientMessage::VoteSkip);
        assert!(tracker.state().self_voted);
        tracker.cast_vote();
        assert!(!tracker.state().self_voted);
    }

    #[test]
    fn test_zero_votes_reset_self_vote() {
        let mut tracker = VoteQuorumTracker::new();
        tracker.cast_vote();
        tracker.on_server_update(counts(5, 1, 50));
        assert!(tracker.state().self_voted);

        // The station is authoritative: a zero count wins over local intent
        tracker.cast_vote();
        tracker.cast_vote();
        assert!(tracker.state().self_voted);
        assert!(tracker.on_server_update(counts(5, 0, 50)));
        assert!(!tracker.state().self_voted);
    }

    #[test]
    fn test_downvote_also_votes() {
        let mut tracker = VoteQuorumTracker::new();
        let messages = tracker.cast_downvote();
        assert_eq!(messages, [ClientMessage::Downvote, ClientMessage::VoteSkip]);
        assert!(tracker.state().self_voted);
    }

    #[test]
    fn test_unchanged_update_reports_no_change() {
        let mut tracker = VoteQuorumTracker::new();
        assert!(tracker.on_server_update(counts(2, 1, 50)));
        assert!(!tracker.on_server_update(counts(2, 1, 50)));
    }
}
