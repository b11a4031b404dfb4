//! Listener status tracking

use chrono::{DateTime, Local};
use radio_core::drift::LagGrade;
use radio_core::reconnect::ConnectionState;
use radio_core::votes::VoteState;
use radio_core::{format_clock, LagReport, Track};

/// What the listener currently knows about the station and its own playback
pub struct Status {
    /// Listener start time
    pub start_time: DateTime<Local>,

    pub connection: ConnectionState,

    /// Number of times the connection was (re)opened
    pub connections: u64,

    pub track: Option<Track>,

    /// When the current track started playing here
    pub track_started: Option<DateTime<Local>>,

    pub elapsed_ms: u64,

    pub lag: Option<LagReport>,

    pub votes: Option<(VoteState, u32)>,

    pub degraded: bool,

    pub blocked: bool,

    pub volume_percent: u8,
}

impl Status {
    pub fn new(volume_percent: u8) -> Self {
        Self {
            start_time: Local::now(),
            connection: ConnectionState::Closed,
            connections: 0,
            track: None,
            track_started: None,
            elapsed_ms: 0,
            lag: None,
            votes: None,
            degraded: false,
            blocked: false,
            volume_percent,
        }
    }

    pub fn set_connection(&mut self, state: ConnectionState) {
        if state == ConnectionState::Open {
            self.connections += 1;
            // A fresh connection starts with automatic correction enabled
            self.degraded = false;
        }
        self.connection = state;
    }

    pub fn set_track(&mut self, track: &Track) {
        self.track = Some(track.clone());
        self.track_started = Some(Local::now());
        self.elapsed_ms = 0;
    }

    /// Get uptime as formatted string
    pub fn uptime(&self) -> String {
        let secs = (Local::now() - self.start_time).num_seconds().max(0);
        format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
    }

    /// One line for the current track, e.g. `Title [01:02 / 03:00]`
    pub fn now_playing(&self) -> String {
        match &self.track {
            Some(track) => format!(
                "{} [{} / {}]",
                track.title,
                format_clock(self.elapsed_ms),
                format_clock(track.length_ms)
            ),
            None => "nothing yet".to_string(),
        }
    }

    pub fn lag_line(&self) -> String {
        let Some(lag) = &self.lag else {
            return "no measurement".to_string();
        };
        let grade = match lag.grade {
            LagGrade::Good => "good",
            LagGrade::Fair => "fair",
            LagGrade::Poor => "poor",
        };
        let mut line = format!("{}ms ({}), one-way {}ms", lag.lag_ms, grade, lag.one_way_delay_ms);
        if let Some(stats) = &lag.stats {
            if let Some(avg) = stats.average_ms() {
                line.push_str(&format!(
                    ", avg {}ms min {}ms max {}ms over {} samples",
                    avg, stats.min, stats.max, stats.count
                ));
            }
        }
        if self.degraded {
            line.push_str(", auto-correction OFF (press r)");
        }
        line
    }

    pub fn votes_line(&self) -> String {
        match &self.votes {
            Some((state, required)) => format!(
                "{}/{} skip votes ({} listeners){}",
                state.vote_count,
                required,
                state.user_count,
                if state.self_voted { ", you voted" } else { "" }
            ),
            None => "no vote data".to_string(),
        }
    }

    /// Multi-line summary for the `s` command
    pub fn summary(&self) -> String {
        let since = self
            .track_started
            .map(|t| format!(" (since {})", t.format("%H:%M:%S")))
            .unwrap_or_default();
        format!(
            "connection: {:?} (opened {} times, up {})\nnow playing: {}{}\nlag: {}\nvotes: {}\nvolume: {}%{}",
            self.connection,
            self.connections,
            self.uptime(),
            self.now_playing(),
            since,
            self.lag_line(),
            self.votes_line(),
            self.volume_percent,
            if self.blocked { "\nplayback blocked, press p to start" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track() -> Track {
        Track {
            path: "a.mp3".to_string(),
            title: "Song A".to_string(),
            length_ms: 180_000,
        }
    }

    #[test]
    fn test_now_playing() {
        let mut status = Status::new(75);
        assert_eq!(status.now_playing(), "nothing yet");

        status.set_track(&track());
        status.elapsed_ms = 62_500;
        assert_eq!(status.now_playing(), "Song A [01:02 / 03:00]");
    }

    #[test]
    fn test_reconnect_clears_degraded() {
        let mut status = Status::new(75);
        status.set_connection(ConnectionState::Open);
        status.degraded = true;
        status.set_connection(ConnectionState::Closed);
        assert!(status.degraded);
        status.set_connection(ConnectionState::Open);
        assert!(!status.degraded);
        assert_eq!(status.connections, 2);
    }

    #[test]
    fn test_votes_line() {
        let mut status = Status::new(75);
        let state = VoteState {
            user_count: 5,
            vote_count: 2,
            vote_ratio_percent: 50,
            self_voted: true,
        };
        status.votes = Some((state, state.required_quorum()));
        assert_eq!(status.votes_line(), "2/3 skip votes (5 listeners), you voted");
    }
}
