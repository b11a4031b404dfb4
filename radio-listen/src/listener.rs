//! Terminal front end: logs session events and reads commands from stdin

use std::sync::Arc;

use parking_lot::RwLock;
use radio_core::reconnect::ConnectionState;
use radio_core::votes::VoteState;
use radio_core::{format_clock, Command, LagReport, SessionObserver, Track, VirtualBackend};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::status::Status;

/// Progress is logged once per this many milliseconds of playback
const PROGRESS_LOG_EVERY_MS: u64 = 15_000;

const VOLUME_STEP: u8 = 10;

/// Session observer that keeps [`Status`] current and logs what matters
pub struct LogObserver {
    status: Arc<RwLock<Status>>,
}

impl LogObserver {
    pub fn new(status: Arc<RwLock<Status>>) -> Self {
        Self { status }
    }
}

impl SessionObserver for LogObserver {
    fn on_connection_state(&self, state: ConnectionState) {
        self.status.write().set_connection(state);
        match state {
            ConnectionState::Connecting => info!("Connecting to station..."),
            ConnectionState::Open => info!("Connected"),
            ConnectionState::Closed => warn!("Connection lost"),
        }
    }

    fn on_track_changed(&self, track: &Track) {
        self.status.write().set_track(track);
        info!("Now playing: {} ({})", track.title, format_clock(track.length_ms));
    }

    fn on_progress(&self, elapsed_ms: u64, length_ms: u64) {
        let mut status = self.status.write();
        let crossed = elapsed_ms / PROGRESS_LOG_EVERY_MS != status.elapsed_ms / PROGRESS_LOG_EVERY_MS;
        status.elapsed_ms = elapsed_ms;
        if crossed {
            info!("{} / {}", format_clock(elapsed_ms), format_clock(length_ms));
        }
    }

    fn on_lag(&self, report: LagReport) {
        let mut status = self.status.write();
        status.lag = Some(report);
        tracing::debug!("Lag: {}", status.lag_line());
    }

    fn on_vote_state(&self, state: VoteState, required_quorum: u32) {
        self.status.write().votes = Some((state, required_quorum));
        info!(
            "Votes: {}/{} ({} listeners){}",
            state.vote_count,
            required_quorum,
            state.user_count,
            if state.self_voted { ", you voted" } else { "" }
        );
    }

    fn on_sync_degraded(&self) {
        self.status.write().degraded = true;
        warn!("Could not keep up with the station, automatic correction is off. Press r to resync.");
    }

    fn on_playback_blocked(&self) {
        self.status.write().blocked = true;
        warn!("Playback blocked. Press p to start listening.");
    }

    fn on_playback_resumed(&self) {
        self.status.write().blocked = false;
        info!("Playback started");
    }

    fn on_admin(&self, payload: &serde_json::Value) {
        info!("Admin message: {}", payload);
    }

    fn on_error(&self, message: &str) {
        warn!("Station says: {}", message);
    }
}

fn print_help() {
    println!("commands: v vote skip | d downvote | r resync | p play | + / - volume | s status | a <json> admin | q quit");
}

/// Map one stdin line to a session command
fn parse_command(line: &str, volume_percent: u8) -> Result<Option<Command>, String> {
    let line = line.trim();
    let (head, rest) = line.split_at(line.find(' ').unwrap_or(line.len()));
    let command = match head {
        "v" => Command::CastVote,
        "d" => Command::CastDownvote,
        "r" => Command::Resync,
        "p" => Command::Resume,
        "+" => Command::SetVolume(volume_percent.saturating_add(VOLUME_STEP).min(100)),
        "-" => Command::SetVolume(volume_percent.saturating_sub(VOLUME_STEP)),
        "a" => {
            let payload = serde_json::from_str(rest.trim()).map_err(|e| format!("bad admin JSON: {}", e))?;
            Command::Admin(payload)
        }
        "q" => Command::Shutdown,
        "" | "s" | "h" | "?" => return Ok(None),
        other => return Err(format!("unknown command: {}", other)),
    };
    Ok(Some(command))
}

/// Mirror a command's effect on the terminal side before the session sees it
fn apply_locally(command: &Command, status: &RwLock<Status>, backend: &VirtualBackend) {
    match command {
        // Pressing p is our user gesture
        Command::Resume => backend.set_autoplay_allowed(true),
        // Resync turns automatic correction back on
        Command::Resync => status.write().degraded = false,
        Command::SetVolume(percent) => {
            status.write().volume_percent = *percent;
            info!("Volume {}%", percent);
        }
        _ => {}
    }
}

/// Read commands from stdin until `q` or end of input
pub async fn read_commands(
    commands: mpsc::UnboundedSender<Command>,
    status: Arc<RwLock<Status>>,
    backend: VirtualBackend,
) {
    print_help();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read stdin: {}", e);
                break;
            }
        };

        let volume_percent = status.read().volume_percent;
        match parse_command(&line, volume_percent) {
            Ok(Some(command)) => {
                apply_locally(&command, &status, &backend);
                let quit = command == Command::Shutdown;
                if commands.send(command).is_err() || quit {
                    break;
                }
            }
            Ok(None) if line.trim() == "s" => println!("{}", status.read().summary()),
            Ok(None) => print_help(),
            Err(e) => println!("{}", e),
        }
    }

    let _ = commands.send(Command::Shutdown);
}

#[cfg(test)]
mod tests {
    use super::*;
    use radio_core::drift::LagGrade;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("v", 50), Ok(Some(Command::CastVote)));
        assert_eq!(parse_command(" d \n", 50), Ok(Some(Command::CastDownvote)));
        assert_eq!(parse_command("+", 95), Ok(Some(Command::SetVolume(100))));
        assert_eq!(parse_command("-", 5), Ok(Some(Command::SetVolume(0))));
        assert_eq!(parse_command("s", 50), Ok(None));
        assert!(parse_command("x", 50).is_err());
    }

    #[test]
    fn test_parse_admin_payload() {
        assert_eq!(
            parse_command(r#"a {"skip":true}"#, 50),
            Ok(Some(Command::Admin(serde_json::json!({"skip": true}))))
        );
        assert!(parse_command("a {nope", 50).is_err());
    }

    #[test]
    fn test_resync_clears_degraded_status() {
        let status = Arc::new(RwLock::new(Status::new(75)));
        let observer = LogObserver::new(status.clone());
        let backend = VirtualBackend::detached();

        observer.on_lag(LagReport {
            lag_ms: 900,
            grade: LagGrade::Poor,
            one_way_delay_ms: 20,
            stats: None,
        });
        observer.on_sync_degraded();
        assert!(status.read().lag_line().contains("auto-correction OFF"));

        apply_locally(&Command::Resync, &status, &backend);
        assert!(!status.read().degraded);
        assert_eq!(status.read().lag_line(), "900ms (poor), one-way 20ms");

        apply_locally(&Command::SetVolume(40), &status, &backend);
        assert_eq!(status.read().volume_percent, 40);
    }

    #[test]
    fn test_progress_logged_on_interval_boundaries() {
        let status = Arc::new(RwLock::new(Status::new(75)));
        let observer = LogObserver::new(status.clone());
        observer.on_progress(14_900, 180_000);
        observer.on_progress(15_100, 180_000);
        assert_eq!(status.read().elapsed_ms, 15_100);
    }
}
