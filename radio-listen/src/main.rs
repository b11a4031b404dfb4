//! Radio Listen - Headless Listener
//!
//! Connects to a station, keeps a virtual player in lockstep with it and logs
//! what is playing, how far behind we are and how the skip vote stands.
//!
//! Usage:
//!   cargo run --release -- ws://radio.example.com/stream
//!   cargo run --release -- --config listener.json
//!   cargo run --release -- --blocked ws://...  # Start with autoplay blocked

mod listener;
mod status;

use std::sync::Arc;

use parking_lot::RwLock;
use radio_core::{driver, SyncConfig, VirtualBackend};
use tokio::sync::mpsc;

struct Args {
    config: SyncConfig,
    blocked: bool,
}

fn parse_args(args: &[String]) -> Result<Args, Box<dyn std::error::Error>> {
    let mut config = None;
    let mut server_url = None;
    let mut blocked = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter.next().ok_or("--config needs a path")?;
                config = Some(SyncConfig::from_json_file(path)?);
            }
            "--blocked" => blocked = true,
            url if !url.starts_with("--") => server_url = Some(url.to_string()),
            other => return Err(format!("unknown option: {}", other).into()),
        }
    }

    let mut config = config.unwrap_or_default();
    if let Some(url) = server_url {
        config.server_url = url;
    }
    config.validate()?;
    Ok(Args { config, blocked })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("radio_core=info".parse()?)
                .add_directive("radio_listen=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Args { config, blocked } = parse_args(&args)?;

    // Shared status state
    let status = Arc::new(RwLock::new(status::Status::new(config.initial_volume_percent)));

    let (media_tx, media_rx) = mpsc::unbounded_channel();
    let backend = VirtualBackend::new(media_tx);
    backend.set_autoplay_allowed(!blocked);

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let observer = Arc::new(listener::LogObserver::new(Arc::clone(&status)));
    let session = tokio::spawn(driver::run(config, backend.clone(), observer, command_rx, media_rx));

    listener::read_commands(command_tx, status, backend).await;
    session.await??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        let parsed = parse_args(&args(&["wss://radio.example.com/stream", "--blocked"])).unwrap();
        assert_eq!(parsed.config.server_url, "wss://radio.example.com/stream");
        assert!(parsed.blocked);

        let parsed = parse_args(&args(&[])).unwrap();
        assert_eq!(parsed.config, SyncConfig::default());
        assert!(!parsed.blocked);

        assert!(parse_args(&args(&["--config"])).is_err());
        assert!(parse_args(&args(&["--verbose"])).is_err());
        assert!(parse_args(&args(&["http://radio.example.com"])).is_err());
    }
}
