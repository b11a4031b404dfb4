//! Radio Core - Listener Sync Library
//!
//! Keeps every listener of a shared internet radio station playing the same
//! moment of the same track: round-trip based clock correction, drift
//! correction with a safety cut-off, gapless track transitions and skip votes.

pub mod clock;
pub mod config;
pub mod driver;
pub mod drift;
pub mod error;
pub mod ffi;
pub mod media;
pub mod protocol;
pub mod reconnect;
pub mod session;
pub mod transition;
pub mod transport;
pub mod votes;

// Re-exports for convenience
pub use config::SyncConfig;
pub use driver::Command;
pub use error::SyncError;
pub use media::{MediaBackend, MediaEvent, MediaHandle, VirtualBackend};
pub use protocol::{ClientMessage, ServerMessage, Track};
pub use session::{format_clock, LagReport, SessionObserver, SyncSession};

// Setup uniffi scaffolding
uniffi::setup_scaffolding!();
