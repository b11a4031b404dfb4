//! Station Protocol Messages
//!
//! Every frame on the wire is a JSON object shaped `{type, data}`.

use serde::{Deserialize, Serialize};

/// Vote ratio assumed when the station does not send one (simple majority)
const DEFAULT_VOTE_RATIO_PERCENT: u8 = 50;

fn default_vote_ratio() -> u8 {
    DEFAULT_VOTE_RATIO_PERCENT
}

/// A track announced by the station. Identity is the path alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    /// Audio file path relative to the station's audio root
    pub path: String,
    /// Display title
    pub title: String,
    /// Duration in milliseconds
    #[serde(alias = "length")]
    pub length_ms: u64,
}

impl Track {
    /// Check whether this track lives at `path`
    pub fn is_at(&self, path: &str) -> bool {
        self.path == path
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Track {}

/// Listener and vote counts as tallied by the station
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteCounts {
    pub user_count: u32,
    pub vote_count: u32,
    pub vote_ratio_percent: u8,
}

/// Position query sent to the station
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionQuery {
    /// Sequence number of this query; stations may echo it back
    pub seq: u64,
}

/// Reply to a position query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionReply {
    /// Elapsed playback of the current track when the station answered
    #[serde(alias = "elapsed")]
    pub elapsed_ms: u64,
    /// Echoed query sequence, if the station supports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

/// "Now playing" announcement with a preload hint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TrackUpdateWire")]
pub struct TrackUpdate {
    pub path: String,
    pub title: String,
    pub length_ms: u64,
    /// Absent when the station only re-announces the track (vote changes, new listeners)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vote_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vote_ratio_percent: Option<u8>,
}

/// Accepts the flat form as well as older stations nesting the track under `this_track`
#[derive(Deserialize)]
struct TrackUpdateWire {
    this_track: Option<Track>,
    path: Option<String>,
    title: Option<String>,
    #[serde(alias = "length")]
    length_ms: Option<u64>,
    #[serde(alias = "elapsed")]
    elapsed_ms: Option<u64>,
    #[serde(alias = "next_track")]
    next_path: Option<String>,
    user_count: Option<u32>,
    vote_count: Option<u32>,
    #[serde(alias = "vote_ratio")]
    vote_ratio_percent: Option<u8>,
}

impl TryFrom<TrackUpdateWire> for TrackUpdate {
    type Error = String;

    fn try_from(wire: TrackUpdateWire) -> Result<Self, Self::Error> {
        let track = match wire.this_track {
            Some(track) => track,
            None => Track {
                path: wire.path.ok_or("missing field `path`")?,
                title: wire.title.ok_or("missing field `title`")?,
                length_ms: wire.length_ms.ok_or("missing field `length_ms`")?,
            },
        };
        Ok(Self {
            path: track.path,
            title: track.title,
            length_ms: track.length_ms,
            elapsed_ms: wire.elapsed_ms,
            next_path: wire.next_path,
            user_count: wire.user_count,
            vote_count: wire.vote_count,
            vote_ratio_percent: wire.vote_ratio_percent,
        })
    }
}

impl TrackUpdate {
    /// The announced track
    pub fn track(&self) -> Track {
        Track {
            path: self.path.clone(),
            title: self.title.clone(),
            length_ms: self.length_ms,
        }
    }

    /// Vote tally, when the station bundled one with the announcement
    pub fn votes(&self) -> Option<VoteCounts> {
        Some(VoteCounts {
            user_count: self.user_count?,
            vote_count: self.vote_count?,
            vote_ratio_percent: self.vote_ratio_percent.unwrap_or(DEFAULT_VOTE_RATIO_PERCENT),
        })
    }
}

/// Periodic authoritative tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "HeartbeatWire")]
pub struct Heartbeat {
    pub elapsed_ms: u64,
    pub user_count: u32,
    pub vote_count: u32,
    pub vote_ratio_percent: u8,
}

#[derive(Deserialize)]
struct HeartbeatWire {
    elapsed_ms: Option<u64>,
    /// Older stations send whole seconds
    time: Option<u64>,
    #[serde(alias = "users")]
    user_count: u32,
    #[serde(alias = "votes")]
    vote_count: u32,
    #[serde(alias = "vote_ratio", default = "default_vote_ratio")]
    vote_ratio_percent: u8,
}

impl TryFrom<HeartbeatWire> for Heartbeat {
    type Error = String;

    fn try_from(wire: HeartbeatWire) -> Result<Self, Self::Error> {
        let elapsed_ms = match (wire.elapsed_ms, wire.time) {
            (Some(ms), _) => ms,
            (None, Some(secs)) => secs.saturating_mul(1000),
            (None, None) => return Err("missing field `elapsed_ms`".to_string()),
        };
        Ok(Self {
            elapsed_ms,
            user_count: wire.user_count,
            vote_count: wire.vote_count,
            vote_ratio_percent: wire.vote_ratio_percent,
        })
    }
}

impl Heartbeat {
    pub fn votes(&self) -> VoteCounts {
        VoteCounts {
            user_count: self.user_count,
            vote_count: self.vote_count,
            vote_ratio_percent: self.vote_ratio_percent,
        }
    }
}

/// Messages sent from the listener to the station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Ask for the authoritative elapsed position
    Position(PositionQuery),
    /// Cast or retract our skip vote
    VoteSkip,
    /// Mark the current track as disliked
    Downvote,
    /// Opaque admin payload, never inspected here
    Admin(serde_json::Value),
}

/// Messages pushed by the station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ServerMessage {
    Position(PositionReply),
    Update(TrackUpdate),
    Heartbeat(Heartbeat),
    /// Opaque admin payload, forwarded to the UI untouched
    Admin(serde_json::Value),
    /// Human readable complaint from the station (e.g. malformed JSON)
    Issue(String),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

impl ServerMessage {
    const KNOWN_TYPES: [&'static str; 5] = ["position", "update", "heartbeat", "admin", "issue"];

    /// Decode a text frame. Returns `Ok(None)` for message types we do not handle.
    pub fn decode(text: &str) -> Result<Option<Self>, serde_json::Error> {
        let envelope: Envelope = serde_json::from_str(text)?;
        if !Self::KNOWN_TYPES.contains(&envelope.kind.as_str()) {
            tracing::debug!("Ignoring unknown message type: {}", envelope.kind);
            return Ok(None);
        }
        serde_json::from_str(text).map(Some)
    }
}

impl ClientMessage {
    /// Encode as a text frame
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
