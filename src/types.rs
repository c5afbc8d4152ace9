//! Type definitions for tune-arena

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Playback source mode, fixed for the life of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomMode {
    /// Tracks come from a music catalog with audio previews.
    #[serde(rename = "catalog-preview")]
    CatalogPreview,
    /// Tracks come from a video site and play as embedded videos.
    #[serde(rename = "video-site")]
    VideoSite,
}

/// Answer arbitration protocol, fixed for the life of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameType {
    /// Free-form typed guesses, fuzzy-matched server-side.
    Text,
    /// First-come buzzer queue with host adjudication.
    Buzzer,
}

/// Origin catalog of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrackSource {
    Catalog,
    VideoSite,
}

/// One entry of the round pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
    pub source: TrackSource,
}

/// Opaque payload delivered to clients to start local media playback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PlaybackHandle {
    #[serde(rename_all = "camelCase")]
    Audio {
        preview_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cover: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Video { video_id: String },
}

/// A player in a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub name: String,
    pub score: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Membership slot: the transient connection handle a member currently
/// occupies. Slots keep insertion order; the first remaining slot inherits
/// host rights when the host connection drops.
#[derive(Debug, Clone)]
pub struct MemberSlot {
    pub conn: String,
    pub member: Member,
}

/// A queued buzz waiting behind the current holder.
#[derive(Debug, Clone)]
pub struct BuzzEntry {
    pub conn: String,
    pub name: String,
    pub at: u64,
}

/// First-come first-served arbitration for buzzer-mode rounds.
///
/// A connection handle appears at most once across holder and queue.
#[derive(Debug, Clone)]
pub struct Buzzer {
    pub first_buzz_at: u64,
    pub holder: String,
    pub holder_name: String,
    pub queue: VecDeque<BuzzEntry>,
}

/// The revealed answer of a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub title: String,
    pub artist: String,
}

/// The only answer leakage permitted to clients before a round ends:
/// code-point counts of the raw target strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub title_len: usize,
    pub artist_len: usize,
}

/// One playback of a single track with arbitration of who identified it.
#[derive(Debug, Clone)]
pub struct Round {
    pub started_at: u64,
    pub track: Track,
    pub playback: PlaybackHandle,
    pub answer: Answer,
    pub solved: bool,
    pub paused: bool,
    pub hint: Hint,
    pub buzzer: Option<Buzzer>,
}

impl Round {
    pub fn new(track: Track, playback: PlaybackHandle) -> Self {
        let hint = Hint {
            title_len: track.title.chars().count(),
            artist_len: track.artist.chars().count(),
        };
        let answer = Answer {
            title: track.title.clone(),
            artist: track.artist.clone(),
        };
        Self {
            started_at: now_ms(),
            track,
            playback,
            answer,
            solved: false,
            paused: false,
            hint,
            buzzer: None,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port to bind (default: 3000)
    pub port: u16,
    /// Origins allowed on the REST/WebSocket surface ("*" allows any)
    pub allowed_origins: Vec<String>,
    /// Base URL used when building shareable room links
    pub base_url: Option<String>,
    /// Minimum pool size accepted by startGame (default: 1)
    pub min_tracks: usize,
    /// Optional cap on rounds before gameOver (default: pool length)
    pub round_limit: Option<usize>,
    /// Display name limit in code points (default: 32)
    pub max_name_len: usize,
    /// Chat message limit in code points (default: 500)
    pub max_chat_len: usize,
    /// Timeout for outbound catalog/search calls in ms (default: 5000)
    pub search_timeout: u64,
    /// How long the official search API stays suppressed after a quota
    /// failure, in ms (default: 6 hours)
    pub breaker_cooldown: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            allowed_origins: vec!["*".to_string()],
            base_url: None,
            min_tracks: 1,
            round_limit: None,
            max_name_len: 32,
            max_chat_len: 500,
            search_timeout: 5000,
            breaker_cooldown: 6 * 60 * 60 * 1000,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn min_tracks(mut self, n: usize) -> Self {
        self.min_tracks = n;
        self
    }

    pub fn round_limit(mut self, n: usize) -> Self {
        self.round_limit = Some(n);
        self
    }

    pub fn search_timeout(mut self, ms: u64) -> Self {
        self.search_timeout = ms;
        self
    }

    pub fn breaker_cooldown(mut self, ms: u64) -> Self {
        self.breaker_cooldown = ms;
        self
    }
}

/// Generate a room short code (6 uppercase alphanumeric chars)
pub fn generate_room_code() -> String {
    use rand::Rng;
    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}

/// Generate a transient connection handle
pub fn generate_conn_id() -> String {
    use rand::Rng;
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..16)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}

/// Sentinel handle for a member restored from a snapshot while nobody is
/// connected under that user id.
pub fn pending_conn(user_id: &str) -> String {
    format!("pending-{user_id}")
}

/// Trim surrounding whitespace and truncate to `max` code points.
pub fn clip(s: &str, max: usize) -> String {
    s.trim().chars().take(max).collect()
}

/// Current time in milliseconds
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}
