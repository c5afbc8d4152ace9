//! Wire protocol for the bidirectional event surface.
//!
//! Inbound events arrive in an envelope carrying an optional ack id; the
//! server answers each acked event with an `ack` message holding `{ok, …}`
//! or `{error}`. Outbound events mirror engine mutations in commit order.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{Answer, GameType, Hint, PlaybackHandle, RoomMode, Track};

/// Inbound message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEnvelope {
    /// Client-chosen correlation id for the ack, if one is wanted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
    #[serde(flatten)]
    pub event: ClientEvent,
}

/// Client → server events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientEvent {
    CreateRoom,
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        code: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SetName { code: String, name: String },
    #[serde(rename_all = "camelCase")]
    StartGame {
        code: String,
        mode: RoomMode,
        tracks: Vec<Track>,
        game_type: GameType,
    },
    #[serde(rename_all = "camelCase")]
    NextRound { code: String },
    #[serde(rename_all = "camelCase")]
    Guess { code: String, guess_text: String },
    #[serde(rename_all = "camelCase")]
    Chat {
        code: String,
        name: String,
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    VoteSkip { code: String },
    #[serde(rename_all = "camelCase")]
    Buzz { code: String },
    #[serde(rename_all = "camelCase")]
    PassBuzzer { code: String },
    #[serde(rename_all = "camelCase")]
    AwardPoints {
        code: String,
        player_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        points: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    DeductPoints {
        code: String,
        player_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        points: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    EndRoundManual { code: String },
    #[serde(rename_all = "camelCase")]
    HostVerifyGuess {
        code: String,
        artist: String,
        title: String,
    },
    #[serde(rename_all = "camelCase")]
    PauseRound { code: String },
    #[serde(rename_all = "camelCase")]
    ResumeRound { code: String },
    #[serde(rename_all = "camelCase")]
    KickPlayer {
        code: String,
        target_conn: String,
    },
}

/// Server → client events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    RoomState {
        code: String,
        host_conn: String,
        players: Vec<PlayerView>,
        skip_votes: Vec<String>,
        has_tracks: bool,
        game_started: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        game_type: Option<GameType>,
        round_count: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        current_round: Option<RoundView>,
    },
    #[serde(rename_all = "camelCase")]
    GameStarted { mode: RoomMode, game_type: GameType },
    #[serde(rename_all = "camelCase")]
    RoundStart {
        mode: RoomMode,
        game_type: GameType,
        started_at: u64,
        hint: Hint,
        playback: PlaybackHandle,
    },
    #[serde(rename_all = "camelCase")]
    RoundEnd {
        #[serde(skip_serializing_if = "Option::is_none")]
        winner: Option<String>,
        answer: Answer,
        elapsed_ms: u64,
        scores: Vec<ScoreView>,
        #[serde(skip_serializing_if = "Option::is_none")]
        skipped: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    GameOver { scores: Vec<ScoreView> },
    #[serde(rename_all = "camelCase")]
    Chat {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        system: Option<bool>,
        at: u64,
    },
    #[serde(rename_all = "camelCase")]
    Buzzed { id: String, name: String, at: u64 },
    #[serde(rename_all = "camelCase")]
    QueueUpdated { queue: Vec<QueueView> },
    BuzzCleared,
    PausePlayback,
    ResumePlayback,
    #[serde(rename_all = "camelCase")]
    Kicked { message: String },
    #[serde(rename_all = "camelCase")]
    Ack {
        id: u64,
        #[serde(flatten)]
        body: AckBody,
    },
}

/// Ack payload: `{ok: true, …}` on success, `{error}` on failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AckBody {
    Ok {
        ok: bool,
        #[serde(flatten)]
        data: Map<String, Value>,
    },
    Error { error: String },
}

impl AckBody {
    pub fn ok(data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        AckBody::Ok { ok: true, data }
    }

    pub fn error(message: impl Into<String>) -> Self {
        AckBody::Error {
            error: message.into(),
        }
    }
}

/// A member as seen by clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub id: String,
    pub name: String,
    pub score: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// A queued buzz as seen by clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueView {
    pub id: String,
    pub name: String,
    pub at: u64,
}

/// Buzzer state as seen by clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuzzerView {
    pub holder: String,
    pub holder_name: String,
    pub first_buzz_at: u64,
    pub queue: Vec<QueueView>,
}

/// The answer-free projection of the current round.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundView {
    pub started_at: u64,
    pub hint: Hint,
    pub playback: PlaybackHandle,
    pub solved: bool,
    pub paused: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buzzer: Option<BuzzerView>,
}

/// One scoreboard row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreView {
    pub name: String,
    pub score: u32,
}
