//! Error types for tune-arena

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GameError {
    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Room not found")]
    RoomNotFound,

    #[error("Not authorized: {0}")]
    Permission(String),

    #[error("No active round")]
    NoRound,

    #[error("Operation not valid for this game type")]
    WrongMode,

    #[error("Invalid state: {0}")]
    State(String),

    #[error("Search quota exceeded")]
    QuotaExceeded,

    #[error("Upstream failure: {0}")]
    Upstream(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GameError>;
