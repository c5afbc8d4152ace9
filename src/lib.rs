//! # tune-arena
//!
//! Real-time multiplayer name-that-tune game server.
//!
//! Clients join named rooms over a WebSocket, the host loads a playlist from
//! an external music catalog, and the server conducts rounds in which
//! players compete to identify the playing track. Scoring, round
//! progression, and playback synchronization are authoritative here.
//!
//! ## Features
//!
//! - **Rooms**: short join codes, host handover, reconnect with a stable
//!   identity, snapshot persistence for recovery
//! - **Two game types**: free-form text guesses with fuzzy matching, or a
//!   first-come buzzer queue with host adjudication
//! - **Playback resolution**: catalog previews or resolved video ids, with
//!   search fallback and a quota circuit breaker
//! - **Event protocol**: ordered JSON events with per-request acks
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tune_arena::{Gateway, MemoryStore, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let config = ServerConfig::new()
//!         .port(3000)
//!         .base_url("https://tunes.example.com");
//!
//!     let store = Arc::new(MemoryStore::new());
//!     let gateway = Gateway::new(config, store, None, None, None);
//!     tune_arena::server::serve(gateway).await
//! }
//! ```

pub mod error;
pub mod gateway;
pub mod matcher;
pub mod playback;
pub mod protocol;
pub mod providers;
pub mod qr;
pub mod registry;
pub mod rest;
pub mod room;
pub mod server;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;

pub use error::{GameError, Result};
pub use gateway::Gateway;
pub use matcher::{detailed_match, normalize, unified_match, MatchVerdict};
pub use playback::{PlaybackResolver, SearchBreaker};
pub use protocol::{AckBody, ClientEnvelope, ClientEvent, ServerEvent};
pub use providers::{CatalogSearch, PlaylistPage, PlaylistProvider, TokenVerifier, VerifiedUser};
pub use registry::RoomRegistry;
pub use room::{advance_round, Effect, Room};
pub use store::{MemoryStore, RoomSnapshot, Store};
pub use types::*;
