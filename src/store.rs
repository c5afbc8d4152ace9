//! Snapshot, leaderboard, and history adapters around the external store.
//!
//! The in-memory room is authoritative during play; the store is a
//! durability cache that lets rooms survive process restarts. Store failures
//! are logged by callers and never block an in-memory mutation.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::providers::VerifiedUser;
use crate::types::{now_ms, GameType, PlaybackHandle, RoomMode, Track, TrackSource};

/// How many recent playlists are kept per user.
pub const HISTORY_CAP: usize = 10;

/// Persisted view of a member, keyed by stable user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    pub name: String,
    pub score: u32,
}

/// Serializable subset of an in-flight round.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundSnapshot {
    pub track: Track,
    pub playback: PlaybackHandle,
    pub started_at: u64,
    pub solved: bool,
    pub paused: bool,
}

/// Serializable projection of a room used for durability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<RoomMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_type: Option<GameType>,
    pub round_index: usize,
    pub tracks: Vec<Track>,
    pub answers_known: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_round: Option<RoundSnapshot>,
    /// user id -> persisted member
    pub players: HashMap<String, PlayerRecord>,
    /// Monotonic per-room revision; stale snapshots must not overwrite
    /// fresher ones.
    pub revision: u64,
}

/// One leaderboard row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub uid: String,
    pub name: String,
    pub score: u64,
    pub last_updated: u64,
}

/// One recent-playlist entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentPlaylist {
    pub url: String,
    pub name: String,
    pub source: TrackSource,
}

/// External persistence capability.
#[async_trait]
pub trait Store: Send + Sync {
    async fn save_room(&self, code: &str, snapshot: RoomSnapshot) -> Result<()>;
    async fn load_room(&self, code: &str) -> Result<Option<RoomSnapshot>>;
    async fn delete_room(&self, code: &str) -> Result<()>;

    /// Transactional read-modify-write on `(score, name, lastUpdated)`;
    /// creates the row on first increment. Negative deltas clamp at zero.
    async fn increment_leaderboard(&self, user_id: &str, name: &str, delta: i64) -> Result<()>;

    /// Top-N rows by score descending.
    async fn get_leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>>;

    /// Record a parsed playlist in the user's history: deduplicated by URL,
    /// most recent first, capped at [`HISTORY_CAP`]. Returns the updated
    /// list.
    async fn append_recent_playlist(
        &self,
        user_id: &str,
        entry: RecentPlaylist,
    ) -> Result<Vec<RecentPlaylist>>;

    async fn recent_playlists(&self, user_id: &str) -> Result<Vec<RecentPlaylist>>;
}

/// In-memory store used by the default binary and by tests.
#[derive(Default)]
pub struct MemoryStore {
    rooms: RwLock<HashMap<String, RoomSnapshot>>,
    leaderboard: RwLock<HashMap<String, LeaderboardEntry>>,
    history: RwLock<HashMap<String, Vec<RecentPlaylist>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_room(&self, code: &str, snapshot: RoomSnapshot) -> Result<()> {
        let mut rooms = self.rooms.write().await;
        match rooms.get(code) {
            Some(existing) if existing.revision > snapshot.revision => {}
            _ => {
                rooms.insert(code.to_string(), snapshot);
            }
        }
        Ok(())
    }

    async fn load_room(&self, code: &str) -> Result<Option<RoomSnapshot>> {
        Ok(self.rooms.read().await.get(code).cloned())
    }

    async fn delete_room(&self, code: &str) -> Result<()> {
        self.rooms.write().await.remove(code);
        Ok(())
    }

    async fn increment_leaderboard(&self, user_id: &str, name: &str, delta: i64) -> Result<()> {
        let mut board = self.leaderboard.write().await;
        let entry = board.entry(user_id.to_string()).or_insert_with(|| LeaderboardEntry {
            uid: user_id.to_string(),
            name: name.to_string(),
            score: 0,
            last_updated: 0,
        });
        entry.score = entry.score.saturating_add_signed(delta);
        entry.name = name.to_string();
        entry.last_updated = now_ms();
        Ok(())
    }

    async fn get_leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>> {
        let board = self.leaderboard.read().await;
        let mut rows: Vec<LeaderboardEntry> = board.values().cloned().collect();
        rows.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name)));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn append_recent_playlist(
        &self,
        user_id: &str,
        entry: RecentPlaylist,
    ) -> Result<Vec<RecentPlaylist>> {
        let mut history = self.history.write().await;
        let list = history.entry(user_id.to_string()).or_default();
        list.retain(|e| e.url != entry.url);
        list.insert(0, entry);
        list.truncate(HISTORY_CAP);
        Ok(list.clone())
    }

    async fn recent_playlists(&self, user_id: &str) -> Result<Vec<RecentPlaylist>> {
        Ok(self
            .history
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Verifier that accepts no credentials; every join stays unauthenticated.
#[derive(Debug, Default)]
pub struct NullVerifier;

#[async_trait]
impl crate::providers::TokenVerifier for NullVerifier {
    async fn verify(&self, _token: &str) -> Result<VerifiedUser> {
        Err(crate::error::GameError::Upstream(
            "no token verifier configured".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playlist(url: &str) -> RecentPlaylist {
        RecentPlaylist {
            url: url.to_string(),
            name: format!("list {url}"),
            source: TrackSource::Catalog,
        }
    }

    #[tokio::test]
    async fn save_and_load_room_roundtrip() {
        let store = MemoryStore::new();
        let snap = RoomSnapshot {
            code: "ABC123".to_string(),
            host_user: Some("u1".to_string()),
            mode: Some(RoomMode::CatalogPreview),
            game_type: Some(GameType::Text),
            round_index: 2,
            tracks: vec![],
            answers_known: true,
            current_round: None,
            players: HashMap::new(),
            revision: 5,
        };
        store.save_room("ABC123", snap.clone()).await.unwrap();
        let loaded = store.load_room("ABC123").await.unwrap().unwrap();
        assert_eq!(loaded.round_index, 2);
        assert_eq!(loaded.host_user.as_deref(), Some("u1"));

        store.delete_room("ABC123").await.unwrap();
        assert!(store.load_room("ABC123").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_snapshot_does_not_overwrite() {
        let store = MemoryStore::new();
        let mut snap = RoomSnapshot {
            code: "ABC123".to_string(),
            host_user: None,
            mode: None,
            game_type: None,
            round_index: 3,
            tracks: vec![],
            answers_known: false,
            current_round: None,
            players: HashMap::new(),
            revision: 10,
        };
        store.save_room("ABC123", snap.clone()).await.unwrap();

        snap.revision = 4;
        snap.round_index = 1;
        store.save_room("ABC123", snap).await.unwrap();

        let loaded = store.load_room("ABC123").await.unwrap().unwrap();
        assert_eq!(loaded.round_index, 3);
    }

    #[tokio::test]
    async fn leaderboard_increments_and_ranks() {
        let store = MemoryStore::new();
        store.increment_leaderboard("u1", "Alice", 10).await.unwrap();
        store.increment_leaderboard("u2", "Bob", 5).await.unwrap();
        store.increment_leaderboard("u1", "Alice", 5).await.unwrap();

        let rows = store.get_leaderboard(10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].uid, "u1");
        assert_eq!(rows[0].score, 15);
        assert_eq!(rows[1].score, 5);

        let top1 = store.get_leaderboard(1).await.unwrap();
        assert_eq!(top1.len(), 1);
    }

    #[tokio::test]
    async fn history_dedupes_and_caps() {
        let store = MemoryStore::new();
        for i in 0..12 {
            store
                .append_recent_playlist("u1", playlist(&format!("url-{i}")))
                .await
                .unwrap();
        }
        let list = store.recent_playlists("u1").await.unwrap();
        assert_eq!(list.len(), HISTORY_CAP);
        assert_eq!(list[0].url, "url-11");

        // Re-adding an existing URL moves it to the head without growing.
        let updated = store
            .append_recent_playlist("u1", playlist("url-5"))
            .await
            .unwrap();
        assert_eq!(updated.len(), HISTORY_CAP);
        assert_eq!(updated[0].url, "url-5");
        assert_eq!(
            updated.iter().filter(|e| e.url == "url-5").count(),
            1
        );
    }
}
