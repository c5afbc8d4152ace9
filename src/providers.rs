//! Capabilities consumed from external collaborators.
//!
//! The core never talks to a concrete catalog, video site, or identity
//! service; embedders wire implementations of these traits in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Track, TrackSource};

/// A verified identity derived from a bearer credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedUser {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

/// Turns a bearer credential into a stable user identity.
///
/// Verification failure is never fatal for joining; the caller downgrades
/// the member to unauthenticated.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedUser>;
}

/// A playlist resolved from a provider URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistPage {
    pub source: TrackSource,
    pub playlist_id: String,
    pub playlist_name: String,
    pub total: usize,
    pub tracks: Vec<Track>,
}

/// Enumerates playlists from the music-catalog providers.
#[async_trait]
pub trait PlaylistProvider: Send + Sync {
    /// Resolve a playlist URL into its track listing, capped at
    /// `song_count` entries when given.
    ///
    /// Unrecognized URLs are an input error; provider outages are upstream
    /// errors.
    async fn parse_playlist(&self, url: &str, song_count: Option<usize>) -> Result<PlaylistPage>;
}

/// A single video search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoHit {
    pub video_id: String,
    pub title: String,
}

/// Searches the video site's catalog for a playable video.
#[async_trait]
pub trait CatalogSearch: Send + Sync {
    /// Quota-free search (scraper). Preferred.
    async fn scrape_search(&self, query: &str) -> Result<Option<VideoHit>>;

    /// Official search API. Subject to quota; a quota failure must surface
    /// as [`crate::GameError::QuotaExceeded`].
    async fn api_search(&self, query: &str) -> Result<Option<VideoHit>>;
}
