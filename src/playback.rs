//! Playback resolution across heterogeneous media providers.
//!
//! Given a track and the room's playlist source mode, produce a playable
//! handle: a catalog audio preview or a resolved video id. Catalog search is
//! the fallback, with a process-wide circuit breaker on quota exhaustion of
//! the official search API.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::GameError;
use crate::providers::CatalogSearch;
use crate::types::{PlaybackHandle, RoomMode, Track, TrackSource};

/// Process-wide suppression of the official search API after a quota
/// failure. Coarse-grained locking; read often, written rarely.
#[derive(Debug)]
pub struct SearchBreaker {
    down_until: Mutex<Option<Instant>>,
    cooldown: Duration,
}

impl SearchBreaker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            down_until: Mutex::new(None),
            cooldown,
        }
    }

    /// Is the official search API currently suppressed?
    pub fn is_search_down(&self) -> bool {
        let mut guard = self.down_until.lock().unwrap();
        match *guard {
            Some(deadline) if Instant::now() < deadline => true,
            Some(_) => {
                *guard = None;
                false
            }
            None => false,
        }
    }

    /// Suppress the official API until the cooldown elapses.
    pub fn trip(&self) {
        let deadline = Instant::now() + self.cooldown;
        *self.down_until.lock().unwrap() = Some(deadline);
        warn!("search quota exhausted, official API suppressed for {:?}", self.cooldown);
    }
}

/// Resolves tracks to playable handles.
pub struct PlaybackResolver {
    search: Option<Arc<dyn CatalogSearch>>,
    breaker: SearchBreaker,
    timeout: Duration,
}

impl PlaybackResolver {
    pub fn new(
        search: Option<Arc<dyn CatalogSearch>>,
        search_timeout: Duration,
        breaker_cooldown: Duration,
    ) -> Self {
        Self {
            search,
            breaker: SearchBreaker::new(breaker_cooldown),
            timeout: search_timeout,
        }
    }

    pub fn is_search_down(&self) -> bool {
        self.breaker.is_search_down()
    }

    /// Resolve a track for the given room mode.
    ///
    /// Never fails: upstream errors are swallowed and logged, and `None`
    /// tells the engine to skip this track and try the next index.
    pub async fn resolve(&self, track: &Track, mode: RoomMode) -> Option<PlaybackHandle> {
        match mode {
            RoomMode::CatalogPreview => {
                if let Some(video_id) = &track.video_id {
                    return Some(PlaybackHandle::Video {
                        video_id: video_id.clone(),
                    });
                }
                if let Some(preview_url) = &track.preview_url {
                    return Some(PlaybackHandle::Audio {
                        preview_url: preview_url.clone(),
                        cover: track.cover.clone(),
                    });
                }
                self.search_video(track).await
            }
            RoomMode::VideoSite => {
                if track.source == TrackSource::VideoSite {
                    let video_id = track.video_id.clone().unwrap_or_else(|| track.id.clone());
                    return Some(PlaybackHandle::Video { video_id });
                }
                self.search_video(track).await
            }
        }
    }

    /// Search the video site for `"<title> <artist>"`: scraper first, then
    /// the official API unless the breaker is open.
    async fn search_video(&self, track: &Track) -> Option<PlaybackHandle> {
        let search = self.search.as_ref()?;
        let query = format!("{} {}", track.title, track.artist);

        match tokio::time::timeout(self.timeout, search.scrape_search(&query)).await {
            Ok(Ok(Some(hit))) => {
                return Some(PlaybackHandle::Video {
                    video_id: hit.video_id,
                });
            }
            Ok(Ok(None)) => debug!("scrape search empty for {query:?}"),
            Ok(Err(e)) => warn!("scrape search failed for {query:?}: {e}"),
            Err(_) => warn!("scrape search timed out for {query:?}"),
        }

        if self.breaker.is_search_down() {
            debug!("official search suppressed, skipping {query:?}");
            return None;
        }

        match tokio::time::timeout(self.timeout, search.api_search(&query)).await {
            Ok(Ok(Some(hit))) => Some(PlaybackHandle::Video {
                video_id: hit.video_id,
            }),
            Ok(Ok(None)) => None,
            Ok(Err(GameError::QuotaExceeded)) => {
                self.breaker.trip();
                None
            }
            Ok(Err(e)) => {
                warn!("official search failed for {query:?}: {e}");
                None
            }
            Err(_) => {
                warn!("official search timed out for {query:?}");
                None
            }
        }
    }
}
