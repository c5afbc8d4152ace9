//! REST surface: playlist parsing, leaderboard, playlist history, and room
//! share links. Handlers stay thin and delegate to the capabilities wired
//! into the gateway.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::error::GameError;
use crate::gateway::Gateway;
use crate::qr::{self, QrOptions};
use crate::store::{LeaderboardEntry, RecentPlaylist};
use crate::types::TrackSource;

/// How many leaderboard rows the public endpoint returns.
const LEADERBOARD_LIMIT: usize = 10;

impl IntoResponse for GameError {
    fn into_response(self) -> Response {
        let status = match &self {
            GameError::Input(_) | GameError::Serialization(_) => StatusCode::BAD_REQUEST,
            GameError::RoomNotFound => StatusCode::NOT_FOUND,
            GameError::Permission(_) => StatusCode::FORBIDDEN,
            GameError::NoRound | GameError::WrongMode | GameError::State(_) => {
                StatusCode::CONFLICT
            }
            GameError::QuotaExceeded | GameError::Upstream(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsePlaylistRequest {
    pub url: String,
    #[serde(default)]
    pub song_count: Option<usize>,
    #[serde(default)]
    pub token: Option<String>,
}

/// `POST /api/parse-playlist`: resolve a playlist URL into its track
/// listing; with a verified token, the playlist is also recorded in the
/// user's history and the updated list is returned.
pub async fn parse_playlist(
    State(gateway): State<Arc<Gateway>>,
    Json(request): Json<ParsePlaylistRequest>,
) -> Result<Response, GameError> {
    let provider = gateway.playlists.as_ref().ok_or_else(|| {
        GameError::Input("no playlist provider credentials configured".to_string())
    })?;
    let page = provider
        .parse_playlist(&request.url, request.song_count)
        .await?;

    let playable = page
        .tracks
        .iter()
        .filter(|t| {
            t.preview_url.is_some() || t.video_id.is_some() || t.source == TrackSource::VideoSite
        })
        .count();

    let updated_history = match (&request.token, &gateway.verifier) {
        (Some(token), Some(verifier)) => match verifier.verify(token).await {
            Ok(user) => {
                let entry = RecentPlaylist {
                    url: request.url.clone(),
                    name: page.playlist_name.clone(),
                    source: page.source,
                };
                match gateway
                    .store
                    .append_recent_playlist(&user.user_id, entry)
                    .await
                {
                    Ok(history) => Some(history),
                    Err(e) => {
                        warn!("playlist history append failed: {e}");
                        None
                    }
                }
            }
            Err(_) => None,
        },
        _ => None,
    };

    let mut body = json!({
        "source": page.source,
        "playlistId": page.playlist_id,
        "playlistName": page.playlist_name,
        "total": page.total,
        "playable": playable,
        "tracks": page.tracks,
    });
    if let Some(history) = updated_history {
        body["updatedHistory"] = serde_json::to_value(history)?;
    }
    Ok(Json(body).into_response())
}

/// `GET /api/leaderboard`: top rows by score descending.
pub async fn leaderboard(
    State(gateway): State<Arc<Gateway>>,
) -> Result<Json<Vec<LeaderboardEntry>>, GameError> {
    Ok(Json(gateway.store.get_leaderboard(LEADERBOARD_LIMIT).await?))
}

/// `GET /api/playlist-history`: the authenticated user's recent playlists,
/// most recent first.
pub async fn playlist_history(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
) -> Result<Json<Vec<RecentPlaylist>>, GameError> {
    let token = bearer_token(&headers)
        .ok_or_else(|| GameError::Input("missing bearer token".to_string()))?;
    let verifier = gateway
        .verifier
        .as_ref()
        .ok_or_else(|| GameError::Input("no token verifier configured".to_string()))?;
    let user = verifier
        .verify(&token)
        .await
        .map_err(|_| GameError::Permission("invalid token".to_string()))?;
    Ok(Json(gateway.store.recent_playlists(&user.user_id).await?))
}

/// `GET /api/room/{code}/share`: join URL and a QR code for it.
pub async fn room_share(
    Path(code): Path<String>,
    State(gateway): State<Arc<Gateway>>,
) -> Result<Response, GameError> {
    let code = code.trim().to_uppercase();
    gateway.registry.get(&code).await?;

    let url = match &gateway.config.base_url {
        Some(base) => format!("{base}/room/{code}"),
        None => format!("/room/{code}"),
    };
    let svg = qr::generate_qr_svg(&url, &QrOptions::default()).map_err(GameError::Upstream)?;
    Ok(Json(json!({ "url": url, "qrSvg": svg })).into_response())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}
