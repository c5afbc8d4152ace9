//! Router assembly and server lifecycle.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use crate::gateway::{ws_handler, Gateway};
use crate::rest;

/// Assemble the REST + WebSocket router.
pub fn build_router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/api/parse-playlist", post(rest::parse_playlist))
        .route("/api/leaderboard", get(rest::leaderboard))
        .route("/api/playlist-history", get(rest::playlist_history))
        .route("/api/room/{code}/share", get(rest::room_share))
        .route("/ws", get(ws_handler))
        .route("/health", get(|| async { "OK" }))
        .layer(middleware::from_fn_with_state(gateway.clone(), cors))
        .with_state(gateway)
}

/// Bind and serve until ctrl-c.
pub async fn serve(gateway: Arc<Gateway>) -> std::io::Result<()> {
    let addr = format!("0.0.0.0:{}", gateway.config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("tune-arena listening on {addr}");
    axum::serve(listener, build_router(gateway))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

/// Origin allow-list from configuration; "*" allows any origin but still
/// echoes the concrete origin back.
async fn cors(State(gateway): State<Arc<Gateway>>, request: Request, next: Next) -> Response {
    let origin = request.headers().get(header::ORIGIN).cloned();
    let allowed = origin
        .as_ref()
        .and_then(|o| o.to_str().ok())
        .map(|o| {
            gateway
                .config
                .allowed_origins
                .iter()
                .any(|a| a == "*" || a == o)
        })
        .unwrap_or(false);

    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        if allowed {
            apply_cors_headers(&mut response, origin.as_ref());
        }
        return response;
    }

    let mut response = next.run(request).await;
    if allowed {
        apply_cors_headers(&mut response, origin.as_ref());
    }
    response
}

fn apply_cors_headers(response: &mut Response, origin: Option<&HeaderValue>) {
    let Some(origin) = origin else { return };
    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("content-type, authorization"),
    );
}
