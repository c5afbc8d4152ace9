//! Protocol gateway: translates client events into engine operations and
//! broadcasts engine-produced events to all members of a room.
//!
//! Each WebSocket connection gets an unbounded outbound channel, so events
//! are delivered per-connection in order. Engine effects are enqueued while
//! the room lock is held, which makes the observed event order match engine
//! commit order across all members. Token verification and playback
//! resolution run outside the room lock.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::playback::PlaybackResolver;
use crate::protocol::{AckBody, ClientEnvelope, ClientEvent, ServerEvent};
use crate::providers::{CatalogSearch, PlaylistProvider, TokenVerifier, VerifiedUser};
use crate::registry::RoomRegistry;
use crate::room::{advance_round, Effect, Room};
use crate::store::{RoomSnapshot, Store};
use crate::types::{generate_conn_id, ServerConfig};

/// Outbound handle for one connected client.
pub struct ConnectionHandle {
    pub tx: mpsc::UnboundedSender<ServerEvent>,
    /// The room this connection currently sits in, if any.
    pub room: Option<String>,
}

/// Shared application state: registry, connection table, capabilities.
pub struct Gateway {
    pub config: ServerConfig,
    pub registry: RoomRegistry,
    pub connections: DashMap<String, ConnectionHandle>,
    pub store: Arc<dyn Store>,
    pub verifier: Option<Arc<dyn TokenVerifier>>,
    pub playlists: Option<Arc<dyn PlaylistProvider>>,
    pub resolver: PlaybackResolver,
}

impl Gateway {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn Store>,
        verifier: Option<Arc<dyn TokenVerifier>>,
        playlists: Option<Arc<dyn PlaylistProvider>>,
        search: Option<Arc<dyn CatalogSearch>>,
    ) -> Arc<Self> {
        let resolver = PlaybackResolver::new(
            search,
            Duration::from_millis(config.search_timeout),
            Duration::from_millis(config.breaker_cooldown),
        );
        Arc::new(Self {
            registry: RoomRegistry::new(store.clone()),
            connections: DashMap::new(),
            store,
            verifier,
            playlists,
            resolver,
            config,
        })
    }

    /// Register a connection and return its handle id. The WebSocket layer
    /// calls this on upgrade; tests call it directly.
    pub fn register_connection(&self) -> (String, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = generate_conn_id();
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections
            .insert(conn_id.clone(), ConnectionHandle { tx, room: None });
        (conn_id, rx)
    }

    /// Route one inbound event to the engine; the returned value becomes the
    /// ack payload.
    pub async fn dispatch(&self, conn: &str, event: ClientEvent) -> Result<Value> {
        match event {
            ClientEvent::CreateRoom => self.create_room(conn).await,
            ClientEvent::JoinRoom { code, name, token } => {
                self.join_room(conn, &code, &name, token).await
            }
            ClientEvent::SetName { code, name } => {
                self.with_room(&code, |room| room.set_name(conn, &name, &self.config))
                    .await
            }
            ClientEvent::StartGame {
                code,
                mode,
                tracks,
                game_type,
            } => {
                self.with_room(&code, |room| {
                    room.start_game(conn, mode, tracks, game_type, &self.config)
                })
                .await
            }
            ClientEvent::NextRound { code } => self.next_round(conn, &code).await,
            ClientEvent::Guess { code, guess_text } => {
                self.with_room(&code, |room| room.guess(conn, &guess_text)).await
            }
            ClientEvent::Chat { code, name, text } => {
                self.with_room(&code, |room| room.chat(conn, &name, &text, &self.config))
                    .await
            }
            ClientEvent::VoteSkip { code } => {
                self.with_room(&code, |room| room.vote_skip(conn)).await
            }
            ClientEvent::Buzz { code } => self.with_room(&code, |room| room.buzz(conn)).await,
            ClientEvent::PassBuzzer { code } => {
                self.with_room(&code, |room| room.pass_buzzer(conn)).await
            }
            ClientEvent::AwardPoints {
                code,
                player_name,
                points,
            } => {
                self.with_room(&code, |room| {
                    room.adjust_points(conn, &player_name, points, true)
                })
                .await
            }
            ClientEvent::DeductPoints {
                code,
                player_name,
                points,
            } => {
                self.with_room(&code, |room| {
                    room.adjust_points(conn, &player_name, points, false)
                })
                .await
            }
            ClientEvent::EndRoundManual { code } => {
                self.with_room(&code, |room| room.end_round_manual(conn)).await
            }
            ClientEvent::HostVerifyGuess {
                code,
                artist,
                title,
            } => {
                let room = self.registry.get(&code).await?;
                let verdict = room.read().await.host_verify(conn, &artist, &title)?;
                Ok(json!({
                    "artistCorrect": verdict.artist_correct,
                    "titleCorrect": verdict.title_correct,
                }))
            }
            ClientEvent::PauseRound { code } => {
                self.with_room(&code, |room| room.set_paused(conn, true)).await
            }
            ClientEvent::ResumeRound { code } => {
                self.with_room(&code, |room| room.set_paused(conn, false)).await
            }
            ClientEvent::KickPlayer { code, target_conn } => {
                self.with_room(&code, |room| room.kick(conn, &target_conn)).await
            }
        }
    }

    /// Tear down a connection: engine-level leave plus connection table
    /// cleanup.
    pub async fn handle_disconnect(&self, conn: &str) {
        let room_code = self.connections.remove(conn).and_then(|(_, handle)| handle.room);
        let Some(code) = room_code else {
            return;
        };
        let Ok(room) = self.registry.get(&code).await else {
            return;
        };
        let (effects, snapshot) = {
            let mut guard = room.write().await;
            let effects = guard.disconnect(conn);
            self.deliver(&guard, &effects);
            let snapshot = (!effects.is_empty()).then(|| guard.to_snapshot());
            (effects, snapshot)
        };
        self.run_side_effects(&code, &effects, snapshot).await;
    }

    // =========================================================================
    // Per-operation plumbing
    // =========================================================================

    async fn create_room(&self, conn: &str) -> Result<Value> {
        let (code, room) = self.registry.create(conn).await?;
        if let Some(mut handle) = self.connections.get_mut(conn) {
            handle.room = Some(code.clone());
        }
        let snapshot_event = room.read().await.snapshot_event();
        self.send_to(conn, snapshot_event);
        info!("room {code} created by {conn}");
        Ok(json!({ "code": code }))
    }

    async fn join_room(
        &self,
        conn: &str,
        code: &str,
        name: &str,
        token: Option<String>,
    ) -> Result<Value> {
        // Verification happens outside the room lock; failure downgrades the
        // member to unauthenticated.
        let verified: Option<VerifiedUser> = match (token, &self.verifier) {
            (Some(token), Some(verifier)) => match verifier.verify(&token).await {
                Ok(user) => Some(user),
                Err(e) => {
                    debug!("token verification failed, joining unauthenticated: {e}");
                    None
                }
            },
            _ => None,
        };

        let room = self.registry.get(code).await?;
        let (effects, snapshot) = {
            let mut guard = room.write().await;
            let effects = guard.join(conn, name, verified.as_ref(), &self.config);
            self.deliver(&guard, &effects);
            let snapshot = Some(guard.to_snapshot());
            (effects, snapshot)
        };
        if let Some(mut handle) = self.connections.get_mut(conn) {
            handle.room = Some(code.to_string());
        }
        self.run_side_effects(code, &effects, snapshot).await;
        Ok(json!({ "code": code, "id": conn }))
    }

    async fn next_round(&self, conn: &str, code: &str) -> Result<Value> {
        let room = self.registry.get(code).await?;
        let mut snapshot = None;
        let effects = advance_round(&room, &self.resolver, conn, &self.config, |room, effects| {
            self.deliver(room, effects);
            snapshot = Some(room.to_snapshot());
        })
        .await?;
        self.run_side_effects(code, &effects, snapshot).await;
        Ok(json!({}))
    }

    /// Run a synchronous engine mutation under the room's write lock,
    /// deliver its effects in commit order, then persist.
    async fn with_room<F>(&self, code: &str, op: F) -> Result<Value>
    where
        F: FnOnce(&mut Room) -> Result<Vec<Effect>>,
    {
        let room = self.registry.get(code).await?;
        let (effects, snapshot) = {
            let mut guard = room.write().await;
            let effects = op(&mut guard)?;
            self.deliver(&guard, &effects);
            let snapshot = (!effects.is_empty()).then(|| guard.to_snapshot());
            (effects, snapshot)
        };
        self.run_side_effects(code, &effects, snapshot).await;
        Ok(json!({}))
    }

    /// Enqueue broadcast and direct events. Called under the room lock;
    /// sends are unbounded and never block.
    fn deliver(&self, room: &Room, effects: &[Effect]) {
        for effect in effects {
            match effect {
                Effect::Broadcast(event) => {
                    for slot in &room.members {
                        self.send_to(&slot.conn, event.clone());
                    }
                }
                Effect::Direct { conn, event } => self.send_to(conn, event.clone()),
                Effect::Leaderboard { .. } | Effect::RemoveRoom => {}
            }
        }
    }

    /// Post-lock consequences: snapshot write-through, leaderboard mirrors,
    /// registry removal, kicked-connection cleanup. Store failures are
    /// logged, never propagated.
    async fn run_side_effects(
        &self,
        code: &str,
        effects: &[Effect],
        snapshot: Option<RoomSnapshot>,
    ) {
        if let Some(snapshot) = snapshot {
            if let Err(e) = self.store.save_room(code, snapshot).await {
                warn!("snapshot save failed for {code}: {e}");
            }
        }
        for effect in effects {
            match effect {
                Effect::Leaderboard {
                    user_id,
                    name,
                    delta,
                } => {
                    if let Err(e) = self
                        .store
                        .increment_leaderboard(user_id, name, *delta)
                        .await
                    {
                        warn!("leaderboard update failed for {user_id}: {e}");
                    }
                }
                Effect::RemoveRoom => {
                    self.registry.remove(code);
                    debug!("room {code} emptied and dropped from registry");
                }
                Effect::Direct {
                    conn,
                    event: ServerEvent::Kicked { .. },
                } => {
                    if let Some(mut handle) = self.connections.get_mut(conn) {
                        handle.room = None;
                    }
                }
                _ => {}
            }
        }
    }

    fn send_to(&self, conn: &str, event: ServerEvent) {
        if let Some(handle) = self.connections.get(conn) {
            let _ = handle.tx.send(event);
        }
    }
}

/// `GET /ws`: upgrade to the bidirectional event surface.
pub async fn ws_handler(State(gateway): State<Arc<Gateway>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(gateway, socket))
}

async fn handle_socket(gateway: Arc<Gateway>, socket: WebSocket) {
    let (conn_id, mut rx) = gateway.register_connection();
    debug!("connection {conn_id} opened");

    let (mut sink, mut stream) = socket.split();

    // Writer task: drains the connection's event queue in order.
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let envelope: ClientEnvelope = match serde_json::from_str(text.as_str()) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        debug!("malformed event from {conn_id}: {e}");
                        continue;
                    }
                };
                let ack = envelope.ack;
                let result = gateway.dispatch(&conn_id, envelope.event).await;
                if let Err(e) = &result {
                    debug!("event from {conn_id} rejected: {e}");
                }
                if let Some(id) = ack {
                    let body = match result {
                        Ok(data) => AckBody::ok(data),
                        Err(e) => AckBody::error(e.to_string()),
                    };
                    gateway.send_to(&conn_id, ServerEvent::Ack { id, body });
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    gateway.handle_disconnect(&conn_id).await;
    writer.abort();
    debug!("connection {conn_id} closed");
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("rooms", &self.registry.len())
            .field("connections", &self.connections.len())
            .finish()
    }
}
