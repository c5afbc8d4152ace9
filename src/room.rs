//! Room engine: the state machine of a single game room.
//!
//! Membership, host handover, round progression, scoring, skip voting, and
//! the buzzer protocol all live here. Mutations are synchronous and return a
//! list of [`Effect`]s that the gateway delivers in commit order; the only
//! async entry point is [`advance_round`], which drives the playback resolver
//! outside the room lock and re-acquires it to commit.

use std::cmp::Reverse;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{GameError, Result};
use crate::matcher::{self, MatchVerdict};
use crate::playback::PlaybackResolver;
use crate::protocol::{BuzzerView, PlayerView, QueueView, RoundView, ScoreView, ServerEvent};
use crate::providers::VerifiedUser;
use crate::store::{PlayerRecord, RoomSnapshot, RoundSnapshot};
use crate::types::{
    clip, now_ms, pending_conn, Buzzer, BuzzEntry, GameType, Member, MemberSlot, PlaybackHandle,
    Round, RoomMode, ServerConfig, Track,
};

/// Points for a fully correct answer.
pub const FULL_POINTS: u32 = 10;
/// Points for identifying the title only.
pub const TITLE_POINTS: u32 = 5;

/// Externally visible consequence of an engine mutation. The gateway
/// delivers these in the order the engine produced them.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send to every member of the room.
    Broadcast(ServerEvent),
    /// Send to a single connection.
    Direct { conn: String, event: ServerEvent },
    /// Mirror a score change to the leaderboard.
    Leaderboard {
        user_id: String,
        name: String,
        delta: i64,
    },
    /// The room has no members left; drop it from the registry.
    RemoveRoom,
}

/// A game session identified by a short code.
#[derive(Debug, Clone)]
pub struct Room {
    pub code: String,
    /// Connection handle currently holding host rights; empty while the
    /// host is disconnected and nobody has inherited yet.
    pub host_conn: String,
    /// Stable identity that owns host rights across reconnects.
    pub host_user: Option<String>,
    pub members: Vec<MemberSlot>,
    pub mode: Option<RoomMode>,
    pub game_type: Option<GameType>,
    /// The round pool, already shuffled at game start.
    pub tracks: Vec<Track>,
    /// Number of rounds started so far; the next round uses this index.
    pub round_index: usize,
    pub current_round: Option<Round>,
    pub skip_votes: HashSet<String>,
    pub answers_known: bool,
    pub revision: u64,
}

impl Room {
    pub fn new(code: impl Into<String>, host_conn: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            host_conn: host_conn.into(),
            host_user: None,
            members: Vec::new(),
            mode: None,
            game_type: None,
            tracks: Vec::new(),
            round_index: 0,
            current_round: None,
            skip_votes: HashSet::new(),
            answers_known: false,
            revision: 0,
        }
    }

    /// Reconstruct a room from a persisted snapshot. Nobody is connected, so
    /// members get sentinel handles until their users reattach.
    pub fn from_snapshot(snap: RoomSnapshot) -> Self {
        let members = snap
            .players
            .iter()
            .map(|(uid, rec)| MemberSlot {
                conn: pending_conn(uid),
                member: Member {
                    name: rec.name.clone(),
                    score: rec.score,
                    user_id: Some(uid.clone()),
                    avatar: None,
                },
            })
            .collect();
        Self {
            code: snap.code,
            host_conn: String::new(),
            host_user: snap.host_user,
            members,
            mode: snap.mode,
            game_type: snap.game_type,
            tracks: snap.tracks,
            round_index: snap.round_index,
            current_round: snap.current_round.map(|r| {
                let mut round = Round::new(r.track, r.playback);
                round.started_at = r.started_at;
                round.solved = r.solved;
                round.paused = r.paused;
                round
            }),
            skip_votes: HashSet::new(),
            answers_known: snap.answers_known,
            revision: snap.revision,
        }
    }

    /// Serializable projection for durability; bumps the revision.
    pub fn to_snapshot(&mut self) -> RoomSnapshot {
        self.revision += 1;
        RoomSnapshot {
            code: self.code.clone(),
            host_user: self.host_user.clone(),
            mode: self.mode,
            game_type: self.game_type,
            round_index: self.round_index,
            tracks: self.tracks.clone(),
            answers_known: self.answers_known,
            current_round: self.current_round.as_ref().map(|r| RoundSnapshot {
                track: r.track.clone(),
                playback: r.playback.clone(),
                started_at: r.started_at,
                solved: r.solved,
                paused: r.paused,
            }),
            players: self
                .members
                .iter()
                .filter_map(|s| {
                    s.member.user_id.as_ref().map(|uid| {
                        (
                            uid.clone(),
                            PlayerRecord {
                                name: s.member.name.clone(),
                                score: s.member.score,
                            },
                        )
                    })
                })
                .collect(),
            revision: self.revision,
        }
    }

    // =========================================================================
    // Membership
    // =========================================================================

    /// Join a connection into the room, resolving identity against the
    /// host-user and any existing member with the same user id.
    pub fn join(
        &mut self,
        conn: &str,
        requested_name: &str,
        verified: Option<&VerifiedUser>,
        config: &ServerConfig,
    ) -> Vec<Effect> {
        if let Some(user) = verified {
            // Host reattach: the stable identity owns host rights.
            if self.host_user.as_deref() == Some(user.user_id.as_str()) {
                self.host_conn = conn.to_string();
                info!("host {} reattached to room {}", user.user_id, self.code);
            }
            // First-login adoption: the creating connection logs in.
            if self.host_user.is_none() && self.host_conn == conn {
                self.host_user = Some(user.user_id.clone());
            }
            // Migrate an existing member (including pending-... sentinels)
            // to the new handle, preserving the score.
            if let Some(idx) = self
                .members
                .iter()
                .position(|s| s.member.user_id.as_deref() == Some(user.user_id.as_str()))
            {
                let old_conn = self.members[idx].conn.clone();
                if old_conn != conn {
                    self.members[idx].conn = conn.to_string();
                    self.skip_votes.remove(&old_conn);
                    self.retarget_buzzer(&old_conn, conn);
                }
                if let Some(url) = &user.photo_url {
                    self.members[idx].member.avatar = Some(url.clone());
                }
                let name = self.members[idx].member.name.clone();
                return vec![
                    self.system_chat(format!("{name} joined the room")),
                    self.snapshot_broadcast(),
                ];
            }
        }

        // A connection that is already a member just gets a fresh snapshot.
        if self.member_index(conn).is_some() {
            return vec![self.snapshot_broadcast()];
        }

        let mut name = clip(requested_name, config.max_name_len);
        if name.is_empty() {
            name = "Player".to_string();
        }
        let name = self.unique_name(&name, None);

        self.members.push(MemberSlot {
            conn: conn.to_string(),
            member: Member {
                name: name.clone(),
                score: 0,
                user_id: verified.map(|u| u.user_id.clone()),
                avatar: verified.and_then(|u| u.photo_url.clone()),
            },
        });

        vec![
            self.system_chat(format!("{name} joined the room")),
            self.snapshot_broadcast(),
        ]
    }

    /// Rename a member; collisions get a random `#N` suffix.
    pub fn set_name(&mut self, conn: &str, name: &str, config: &ServerConfig) -> Result<Vec<Effect>> {
        let name = clip(name, config.max_name_len);
        if name.is_empty() {
            return Err(GameError::Input("name must not be empty".to_string()));
        }
        let idx = self
            .member_index(conn)
            .ok_or_else(|| GameError::Input("not a member of this room".to_string()))?;

        let taken = self
            .members
            .iter()
            .any(|s| s.conn != conn && s.member.name == name);
        let final_name = if taken {
            let mut rng = rand::thread_rng();
            loop {
                let candidate = format!("{name}#{}", rng.gen_range(1..=99));
                if !self.members.iter().any(|s| s.member.name == candidate) {
                    break candidate;
                }
            }
        } else {
            name
        };

        self.members[idx].member.name = final_name;
        Ok(vec![self.snapshot_broadcast()])
    }

    /// Remove a connection from the room: tidy the buzzer, hand over the
    /// host, and signal room removal when the last member leaves.
    pub fn disconnect(&mut self, conn: &str) -> Vec<Effect> {
        let Some(idx) = self.member_index(conn) else {
            return Vec::new();
        };
        let name = self.members[idx].member.name.clone();
        self.members.remove(idx);
        self.skip_votes.remove(conn);

        let mut effects = vec![self.system_chat(format!("{name} left the room"))];
        effects.extend(self.tidy_buzzer_on_leave(conn));

        if self.host_conn == conn {
            if let Some(first) = self.members.first() {
                self.host_conn = first.conn.clone();
                info!(
                    "host left room {}, transferred to {}",
                    self.code, self.host_conn
                );
            } else {
                self.host_conn = String::new();
            }
        }

        if self.members.is_empty() {
            effects.push(Effect::RemoveRoom);
        } else {
            effects.push(self.snapshot_broadcast());
        }
        effects
    }

    /// Force a member out of the room (host only).
    pub fn kick(&mut self, caller: &str, target_conn: &str) -> Result<Vec<Effect>> {
        self.require_host(caller)?;
        if self.member_index(target_conn).is_none() {
            return Err(GameError::Input("no such player".to_string()));
        }
        let mut effects = vec![Effect::Direct {
            conn: target_conn.to_string(),
            event: ServerEvent::Kicked {
                message: "You have been removed from the room".to_string(),
            },
        }];
        effects.extend(self.disconnect(target_conn));
        Ok(effects)
    }

    // =========================================================================
    // Game lifecycle
    // =========================================================================

    /// Start a game: fix mode and game type, shuffle the pool, reset round
    /// state (host only).
    pub fn start_game(
        &mut self,
        caller: &str,
        mode: RoomMode,
        tracks: Vec<Track>,
        game_type: GameType,
        config: &ServerConfig,
    ) -> Result<Vec<Effect>> {
        self.require_host(caller)?;
        if tracks.len() < config.min_tracks {
            return Err(GameError::Input(format!(
                "at least {} track(s) required",
                config.min_tracks
            )));
        }

        let mut pool = tracks;
        pool.shuffle(&mut rand::thread_rng());

        self.mode = Some(mode);
        self.game_type = Some(game_type);
        self.tracks = pool;
        self.answers_known = true;
        self.round_index = 0;
        self.current_round = None;
        self.skip_votes.clear();

        info!(
            "game started in room {}: {} tracks, {:?}/{:?}",
            self.code,
            self.tracks.len(),
            mode,
            game_type
        );
        Ok(vec![
            Effect::Broadcast(ServerEvent::GameStarted { mode, game_type }),
            self.snapshot_broadcast(),
        ])
    }

    /// Index one past the last playable round, honoring the round-limit knob.
    pub fn round_pool_end(&self, config: &ServerConfig) -> usize {
        match config.round_limit {
            Some(limit) => self.tracks.len().min(limit),
            None => self.tracks.len(),
        }
    }

    /// Commit a resolved track as the current round.
    fn commit_round(&mut self, index: usize, playback: PlaybackHandle) -> Vec<Effect> {
        let round = Round::new(self.tracks[index].clone(), playback);
        let event = ServerEvent::RoundStart {
            mode: self.mode.expect("mode fixed at game start"),
            game_type: self.game_type.expect("game type fixed at game start"),
            started_at: round.started_at,
            hint: round.hint,
            playback: round.playback.clone(),
        };
        self.current_round = Some(round);
        self.round_index = index + 1;
        self.skip_votes.clear();
        vec![Effect::Broadcast(event), self.snapshot_broadcast()]
    }

    /// End the game: clear the round and publish final scores.
    fn finish_game(&mut self) -> Vec<Effect> {
        self.current_round = None;
        info!("game over in room {}", self.code);
        vec![
            Effect::Broadcast(ServerEvent::GameOver {
                scores: self.scoreboard(),
            }),
            self.snapshot_broadcast(),
        ]
    }

    // =========================================================================
    // Round control
    // =========================================================================

    /// Pause or resume the current round (host only).
    pub fn set_paused(&mut self, caller: &str, paused: bool) -> Result<Vec<Effect>> {
        self.require_host(caller)?;
        let round = self.active_round_mut()?;
        round.paused = paused;
        let event = if paused {
            ServerEvent::PausePlayback
        } else {
            ServerEvent::ResumePlayback
        };
        Ok(vec![Effect::Broadcast(event), self.snapshot_broadcast()])
    }

    /// Vote to skip the current round; a strict majority ends it unwon.
    pub fn vote_skip(&mut self, conn: &str) -> Result<Vec<Effect>> {
        self.member_index(conn)
            .ok_or_else(|| GameError::Input("not a member of this room".to_string()))?;
        self.active_round()?;
        self.skip_votes.insert(conn.to_string());

        let mut effects = Vec::new();
        if self.skip_votes.len() * 2 > self.members.len() {
            let round = self.active_round_mut()?;
            round.solved = true;
            let answer = round.answer.clone();
            let elapsed = now_ms().saturating_sub(round.started_at);
            effects.push(Effect::Broadcast(ServerEvent::RoundEnd {
                winner: None,
                answer,
                elapsed_ms: elapsed,
                scores: self.scoreboard(),
                skipped: Some(true),
            }));
        }
        effects.push(self.snapshot_broadcast());
        Ok(effects)
    }

    // =========================================================================
    // Text mode
    // =========================================================================

    /// Evaluate a typed guess; the first non-zero guess ends the round.
    pub fn guess(&mut self, conn: &str, text: &str) -> Result<Vec<Effect>> {
        if self.game_type != Some(GameType::Text) {
            return Err(GameError::WrongMode);
        }
        let member_idx = self
            .member_index(conn)
            .ok_or_else(|| GameError::Input("not a member of this room".to_string()))?;
        let round = self.active_round()?;

        let verdict =
            matcher::detailed_match("", text, &round.answer.artist, &round.answer.title);
        let points = if verdict.artist_correct && verdict.title_correct {
            FULL_POINTS
        } else if verdict.title_correct {
            TITLE_POINTS
        } else {
            0
        };
        if points == 0 {
            return Ok(Vec::new());
        }

        let round = self.active_round_mut()?;
        round.solved = true;
        let answer = round.answer.clone();
        let elapsed = now_ms().saturating_sub(round.started_at);

        let member = &mut self.members[member_idx].member;
        member.score += points;
        let winner = member.name.clone();
        let user_id = member.user_id.clone();

        let mut effects = Vec::new();
        if let Some(uid) = user_id {
            effects.push(Effect::Leaderboard {
                user_id: uid,
                name: winner.clone(),
                delta: i64::from(points),
            });
        }
        effects.push(Effect::Broadcast(ServerEvent::RoundEnd {
            winner: Some(winner),
            answer,
            elapsed_ms: elapsed,
            scores: self.scoreboard(),
            skipped: None,
        }));
        effects.push(self.snapshot_broadcast());
        Ok(effects)
    }

    // =========================================================================
    // Buzzer mode
    // =========================================================================

    /// Register a buzz: the first caller becomes the holder and playback
    /// pauses; later callers queue up. Duplicates are no-ops.
    pub fn buzz(&mut self, conn: &str) -> Result<Vec<Effect>> {
        if self.game_type != Some(GameType::Buzzer) {
            return Err(GameError::WrongMode);
        }
        let name = self
            .member_name(conn)
            .ok_or_else(|| GameError::Input("not a member of this room".to_string()))?;
        let round = self.active_round_mut()?;
        let at = now_ms();

        if round.buzzer.is_none() {
            round.buzzer = Some(Buzzer {
                first_buzz_at: at,
                holder: conn.to_string(),
                holder_name: name.clone(),
                queue: VecDeque::new(),
            });
            round.paused = true;
            return Ok(vec![
                Effect::Broadcast(ServerEvent::PausePlayback),
                Effect::Broadcast(ServerEvent::Buzzed {
                    id: conn.to_string(),
                    name,
                    at,
                }),
                Effect::Broadcast(ServerEvent::QueueUpdated { queue: Vec::new() }),
                self.snapshot_broadcast(),
            ]);
        }

        let Some(buzzer) = round.buzzer.as_mut() else {
            return Ok(Vec::new());
        };
        if buzzer.holder == conn || buzzer.queue.iter().any(|e| e.conn == conn) {
            return Ok(Vec::new());
        }
        buzzer.queue.push_back(BuzzEntry {
            conn: conn.to_string(),
            name,
            at,
        });
        let queue = Self::queue_view(buzzer);
        Ok(vec![
            Effect::Broadcast(ServerEvent::QueueUpdated { queue }),
            self.snapshot_broadcast(),
        ])
    }

    /// Rotate the buzzer to the next queued player, or clear it and resume
    /// playback when the queue is empty (host only).
    pub fn pass_buzzer(&mut self, caller: &str) -> Result<Vec<Effect>> {
        self.require_host(caller)?;
        if self.game_type != Some(GameType::Buzzer) {
            return Err(GameError::WrongMode);
        }
        let round = self.active_round_mut()?;
        let Some(buzzer) = round.buzzer.as_mut() else {
            return Err(GameError::State("nobody has buzzed".to_string()));
        };

        if let Some(next) = buzzer.queue.pop_front() {
            buzzer.holder = next.conn.clone();
            buzzer.holder_name = next.name.clone();
            let queue = Self::queue_view(buzzer);
            round.paused = true;
            Ok(vec![
                Effect::Broadcast(ServerEvent::Buzzed {
                    id: next.conn,
                    name: next.name,
                    at: next.at,
                }),
                Effect::Broadcast(ServerEvent::QueueUpdated { queue }),
                Effect::Broadcast(ServerEvent::PausePlayback),
                self.snapshot_broadcast(),
            ])
        } else {
            round.buzzer = None;
            round.paused = false;
            Ok(vec![
                Effect::Broadcast(ServerEvent::BuzzCleared),
                Effect::Broadcast(ServerEvent::ResumePlayback),
                self.snapshot_broadcast(),
            ])
        }
    }

    /// Adjust a member's score by name (host only). Deductions clamp at
    /// zero; changes mirror to the leaderboard for identified members.
    pub fn adjust_points(
        &mut self,
        caller: &str,
        player_name: &str,
        points: Option<u32>,
        award: bool,
    ) -> Result<Vec<Effect>> {
        self.require_host(caller)?;
        let points = points.unwrap_or(FULL_POINTS);
        let slot = self
            .members
            .iter_mut()
            .find(|s| s.member.name == player_name)
            .ok_or_else(|| GameError::Input("no such player".to_string()))?;

        let delta = if award {
            slot.member.score += points;
            i64::from(points)
        } else {
            let applied = points.min(slot.member.score);
            slot.member.score -= applied;
            -i64::from(applied)
        };

        let mut effects = Vec::new();
        if let Some(uid) = &slot.member.user_id {
            effects.push(Effect::Leaderboard {
                user_id: uid.clone(),
                name: slot.member.name.clone(),
                delta,
            });
        }
        effects.push(self.snapshot_broadcast());
        Ok(effects)
    }

    /// End the round by host decision; the current buzzer holder (if any)
    /// is the winner, timed from the first buzz.
    pub fn end_round_manual(&mut self, caller: &str) -> Result<Vec<Effect>> {
        self.require_host(caller)?;
        let round = self.active_round_mut()?;
        round.solved = true;
        let answer = round.answer.clone();
        let (winner, elapsed) = match &round.buzzer {
            Some(b) => (
                Some(b.holder_name.clone()),
                b.first_buzz_at.saturating_sub(round.started_at),
            ),
            None => (None, now_ms().saturating_sub(round.started_at)),
        };
        Ok(vec![
            Effect::Broadcast(ServerEvent::RoundEnd {
                winner,
                answer,
                elapsed_ms: elapsed,
                scores: self.scoreboard(),
                skipped: None,
            }),
            self.snapshot_broadcast(),
        ])
    }

    /// Advisory verdict on an artist/title pair (host only); no state change.
    pub fn host_verify(&self, caller: &str, artist: &str, title: &str) -> Result<MatchVerdict> {
        self.require_host(caller)?;
        let round = self.active_round()?;
        Ok(matcher::detailed_match(
            artist,
            title,
            &round.answer.artist,
            &round.answer.title,
        ))
    }

    // =========================================================================
    // Chat
    // =========================================================================

    /// Relay a chat line to the room, clipped to the configured length.
    pub fn chat(
        &self,
        conn: &str,
        name: &str,
        text: &str,
        config: &ServerConfig,
    ) -> Result<Vec<Effect>> {
        self.member_index(conn)
            .ok_or_else(|| GameError::Input("not a member of this room".to_string()))?;
        let text = clip(text, config.max_chat_len);
        if text.is_empty() {
            return Err(GameError::Input("message must not be empty".to_string()));
        }
        Ok(vec![Effect::Broadcast(ServerEvent::Chat {
            name: Some(clip(name, config.max_name_len)),
            text,
            system: None,
            at: now_ms(),
        })])
    }

    // =========================================================================
    // Views
    // =========================================================================

    /// The `roomState` snapshot broadcast after every visible mutation.
    pub fn snapshot_event(&self) -> ServerEvent {
        ServerEvent::RoomState {
            code: self.code.clone(),
            host_conn: self.host_conn.clone(),
            players: self
                .members
                .iter()
                .map(|s| PlayerView {
                    id: s.conn.clone(),
                    name: s.member.name.clone(),
                    score: s.member.score,
                    user_id: s.member.user_id.clone(),
                    avatar: s.member.avatar.clone(),
                })
                .collect(),
            skip_votes: {
                let mut votes: Vec<String> = self.skip_votes.iter().cloned().collect();
                votes.sort();
                votes
            },
            has_tracks: !self.tracks.is_empty(),
            game_started: self.answers_known,
            game_type: self.game_type,
            round_count: self.tracks.len(),
            current_round: self.current_round.as_ref().map(Self::round_view),
        }
    }

    /// Scoreboard sorted by score descending, name ascending for ties.
    pub fn scoreboard(&self) -> Vec<ScoreView> {
        let mut scores: Vec<ScoreView> = self
            .members
            .iter()
            .map(|s| ScoreView {
                name: s.member.name.clone(),
                score: s.member.score,
            })
            .collect();
        scores.sort_by_key(|s| (Reverse(s.score), s.name.clone()));
        scores
    }

    fn round_view(round: &Round) -> RoundView {
        RoundView {
            started_at: round.started_at,
            hint: round.hint,
            playback: round.playback.clone(),
            solved: round.solved,
            paused: round.paused,
            buzzer: round.buzzer.as_ref().map(|b| BuzzerView {
                holder: b.holder.clone(),
                holder_name: b.holder_name.clone(),
                first_buzz_at: b.first_buzz_at,
                queue: Self::queue_view(b),
            }),
        }
    }

    fn queue_view(buzzer: &Buzzer) -> Vec<QueueView> {
        buzzer
            .queue
            .iter()
            .map(|e| QueueView {
                id: e.conn.clone(),
                name: e.name.clone(),
                at: e.at,
            })
            .collect()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    pub fn require_host(&self, conn: &str) -> Result<()> {
        if self.host_conn == conn {
            Ok(())
        } else {
            Err(GameError::Permission(
                "only the host may do this".to_string(),
            ))
        }
    }

    pub fn member_index(&self, conn: &str) -> Option<usize> {
        self.members.iter().position(|s| s.conn == conn)
    }

    pub fn member_name(&self, conn: &str) -> Option<String> {
        self.members
            .iter()
            .find(|s| s.conn == conn)
            .map(|s| s.member.name.clone())
    }

    fn active_round(&self) -> Result<&Round> {
        self.current_round
            .as_ref()
            .filter(|r| !r.solved)
            .ok_or(GameError::NoRound)
    }

    fn active_round_mut(&mut self) -> Result<&mut Round> {
        self.current_round
            .as_mut()
            .filter(|r| !r.solved)
            .ok_or(GameError::NoRound)
    }

    fn unique_name(&self, base: &str, exclude_conn: Option<&str>) -> String {
        let taken = |candidate: &str| {
            self.members
                .iter()
                .any(|s| Some(s.conn.as_str()) != exclude_conn && s.member.name == candidate)
        };
        if !taken(base) {
            return base.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{base}#{n}");
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    fn system_chat(&self, text: String) -> Effect {
        Effect::Broadcast(ServerEvent::Chat {
            name: None,
            text,
            system: Some(true),
            at: now_ms(),
        })
    }

    fn snapshot_broadcast(&self) -> Effect {
        Effect::Broadcast(self.snapshot_event())
    }

    /// Point the buzzer at a migrated connection handle.
    fn retarget_buzzer(&mut self, old_conn: &str, new_conn: &str) {
        if let Some(buzzer) = self
            .current_round
            .as_mut()
            .and_then(|r| r.buzzer.as_mut())
        {
            if buzzer.holder == old_conn {
                buzzer.holder = new_conn.to_string();
            }
            for entry in buzzer.queue.iter_mut() {
                if entry.conn == old_conn {
                    entry.conn = new_conn.to_string();
                }
            }
        }
    }

    /// Buzzer cleanup when a member leaves: rotate the queue up if the
    /// leaver held the buzzer, clear it when nobody is left waiting.
    fn tidy_buzzer_on_leave(&mut self, conn: &str) -> Vec<Effect> {
        let Some(round) = self.current_round.as_mut() else {
            return Vec::new();
        };
        let Some(buzzer) = round.buzzer.as_mut() else {
            return Vec::new();
        };

        if buzzer.holder == conn {
            if let Some(next) = buzzer.queue.pop_front() {
                buzzer.holder = next.conn.clone();
                buzzer.holder_name = next.name.clone();
                let queue = Self::queue_view(buzzer);
                vec![
                    Effect::Broadcast(ServerEvent::Buzzed {
                        id: next.conn,
                        name: next.name,
                        at: next.at,
                    }),
                    Effect::Broadcast(ServerEvent::QueueUpdated { queue }),
                ]
            } else {
                round.buzzer = None;
                round.paused = false;
                vec![
                    Effect::Broadcast(ServerEvent::BuzzCleared),
                    Effect::Broadcast(ServerEvent::ResumePlayback),
                ]
            }
        } else if buzzer.queue.iter().any(|e| e.conn == conn) {
            buzzer.queue.retain(|e| e.conn != conn);
            let queue = Self::queue_view(buzzer);
            vec![Effect::Broadcast(ServerEvent::QueueUpdated { queue })]
        } else {
            Vec::new()
        }
    }
}

/// Advance to the next playable round.
///
/// Playback resolution may issue outbound HTTP, so it runs between a read
/// and a write acquisition of the room lock; the commit re-validates that no
/// other host command advanced the round in the meantime. Unresolvable
/// tracks are skipped; an exhausted pool ends the game. `on_commit` runs
/// under the write lock so callers can deliver events and take a snapshot
/// in commit order.
pub async fn advance_round<F>(
    room: &Arc<RwLock<Room>>,
    resolver: &PlaybackResolver,
    caller: &str,
    config: &ServerConfig,
    mut on_commit: F,
) -> Result<Vec<Effect>>
where
    F: FnMut(&mut Room, &[Effect]),
{
    let (mode, start_index, tracks, pool_end) = {
        let r = room.read().await;
        r.require_host(caller)?;
        let mode = r
            .mode
            .filter(|_| r.answers_known)
            .ok_or_else(|| GameError::State("game has not started".to_string()))?;
        (mode, r.round_index, r.tracks.clone(), r.round_pool_end(config))
    };

    let mut resolved = None;
    let mut index = start_index;
    while index < pool_end {
        match resolver.resolve(&tracks[index], mode).await {
            Some(playback) => {
                resolved = Some((index, playback));
                break;
            }
            None => {
                debug!(
                    "skipping unplayable track {:?} at index {index}",
                    tracks[index].title
                );
                index += 1;
            }
        }
    }

    let mut r = room.write().await;
    r.require_host(caller)?;
    if r.round_index != start_index {
        return Err(GameError::State("round already advanced".to_string()));
    }
    let effects = match resolved {
        Some((index, playback)) => r.commit_round(index, playback),
        None => {
            r.round_index = pool_end;
            r.finish_game()
        }
    };
    on_commit(&mut r, &effects);
    Ok(effects)
}
