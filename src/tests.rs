//! Engine and gateway tests for tune-arena

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::RwLock;

    use crate::error::{GameError, Result};
    use crate::gateway::Gateway;
    use crate::playback::PlaybackResolver;
    use crate::protocol::{ClientEvent, ServerEvent};
    use crate::providers::{CatalogSearch, VerifiedUser, VideoHit};
    use crate::room::{advance_round, Effect, Room};
    use crate::store::{MemoryStore, Store};
    use crate::types::*;

    fn config() -> ServerConfig {
        ServerConfig::default()
    }

    fn track(title: &str, artist: &str, preview: Option<&str>) -> Track {
        Track {
            id: format!("id-{title}"),
            title: title.to_string(),
            artist: artist.to_string(),
            preview_url: preview.map(str::to_string),
            video_id: None,
            cover: None,
            source: TrackSource::Catalog,
        }
    }

    fn no_search_resolver() -> PlaybackResolver {
        PlaybackResolver::new(None, Duration::from_millis(100), Duration::from_secs(60))
    }

    fn verified(uid: &str) -> VerifiedUser {
        VerifiedUser {
            user_id: uid.to_string(),
            photo_url: None,
        }
    }

    /// Room with Alice hosting and the given extra members, game started.
    async fn started_room(
        game_type: GameType,
        extra: &[(&str, &str)],
        tracks: Vec<Track>,
    ) -> Arc<RwLock<Room>> {
        let cfg = config();
        let mut room = Room::new("ABC123", "alice");
        room.join("alice", "Alice", None, &cfg);
        for (conn, name) in extra {
            room.join(conn, name, None, &cfg);
        }
        room.start_game("alice", RoomMode::CatalogPreview, tracks, game_type, &cfg)
            .unwrap();
        Arc::new(RwLock::new(room))
    }

    fn find_round_end(effects: &[Effect]) -> Option<(Option<String>, Answer, u64, Option<bool>)> {
        effects.iter().find_map(|e| match e {
            Effect::Broadcast(ServerEvent::RoundEnd {
                winner,
                answer,
                elapsed_ms,
                skipped,
                ..
            }) => Some((winner.clone(), answer.clone(), *elapsed_ms, *skipped)),
            _ => None,
        })
    }

    // =========================================================================
    // Text mode scenarios
    // =========================================================================

    #[tokio::test]
    async fn text_solve_awards_full_points() {
        let cfg = config();
        let room = started_room(
            GameType::Text,
            &[("bob", "Bob")],
            vec![track("Deszcz na betonie", "Taco Hemingway", Some("p1"))],
        )
        .await;
        advance_round(&room, &no_search_resolver(), "alice", &cfg, |_, _| {})
            .await
            .unwrap();

        let mut r = room.write().await;
        let effects = r.guess("bob", "Taco Hemingway Deszcz na betonie").unwrap();

        let bob = r.members.iter().find(|s| s.conn == "bob").unwrap();
        assert_eq!(bob.member.score, 10);

        let (winner, answer, _, skipped) = find_round_end(&effects).unwrap();
        assert_eq!(winner.as_deref(), Some("Bob"));
        assert_eq!(answer.title, "Deszcz na betonie");
        assert_eq!(answer.artist, "Taco Hemingway");
        assert!(skipped.is_none());
    }

    #[tokio::test]
    async fn text_title_only_awards_five() {
        let cfg = config();
        let room = started_room(
            GameType::Text,
            &[("bob", "Bob")],
            vec![track("Deszcz na betonie", "Taco Hemingway", Some("p1"))],
        )
        .await;
        advance_round(&room, &no_search_resolver(), "alice", &cfg, |_, _| {})
            .await
            .unwrap();

        let mut r = room.write().await;
        r.guess("bob", "deszcz na betonie").unwrap();
        let bob = r.members.iter().find(|s| s.conn == "bob").unwrap();
        assert_eq!(bob.member.score, 5);
    }

    #[tokio::test]
    async fn wrong_guess_keeps_round_open() {
        let cfg = config();
        let room = started_room(
            GameType::Text,
            &[("bob", "Bob")],
            vec![track("Deszcz na betonie", "Taco Hemingway", Some("p1"))],
        )
        .await;
        advance_round(&room, &no_search_resolver(), "alice", &cfg, |_, _| {})
            .await
            .unwrap();

        let mut r = room.write().await;
        let effects = r.guess("bob", "totally wrong").unwrap();
        assert!(effects.is_empty());
        assert!(!r.current_round.as_ref().unwrap().solved);

        // First correct guess afterwards still wins.
        let effects = r.guess("bob", "deszcz na betonie").unwrap();
        assert!(find_round_end(&effects).is_some());
        assert!(r.current_round.as_ref().unwrap().solved);

        // Once solved, further guesses hit no-round.
        assert!(matches!(
            r.guess("bob", "deszcz na betonie"),
            Err(GameError::NoRound)
        ));
    }

    #[tokio::test]
    async fn guess_in_buzzer_mode_is_wrong_mode() {
        let cfg = config();
        let room = started_room(
            GameType::Buzzer,
            &[("bob", "Bob")],
            vec![track("A", "B", Some("p1"))],
        )
        .await;
        advance_round(&room, &no_search_resolver(), "alice", &cfg, |_, _| {})
            .await
            .unwrap();
        let mut r = room.write().await;
        assert!(matches!(r.guess("bob", "A"), Err(GameError::WrongMode)));
    }

    // =========================================================================
    // Buzzer mode scenarios
    // =========================================================================

    #[tokio::test]
    async fn buzzer_order_pass_and_manual_end() {
        let cfg = config();
        let room = started_room(
            GameType::Buzzer,
            &[("bob", "Bob"), ("carol", "Carol")],
            vec![track("A", "B", Some("p1"))],
        )
        .await;
        advance_round(&room, &no_search_resolver(), "alice", &cfg, |_, _| {})
            .await
            .unwrap();

        let mut r = room.write().await;

        let effects = r.buzz("bob").unwrap();
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Broadcast(ServerEvent::PausePlayback))));
        assert!(r.current_round.as_ref().unwrap().paused);

        r.buzz("carol").unwrap();

        // Duplicate buzz is a no-op.
        let effects = r.buzz("bob").unwrap();
        assert!(effects.is_empty());

        let buzzer = r.current_round.as_ref().unwrap().buzzer.as_ref().unwrap();
        let first_buzz_at = buzzer.first_buzz_at;
        assert_eq!(buzzer.holder, "bob");
        assert_eq!(buzzer.queue.len(), 1);
        assert_eq!(buzzer.queue[0].name, "Carol");

        // Pass: Carol takes the buzzer, playback stays paused.
        let effects = r.pass_buzzer("alice").unwrap();
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Broadcast(ServerEvent::PausePlayback))));
        let buzzer = r.current_round.as_ref().unwrap().buzzer.as_ref().unwrap();
        assert_eq!(buzzer.holder_name, "Carol");
        assert!(buzzer.queue.is_empty());
        assert!(r.current_round.as_ref().unwrap().paused);

        // Manual end: winner is the holder, timed from the first buzz.
        let started_at = r.current_round.as_ref().unwrap().started_at;
        let effects = r.end_round_manual("alice").unwrap();
        let (winner, _, elapsed, _) = find_round_end(&effects).unwrap();
        assert_eq!(winner.as_deref(), Some("Carol"));
        assert_eq!(elapsed, first_buzz_at - started_at);
    }

    #[tokio::test]
    async fn pass_buzzer_with_empty_queue_clears_and_resumes() {
        let cfg = config();
        let room = started_room(
            GameType::Buzzer,
            &[("bob", "Bob")],
            vec![track("A", "B", Some("p1"))],
        )
        .await;
        advance_round(&room, &no_search_resolver(), "alice", &cfg, |_, _| {})
            .await
            .unwrap();

        let mut r = room.write().await;
        r.buzz("bob").unwrap();
        let effects = r.pass_buzzer("alice").unwrap();
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Broadcast(ServerEvent::BuzzCleared))));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Broadcast(ServerEvent::ResumePlayback))));
        assert!(r.current_round.as_ref().unwrap().buzzer.is_none());
        assert!(!r.current_round.as_ref().unwrap().paused);
    }

    #[tokio::test]
    async fn manual_end_without_buzz_has_no_winner() {
        let cfg = config();
        let room = started_room(
            GameType::Buzzer,
            &[("bob", "Bob")],
            vec![track("A", "B", Some("p1"))],
        )
        .await;
        advance_round(&room, &no_search_resolver(), "alice", &cfg, |_, _| {})
            .await
            .unwrap();

        let mut r = room.write().await;
        let effects = r.end_round_manual("alice").unwrap();
        let (winner, _, _, _) = find_round_end(&effects).unwrap();
        assert!(winner.is_none());
    }

    #[tokio::test]
    async fn buzzer_cleanup_on_holder_disconnect() {
        let cfg = config();
        let room = started_room(
            GameType::Buzzer,
            &[("bob", "Bob"), ("carol", "Carol")],
            vec![track("A", "B", Some("p1"))],
        )
        .await;
        advance_round(&room, &no_search_resolver(), "alice", &cfg, |_, _| {})
            .await
            .unwrap();

        let mut r = room.write().await;
        r.buzz("bob").unwrap();
        r.buzz("carol").unwrap();

        // The holder leaves; the queue head rotates up.
        let effects = r.disconnect("bob");
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Broadcast(ServerEvent::Buzzed { name, .. }) if name == "Carol"
        )));
        let buzzer = r.current_round.as_ref().unwrap().buzzer.as_ref().unwrap();
        assert_eq!(buzzer.holder, "carol");
        assert!(buzzer.queue.is_empty());

        // The last buzzer leaves; everything clears and playback resumes.
        let effects = r.disconnect("carol");
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Broadcast(ServerEvent::BuzzCleared))));
        assert!(r.current_round.as_ref().unwrap().buzzer.is_none());
    }

    #[tokio::test]
    async fn buzzer_uniqueness_invariant() {
        let cfg = config();
        let room = started_room(
            GameType::Buzzer,
            &[("bob", "Bob"), ("carol", "Carol")],
            vec![track("A", "B", Some("p1"))],
        )
        .await;
        advance_round(&room, &no_search_resolver(), "alice", &cfg, |_, _| {})
            .await
            .unwrap();

        let mut r = room.write().await;
        for conn in ["bob", "carol", "bob", "carol", "alice"] {
            r.buzz(conn).unwrap();
        }
        let buzzer = r.current_round.as_ref().unwrap().buzzer.as_ref().unwrap();
        let mut handles: Vec<&str> = buzzer.queue.iter().map(|e| e.conn.as_str()).collect();
        handles.push(buzzer.holder.as_str());
        let unique: std::collections::HashSet<&str> = handles.iter().copied().collect();
        assert_eq!(unique.len(), handles.len());
    }

    // =========================================================================
    // Skip voting
    // =========================================================================

    #[tokio::test]
    async fn skip_vote_needs_strict_majority() {
        let cfg = config();
        let room = started_room(
            GameType::Text,
            &[("bob", "Bob"), ("carol", "Carol")],
            vec![track("A", "B", Some("p1"))],
        )
        .await;
        advance_round(&room, &no_search_resolver(), "alice", &cfg, |_, _| {})
            .await
            .unwrap();

        let mut r = room.write().await;

        // 1 of 3 is not a majority.
        let effects = r.vote_skip("bob").unwrap();
        assert!(find_round_end(&effects).is_none());
        assert!(!r.current_round.as_ref().unwrap().solved);

        // 2 of 3 is.
        let effects = r.vote_skip("carol").unwrap();
        let (winner, _, _, skipped) = find_round_end(&effects).unwrap();
        assert!(winner.is_none());
        assert_eq!(skipped, Some(true));
        assert!(r.current_round.as_ref().unwrap().solved);
    }

    #[tokio::test]
    async fn half_votes_do_not_skip() {
        let cfg = config();
        let room = started_room(
            GameType::Text,
            &[("bob", "Bob")],
            vec![track("A", "B", Some("p1"))],
        )
        .await;
        advance_round(&room, &no_search_resolver(), "alice", &cfg, |_, _| {})
            .await
            .unwrap();

        let mut r = room.write().await;
        // 1 of 2 is exactly half, not a strict majority.
        let effects = r.vote_skip("bob").unwrap();
        assert!(find_round_end(&effects).is_none());
    }

    // =========================================================================
    // Membership and host model
    // =========================================================================

    #[tokio::test]
    async fn host_reattach_mid_round() {
        let cfg = config();
        let host_user = verified("host-uid");

        let mut room = Room::new("ABC123", "alice");
        room.join("alice", "Alice", Some(&host_user), &cfg);
        assert_eq!(room.host_user.as_deref(), Some("host-uid"));
        room.join("bob", "Bob", None, &cfg);
        room.start_game(
            "alice",
            RoomMode::CatalogPreview,
            vec![track("A", "B", Some("p1")), track("C", "D", Some("p2"))],
            GameType::Text,
            &cfg,
        )
        .unwrap();

        let room = Arc::new(RwLock::new(room));
        advance_round(&room, &no_search_resolver(), "alice", &cfg, |_, _| {})
            .await
            .unwrap();

        let mut r = room.write().await;
        let round_index = r.round_index;

        // Host drops; Bob inherits the host connection.
        r.disconnect("alice");
        assert_eq!(r.host_conn, "bob");
        assert!(r.current_round.is_some());

        // The original host returns under a new connection; host rights
        // revert and the round is untouched.
        r.join("alice-2", "Alice", Some(&host_user), &cfg);
        assert_eq!(r.host_conn, "alice-2");
        assert_eq!(r.round_index, round_index);
        assert!(!r.current_round.as_ref().unwrap().solved);
    }

    #[tokio::test]
    async fn member_migration_preserves_score() {
        let cfg = config();
        let user = verified("u-bob");

        let mut room = Room::new("ABC123", "alice");
        room.join("alice", "Alice", None, &cfg);
        room.join("bob", "Bob", Some(&user), &cfg);
        room.members
            .iter_mut()
            .find(|s| s.conn == "bob")
            .unwrap()
            .member
            .score = 15;

        room.join("bob-2", "Bobby", Some(&user), &cfg);
        assert!(room.member_index("bob").is_none());
        let slot = &room.members[room.member_index("bob-2").unwrap()];
        assert_eq!(slot.member.score, 15);
        // The original display name survives migration.
        assert_eq!(slot.member.name, "Bob");
    }

    #[tokio::test]
    async fn duplicate_names_get_suffixed() {
        let cfg = config();
        let mut room = Room::new("ABC123", "c1");
        room.join("c1", "Bob", None, &cfg);
        room.join("c2", "Bob", None, &cfg);
        room.join("c3", "Bob", None, &cfg);

        let names: Vec<&str> = room.members.iter().map(|s| s.member.name.as_str()).collect();
        assert_eq!(names, vec!["Bob", "Bob#2", "Bob#3"]);
    }

    #[tokio::test]
    async fn names_are_trimmed_and_clipped() {
        let cfg = config();
        let mut room = Room::new("ABC123", "c1");
        let long = "x".repeat(64);
        room.join("c1", &format!("  {long}  "), None, &cfg);
        assert_eq!(room.members[0].member.name.chars().count(), 32);
    }

    #[tokio::test]
    async fn single_host_invariant_across_disconnects() {
        let cfg = config();
        let mut room = Room::new("ABC123", "c1");
        room.join("c1", "A", None, &cfg);
        room.join("c2", "B", None, &cfg);
        room.join("c3", "C", None, &cfg);

        room.disconnect("c1");
        assert_eq!(room.host_conn, "c2");
        room.disconnect("c2");
        assert_eq!(room.host_conn, "c3");

        let effects = room.disconnect("c3");
        assert!(effects.iter().any(|e| matches!(e, Effect::RemoveRoom)));
        assert!(room.members.is_empty());
    }

    #[tokio::test]
    async fn kick_notifies_and_removes_target() {
        let cfg = config();
        let mut room = Room::new("ABC123", "alice");
        room.join("alice", "Alice", None, &cfg);
        room.join("bob", "Bob", None, &cfg);

        assert!(matches!(
            room.kick("bob", "alice"),
            Err(GameError::Permission(_))
        ));

        let effects = room.kick("alice", "bob").unwrap();
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Direct { conn, event: ServerEvent::Kicked { .. } } if conn == "bob"
        )));
        assert!(room.member_index("bob").is_none());
    }

    // =========================================================================
    // Scoring adjustments
    // =========================================================================

    #[tokio::test]
    async fn award_and_deduct_clamp_at_zero() {
        let cfg = config();
        let mut room = Room::new("ABC123", "alice");
        room.join("alice", "Alice", None, &cfg);
        room.join("bob", "Bob", None, &cfg);

        room.adjust_points("alice", "Bob", None, true).unwrap();
        assert_eq!(room.members[1].member.score, 10);

        room.adjust_points("alice", "Bob", Some(25), false).unwrap();
        assert_eq!(room.members[1].member.score, 0);

        assert!(matches!(
            room.adjust_points("alice", "Nobody", None, true),
            Err(GameError::Input(_))
        ));
        assert!(matches!(
            room.adjust_points("bob", "Alice", None, true),
            Err(GameError::Permission(_))
        ));
    }

    #[tokio::test]
    async fn leaderboard_mirrors_identified_members() {
        let cfg = config();
        let user = verified("u-bob");
        let mut room = Room::new("ABC123", "alice");
        room.join("alice", "Alice", None, &cfg);
        room.join("bob", "Bob", Some(&user), &cfg);

        let effects = room.adjust_points("alice", "Bob", Some(7), true).unwrap();
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Leaderboard { user_id, delta: 7, .. } if user_id == "u-bob"
        )));
    }

    // =========================================================================
    // Round progression
    // =========================================================================

    #[tokio::test]
    async fn unplayable_tracks_are_skipped() {
        let cfg = config();
        let room = started_room(
            GameType::Text,
            &[("bob", "Bob")],
            vec![
                track("Unplayable", "Nobody", None),
                track("Playable", "Somebody", Some("p2")),
            ],
        )
        .await;
        // Pin the pool order; startGame shuffles.
        room.write().await.tracks = vec![
            track("Unplayable", "Nobody", None),
            track("Playable", "Somebody", Some("p2")),
        ];

        let effects = advance_round(&room, &no_search_resolver(), "alice", &cfg, |_, _| {})
            .await
            .unwrap();

        let r = room.read().await;
        assert_eq!(r.round_index, 2);
        assert_eq!(r.current_round.as_ref().unwrap().track.title, "Playable");
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Broadcast(ServerEvent::RoundStart { .. }))));
    }

    #[tokio::test]
    async fn exhausted_pool_ends_the_game() {
        let cfg = config();
        let room = started_room(
            GameType::Text,
            &[("bob", "Bob")],
            vec![track("A", "B", Some("p1"))],
        )
        .await;
        advance_round(&room, &no_search_resolver(), "alice", &cfg, |_, _| {})
            .await
            .unwrap();
        room.write().await.guess("bob", "A").unwrap();

        let effects = advance_round(&room, &no_search_resolver(), "alice", &cfg, |_, _| {})
            .await
            .unwrap();
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Broadcast(ServerEvent::GameOver { .. }))));
        assert!(room.read().await.current_round.is_none());
    }

    #[tokio::test]
    async fn round_limit_caps_the_game() {
        let cfg = ServerConfig::new().round_limit(1);
        let room = started_room(
            GameType::Text,
            &[("bob", "Bob")],
            // Both pool entries share the answer so the solve below works in
            // any shuffle order.
            vec![track("A", "B", Some("p1")), track("A", "B", Some("p2"))],
        )
        .await;
        advance_round(&room, &no_search_resolver(), "alice", &cfg, |_, _| {})
            .await
            .unwrap();
        room.write().await.guess("bob", "A").unwrap();

        let effects = advance_round(&room, &no_search_resolver(), "alice", &cfg, |_, _| {})
            .await
            .unwrap();
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Broadcast(ServerEvent::GameOver { .. }))));
    }

    #[tokio::test]
    async fn next_round_is_host_only() {
        let cfg = config();
        let room = started_room(
            GameType::Text,
            &[("bob", "Bob")],
            vec![track("A", "B", Some("p1"))],
        )
        .await;
        let result = advance_round(&room, &no_search_resolver(), "bob", &cfg, |_, _| {}).await;
        assert!(matches!(result, Err(GameError::Permission(_))));
    }

    #[tokio::test]
    async fn round_start_leaks_only_hint_lengths() {
        let cfg = config();
        let room = started_room(
            GameType::Text,
            &[("bob", "Bob")],
            vec![track("Deszcz na betonie", "Taco Hemingway", Some("p1"))],
        )
        .await;
        let effects = advance_round(&room, &no_search_resolver(), "alice", &cfg, |_, _| {})
            .await
            .unwrap();

        let hint = effects
            .iter()
            .find_map(|e| match e {
                Effect::Broadcast(ServerEvent::RoundStart { hint, .. }) => Some(*hint),
                _ => None,
            })
            .unwrap();
        assert_eq!(hint.title_len, "Deszcz na betonie".chars().count());
        assert_eq!(hint.artist_len, "Taco Hemingway".chars().count());

        // The room snapshot event also carries no answer text.
        let json = serde_json::to_string(&room.read().await.snapshot_event()).unwrap();
        assert!(!json.contains("Deszcz na betonie"));
        assert!(!json.contains("Taco Hemingway"));
    }

    #[tokio::test]
    async fn start_game_requires_tracks_and_host() {
        let cfg = config();
        let mut room = Room::new("ABC123", "alice");
        room.join("alice", "Alice", None, &cfg);
        room.join("bob", "Bob", None, &cfg);

        assert!(matches!(
            room.start_game("alice", RoomMode::CatalogPreview, vec![], GameType::Text, &cfg),
            Err(GameError::Input(_))
        ));
        assert!(matches!(
            room.start_game(
                "bob",
                RoomMode::CatalogPreview,
                vec![track("A", "B", None)],
                GameType::Text,
                &cfg
            ),
            Err(GameError::Permission(_))
        ));
    }

    // =========================================================================
    // Playback fallback scenario
    // =========================================================================

    struct FallbackSearch;

    #[async_trait]
    impl CatalogSearch for FallbackSearch {
        async fn scrape_search(&self, _query: &str) -> Result<Option<VideoHit>> {
            Ok(None)
        }

        async fn api_search(&self, _query: &str) -> Result<Option<VideoHit>> {
            Ok(Some(VideoHit {
                video_id: "v42".to_string(),
                title: "hit".to_string(),
            }))
        }
    }

    #[tokio::test]
    async fn playback_falls_back_to_official_search() {
        let cfg = config();
        let room = started_room(
            GameType::Text,
            &[("bob", "Bob")],
            vec![track("No Handle", "Anywhere", None)],
        )
        .await;
        let resolver = PlaybackResolver::new(
            Some(Arc::new(FallbackSearch)),
            Duration::from_millis(100),
            Duration::from_secs(60),
        );

        let effects = advance_round(&room, &resolver, "alice", &cfg, |_, _| {})
            .await
            .unwrap();
        let playback = effects
            .iter()
            .find_map(|e| match e {
                Effect::Broadcast(ServerEvent::RoundStart { playback, .. }) => {
                    Some(playback.clone())
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(
            playback,
            PlaybackHandle::Video {
                video_id: "v42".to_string()
            }
        );
    }

    // =========================================================================
    // Gateway flow
    // =========================================================================

    #[tokio::test]
    async fn gateway_create_join_and_disconnect() {
        let gateway = Gateway::new(
            config(),
            Arc::new(MemoryStore::new()),
            None,
            None,
            None,
        );

        let (host, mut host_rx) = gateway.register_connection();
        let ack = gateway.dispatch(&host, ClientEvent::CreateRoom).await.unwrap();
        let code = ack["code"].as_str().unwrap().to_string();
        assert_eq!(code.len(), 6);

        // Creation pushes a snapshot to the creator.
        assert!(matches!(
            host_rx.recv().await.unwrap(),
            ServerEvent::RoomState { .. }
        ));

        gateway
            .dispatch(
                &host,
                ClientEvent::JoinRoom {
                    code: code.clone(),
                    name: "Alice".to_string(),
                    token: None,
                },
            )
            .await
            .unwrap();

        let (bob, mut bob_rx) = gateway.register_connection();
        gateway
            .dispatch(
                &bob,
                ClientEvent::JoinRoom {
                    code: code.clone(),
                    name: "Bob".to_string(),
                    token: None,
                },
            )
            .await
            .unwrap();

        // Bob observes his own join: system chat, then a snapshot listing
        // both players.
        assert!(matches!(
            bob_rx.recv().await.unwrap(),
            ServerEvent::Chat { system: Some(true), .. }
        ));
        match bob_rx.recv().await.unwrap() {
            ServerEvent::RoomState { players, .. } => assert_eq!(players.len(), 2),
            other => panic!("expected roomState, got {other:?}"),
        }

        // Unknown rooms are rejected at the edge.
        let err = gateway
            .dispatch(
                &bob,
                ClientEvent::JoinRoom {
                    code: "ZZZZZZ".to_string(),
                    name: "Bob".to_string(),
                    token: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::RoomNotFound));

        // Both members leaving drops the room from the registry but keeps
        // the snapshot loadable.
        gateway.handle_disconnect(&bob).await;
        gateway.handle_disconnect(&host).await;
        assert!(!gateway.registry.contains(&code));
        assert!(gateway.registry.get(&code).await.is_ok());
    }

    #[tokio::test]
    async fn gateway_mirrors_round_wins_to_leaderboard() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Gateway::new(config(), store.clone(), None, None, None);

        let (host, _host_rx) = gateway.register_connection();
        let ack = gateway.dispatch(&host, ClientEvent::CreateRoom).await.unwrap();
        let code = ack["code"].as_str().unwrap().to_string();
        gateway
            .dispatch(
                &host,
                ClientEvent::JoinRoom {
                    code: code.clone(),
                    name: "Alice".to_string(),
                    token: None,
                },
            )
            .await
            .unwrap();

        // Wire Bob up with a stable identity directly at the engine level.
        let room = gateway.registry.get(&code).await.unwrap();
        {
            let cfg = config();
            let mut guard = room.write().await;
            guard.join("bob", "Bob", Some(&verified("u-bob")), &cfg);
            guard
                .start_game(
                    &host,
                    RoomMode::CatalogPreview,
                    vec![track("A", "B", Some("p1"))],
                    GameType::Text,
                    &cfg,
                )
                .unwrap();
        }
        gateway
            .dispatch(&host, ClientEvent::NextRound { code: code.clone() })
            .await
            .unwrap();
        gateway
            .dispatch(
                "bob",
                ClientEvent::Guess {
                    code: code.clone(),
                    guess_text: "B A".to_string(),
                },
            )
            .await
            .unwrap();

        let rows = store.get_leaderboard(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].uid, "u-bob");
        assert_eq!(rows[0].score, 10);
    }
}
