//! Concurrency tests: many commands racing against the same registry

mod fixtures;

use fixtures::TestSystemBuilder;
use pickup_room::types::{Outcome, ReportOutcome, Team};
use pickup_room::LobbyState;
use std::collections::HashSet;
use std::time::{Duration, Instant};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_fill_lobbies_exactly() {
    let system = TestSystemBuilder::new(5).build();
    let start_time = Instant::now();

    let handles: Vec<_> = (1..=40u64)
        .map(|id| {
            let registry = system.registry.clone();
            tokio::spawn(async move { registry.join_queue(id).await })
        })
        .collect();
    let results = futures::future::join_all(handles).await;

    let mut successful = 0;
    for result in results {
        match result {
            Ok(Ok(_)) => successful += 1,
            Ok(Err(e)) => eprintln!("Join failed: {}", e),
            Err(e) => eprintln!("Task failed: {}", e),
        }
    }
    assert_eq!(successful, 40, "every join should succeed");
    assert!(
        start_time.elapsed() < Duration::from_secs(10),
        "40 joins took {:?}",
        start_time.elapsed()
    );

    let stats = system.registry.stats().unwrap();
    assert_eq!(stats.lobbies_created, 4);
    assert_eq!(stats.active_lobbies, 4);
    assert_eq!(stats.queued_players, 0);

    // Every player sits in exactly one drafted lobby
    let drafting = system
        .registry
        .lobbies_in_state(LobbyState::PickingPlayers)
        .await
        .unwrap();
    assert_eq!(drafting.len(), 4);
    let mut seen = HashSet::new();
    for lobby in &drafting {
        assert_eq!(lobby.players().len(), 10);
        for id in lobby.player_ids() {
            assert!(seen.insert(id), "player {} is in two lobbies", id);
        }
    }
    assert_eq!(seen.len(), 40);
    assert_eq!(system.count_events("PlayerJoinedQueue"), 40);
    assert_eq!(system.count_events("DraftStarted"), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_join_and_leave_keep_counts_consistent() {
    let system = TestSystemBuilder::new(5).build();
    for id in 1..=5u64 {
        system.registry.join_queue(id).await.unwrap();
    }

    let leaves: Vec<_> = (1..=5u64)
        .map(|id| {
            let registry = system.registry.clone();
            tokio::spawn(async move { registry.leave_queue(id).await.map(|_| ()) })
        })
        .collect();
    let joins: Vec<_> = (6..=9u64)
        .map(|id| {
            let registry = system.registry.clone();
            tokio::spawn(async move { registry.join_queue(id).await.map(|_| ()) })
        })
        .collect();

    for result in futures::future::join_all(leaves.into_iter().chain(joins)).await {
        result.unwrap().unwrap();
    }

    let stats = system.registry.stats().unwrap();
    assert_eq!(stats.queued_players, 4);

    let queuing = system
        .registry
        .lobbies_in_state(LobbyState::Queuing)
        .await
        .unwrap();
    let queued: usize = queuing.iter().map(|lobby| lobby.players().len()).sum();
    assert_eq!(queued, 4);
    for id in 1..=5u64 {
        assert!(system.registry.lobby_for_member(id).await.unwrap().is_none());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reports_commit_each_lobby_once() {
    let system = TestSystemBuilder::new(1).build();
    for id in 1..=20u64 {
        system.registry.join_queue(id).await.unwrap();
    }
    assert_eq!(
        system
            .registry
            .lobbies_in_state(LobbyState::Reporting)
            .await
            .unwrap()
            .len(),
        10
    );

    // Odd ids captain team A in every lobby; everyone agrees A won
    let handles: Vec<_> = (1..=20u64)
        .map(|id| {
            let registry = system.registry.clone();
            let outcome = if id % 2 == 1 {
                Outcome::Win
            } else {
                Outcome::Loss
            };
            tokio::spawn(async move { registry.report(id, outcome).await })
        })
        .collect();

    let mut committed = 0;
    let mut pending = 0;
    for result in futures::future::join_all(handles).await {
        match result.unwrap().unwrap() {
            ReportOutcome::Committed(result) => {
                assert_eq!(result.winner, Team::A);
                committed += 1;
            }
            ReportOutcome::AwaitingConfirmation { claimed_winner } => {
                assert_eq!(claimed_winner, Team::A);
                pending += 1;
            }
        }
    }
    assert_eq!(committed, 10);
    assert_eq!(pending, 10);

    let stats = system.registry.stats().unwrap();
    assert_eq!(stats.lobbies_completed, 10);
    assert_eq!(stats.active_lobbies, 0);
    for id in 1..=20u64 {
        let player = system.stored(id).await;
        assert_eq!(player.games_played(), 1);
        assert_eq!(player.wins, (id % 2) as u32);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rejoin_during_commit_keeps_both_results() {
    let system = TestSystemBuilder::new(1).build();
    system.registry.join_queue(1).await.unwrap();
    system.registry.join_queue(2).await.unwrap();
    system.repo.slow_lookups(Duration::from_millis(200));

    // Player 1 asks to queue again while their first match is being forced
    let rejoin = {
        let registry = system.registry.clone();
        tokio::spawn(async move { registry.join_queue(1).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let first = system.registry.force_result(1, 1).await.unwrap();
    assert_eq!(first.winner, Team::A);

    match rejoin.await.unwrap() {
        Err(pickup_room::LobbyError::AlreadyQueued { player_id }) => {
            assert_eq!(player_id, 1);
            system.registry.join_queue(1).await.unwrap();
        }
        other => panic!("rejoin should see the open lobby, got {:?}", other),
    }
    assert_eq!(system.stored(1).await.games_played(), 1);

    let second = system.registry.join_queue(3).await.unwrap();
    assert_ne!(second, 1);
    system.registry.force_result(second, 2).await.unwrap();

    let player = system.stored(1).await;
    assert_eq!(player.wins + player.losses, 2);
    assert_eq!(player.games_played(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_join_racing_a_commit_reads_the_saved_record() {
    let system = TestSystemBuilder::new(1).build();
    system.registry.join_queue(1).await.unwrap();
    system.registry.join_queue(2).await.unwrap();
    system.repo.slow_saves(Duration::from_millis(50));
    system.repo.slow_lookups(Duration::from_millis(100));

    let registry = system.registry.clone();
    let (forced, rejoin) = tokio::join!(
        system.registry.force_result(1, 1),
        async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            registry.join_queue(1).await
        }
    );
    forced.unwrap();

    // Either the rejoin landed after the lobby closed, or it was turned away
    if rejoin.is_err() {
        system.registry.join_queue(1).await.unwrap();
    }
    let lobby = system.registry.join_queue(3).await.unwrap();
    let snapshot = system.registry.lobby(lobby).await.unwrap().unwrap();
    let queued = snapshot
        .players()
        .iter()
        .find(|p| p.id == 1)
        .expect("player 1 queued");
    assert_eq!(queued.games_played(), 1);

    system.registry.force_result(lobby, 1).await.unwrap();
    assert_eq!(system.stored(1).await.games_played(), 2);
}
