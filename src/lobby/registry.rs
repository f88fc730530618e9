//! Lobby registry: every active lobby, the member index and queue routing
//!
//! The collection sits behind a short-held synchronous mutex that is never
//! held across an await. Each lobby has its own async mutex that is held for
//! the whole of a command, including the map lookup at queue pop and the
//! rating commit, so a reader sees a lobby either before or after a command.
//! The registry mutex may be taken while a lobby mutex is held, never the
//! other way round.

use crate::amqp::publisher::EventPublisher;
use crate::config::LobbyConfig;
use crate::error::{LobbyError, LobbyResult};
use crate::lobby::captains::CaptainSelector;
use crate::lobby::consensus::Verdict;
use crate::lobby::draft::PickOutcome;
use crate::lobby::instance::{LobbyInstance, LobbyState};
use crate::metrics::MetricsCollector;
use crate::rating::RatingUpdateCoordinator;
use crate::store::{MapRepository, PlayerRepository};
use crate::types::*;
use crate::utils::current_timestamp;
use rand::RngCore;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Statistics about registry operations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LobbyRegistryStats {
    /// Total number of lobbies created
    pub lobbies_created: u64,
    /// Total number of lobbies completed
    pub lobbies_completed: u64,
    /// Completed lobbies whose result was forced
    pub matches_forced: u64,
    /// Report rounds reset by conflicting reports
    pub report_conflicts: u64,
    /// Current number of active lobbies
    pub active_lobbies: usize,
    /// Players holding a place in a queuing lobby
    pub queued_players: usize,
}

#[derive(Default)]
struct RegistryInner {
    lobbies: HashMap<LobbyId, Arc<Mutex<LobbyInstance>>>,
    /// Which lobby each active player belongs to
    members: HashMap<PlayerId, LobbyId>,
    /// Places taken in each still-queuing lobby, by lobby id
    reservations: BTreeMap<LobbyId, usize>,
    stats: LobbyRegistryStats,
}

impl RegistryInner {
    fn release_reservation(&mut self, lobby_id: LobbyId, player_id: PlayerId) {
        self.members.remove(&player_id);
        if let Some(count) = self.reservations.get_mut(&lobby_id) {
            *count = count.saturating_sub(1);
        }
        self.refresh_counts();
    }

    /// Undo a join that reserved a slot but never made it into the lobby,
    /// dropping the lobby when nobody else holds a slot in it
    fn abandon_join(&mut self, lobby_id: LobbyId, player_id: PlayerId) {
        self.release_reservation(lobby_id, player_id);
        if self.reservations.get(&lobby_id) == Some(&0) {
            self.reservations.remove(&lobby_id);
            self.lobbies.remove(&lobby_id);
            self.refresh_counts();
        }
    }

    fn refresh_counts(&mut self) {
        self.stats.active_lobbies = self.lobbies.len();
        self.stats.queued_players = self.reservations.values().sum();
    }
}

/// Process-wide registry of active lobbies
pub struct LobbyRegistry {
    config: LobbyConfig,
    inner: StdMutex<RegistryInner>,
    next_id: AtomicU32,
    players: Arc<dyn PlayerRepository>,
    maps: Arc<dyn MapRepository>,
    coordinator: RatingUpdateCoordinator,
    selector: CaptainSelector,
    publisher: Arc<dyn EventPublisher>,
    rng: StdMutex<Box<dyn RngCore + Send>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl LobbyRegistry {
    /// Create a new lobby registry
    pub fn new(
        config: LobbyConfig,
        players: Arc<dyn PlayerRepository>,
        maps: Arc<dyn MapRepository>,
        coordinator: RatingUpdateCoordinator,
        publisher: Arc<dyn EventPublisher>,
        rng: Box<dyn RngCore + Send>,
    ) -> Self {
        Self {
            selector: CaptainSelector::from_config(&config),
            config,
            inner: StdMutex::new(RegistryInner::default()),
            next_id: AtomicU32::new(1),
            players,
            maps,
            coordinator,
            publisher,
            rng: StdMutex::new(rng),
            metrics: None,
        }
    }

    /// Attach a metrics collector
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &LobbyConfig {
        &self.config
    }

    /// Sink the registry publishes its events to
    pub fn publisher(&self) -> Arc<dyn EventPublisher> {
        self.publisher.clone()
    }

    fn inner(&self) -> LobbyResult<std::sync::MutexGuard<'_, RegistryInner>> {
        self.inner.lock().map_err(|_| LobbyError::InvalidLobbyState {
            lobby_id: 0,
            reason: "lobby registry lock poisoned".to_string(),
        })
    }

    fn metrics(&self) -> Option<&MetricsCollector> {
        self.metrics.as_deref()
    }

    /// Publish events after the lobby lock has been released. Failures are
    /// logged and counted, never returned.
    async fn publish_all(&self, events: Vec<LobbyEvent>) {
        for event in events {
            let name = event.name();
            let lobby_id = event.lobby_id();
            let result = self.publisher.publish(event).await;
            if let Err(e) = &result {
                warn!(
                    "Failed to publish {} for lobby #{}: {}",
                    name, lobby_id, e
                );
            }
            if let Some(metrics) = self.metrics() {
                metrics.record_event_published(name, result.is_ok());
            }
        }
    }

    /// Find the lobby a member belongs to
    fn member_lobby(
        &self,
        player_id: PlayerId,
    ) -> LobbyResult<Option<Arc<Mutex<LobbyInstance>>>> {
        let inner = self.inner()?;
        Ok(inner
            .members
            .get(&player_id)
            .and_then(|id| inner.lobbies.get(id))
            .cloned())
    }

    /// Put a registered player in the lowest-numbered queuing lobby with room,
    /// creating a lobby when none has room. The join that fills a lobby pops
    /// its queue.
    pub async fn join_queue(&self, player_id: PlayerId) -> LobbyResult<LobbyId> {
        let capacity = self.config.lobby_size();
        let (lobby_id, lobby, created) = {
            let mut inner = self.inner()?;
            if inner.members.contains_key(&player_id) {
                return Err(LobbyError::AlreadyQueued { player_id });
            }

            let open = inner
                .reservations
                .iter()
                .find(|(_, taken)| **taken < capacity)
                .map(|(id, _)| *id);
            let (lobby_id, created) = match open {
                Some(id) => (id, false),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                    inner
                        .lobbies
                        .insert(id, Arc::new(Mutex::new(LobbyInstance::new(id, capacity))));
                    inner.reservations.insert(id, 0);
                    inner.stats.lobbies_created += 1;
                    (id, true)
                }
            };

            *inner.reservations.entry(lobby_id).or_insert(0) += 1;
            inner.members.insert(player_id, lobby_id);
            inner.refresh_counts();
            let lobby = inner.lobbies.get(&lobby_id).cloned();
            (lobby_id, lobby, created)
        };

        // Membership is held from here on, so a commit still in flight for
        // this player's previous lobby has finished saving before this read.
        let record = match self.players.find_player(player_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.inner()?.abandon_join(lobby_id, player_id);
                return Err(LobbyError::UnknownPlayer { player_id });
            }
            Err(e) => {
                self.inner()?.abandon_join(lobby_id, player_id);
                return Err(LobbyError::PersistenceFailure {
                    reason: format!("player lookup failed: {}", e),
                });
            }
        };

        if created {
            info!("Created lobby #{} for {} players", lobby_id, capacity);
            if let Some(metrics) = self.metrics() {
                metrics.record_lobby_created();
            }
        }

        let lobby = match lobby {
            Some(lobby) => lobby,
            None => {
                self.inner()?.release_reservation(lobby_id, player_id);
                return Err(LobbyError::InvalidLobbyState {
                    lobby_id,
                    reason: "lobby disappeared while joining".to_string(),
                });
            }
        };

        let mut guard = lobby.lock().await;
        let mut events = Vec::new();

        let full = match guard.add_player(record.clone()) {
            Ok(full) => full,
            Err(e) => {
                self.inner()?.release_reservation(lobby_id, player_id);
                return Err(e);
            }
        };
        if let Some(metrics) = self.metrics() {
            metrics.record_player_queued();
        }

        info!(
            "Player {} ({}) joined lobby #{} ({}/{})",
            record.username,
            player_id,
            lobby_id,
            guard.players().len(),
            capacity
        );
        events.push(LobbyEvent::PlayerJoinedQueue(PlayerJoinedQueue {
            lobby_id,
            player_id,
            username: record.username.clone(),
            queued: guard.player_ids(),
            capacity,
            timestamp: current_timestamp(),
        }));

        if full {
            match self.pop_queue(&mut guard).await {
                Ok(mut pop_events) => {
                    let mut inner = self.inner()?;
                    inner.reservations.remove(&lobby_id);
                    inner.refresh_counts();
                    drop(inner);
                    if let Some(metrics) = self.metrics() {
                        metrics.record_players_dequeued(capacity);
                    }
                    events.append(&mut pop_events);
                }
                Err(e) => {
                    warn!(
                        "Lobby #{} could not pop its queue: {}. Rolling back join of {}",
                        lobby_id, e, player_id
                    );
                    // The add above succeeded, so the removal cannot fail
                    let _ = guard.remove_player(player_id);
                    self.inner()?.release_reservation(lobby_id, player_id);
                    if let Some(metrics) = self.metrics() {
                        metrics.record_players_dequeued(1);
                    }
                    return Err(e);
                }
            }
        }

        drop(guard);
        self.publish_all(events).await;
        Ok(lobby_id)
    }

    /// Fetch maps and pop a full lobby. Called with the lobby lock held.
    async fn pop_queue(&self, lobby: &mut LobbyInstance) -> LobbyResult<Vec<LobbyEvent>> {
        let maps = self
            .maps
            .all_maps()
            .await
            .map_err(|e| LobbyError::PersistenceFailure {
                reason: format!("map lookup failed: {}", e),
            })?;

        let popped = {
            let mut rng = self.rng.lock().map_err(|_| LobbyError::InvalidLobbyState {
                lobby_id: lobby.id(),
                reason: "random source lock poisoned".to_string(),
            })?;
            lobby.pop_queue(&self.selector, &maps, rng.as_mut())?
        };

        let now = current_timestamp();
        let mut events = vec![LobbyEvent::DraftStarted(DraftStarted {
            lobby_id: lobby.id(),
            captain_a: popped.captains.a,
            captain_b: popped.captains.b,
            map: popped.map.clone(),
            remaining: lobby.remaining().to_vec(),
            first_pick: Team::A,
            timestamp: now,
        })];
        if popped.draft_skipped {
            events.push(match_started(lobby));
        }
        Ok(events)
    }

    /// Leave a queuing lobby
    pub async fn leave_queue(&self, player_id: PlayerId) -> LobbyResult<LobbyId> {
        let lobby = self
            .member_lobby(player_id)?
            .ok_or(LobbyError::NotQueued { player_id })?;

        let mut guard = lobby.lock().await;
        let lobby_id = guard.id();
        let record = guard.remove_player(player_id)?;

        {
            let mut inner = self.inner()?;
            inner.release_reservation(lobby_id, player_id);
            // An empty lobby nobody is about to join is dropped
            let unused = inner.reservations.get(&lobby_id) == Some(&0);
            if unused && guard.players().is_empty() {
                inner.reservations.remove(&lobby_id);
                inner.lobbies.remove(&lobby_id);
                debug!("Dropped empty lobby #{}", lobby_id);
                if let Some(metrics) = self.metrics() {
                    metrics.record_lobby_dropped();
                }
            }
            inner.refresh_counts();
        }
        if let Some(metrics) = self.metrics() {
            metrics.record_players_dequeued(1);
        }

        info!(
            "Player {} ({}) left lobby #{} ({}/{})",
            record.username,
            player_id,
            lobby_id,
            guard.players().len(),
            guard.capacity()
        );
        let event = LobbyEvent::PlayerLeftQueue(PlayerLeftQueue {
            lobby_id,
            player_id,
            username: record.username,
            queued: guard.player_ids(),
            capacity: guard.capacity(),
            timestamp: current_timestamp(),
        });

        drop(guard);
        self.publish_all(vec![event]).await;
        Ok(lobby_id)
    }

    /// Draft `target_id` onto the team captained by `captain_id`
    pub async fn pick(
        &self,
        captain_id: PlayerId,
        target_id: PlayerId,
    ) -> LobbyResult<PickOutcome> {
        let lobby = self
            .member_lobby(captain_id)?
            .ok_or(LobbyError::NotACaptain {
                player_id: captain_id,
            })?;

        let mut guard = lobby.lock().await;
        let outcome = guard.pick(captain_id, target_id)?;
        let lobby_id = guard.id();
        if let Some(metrics) = self.metrics() {
            metrics.record_pick();
        }

        let team = guard
            .captain_team(captain_id)
            .ok_or(LobbyError::NotACaptain {
                player_id: captain_id,
            })?;
        info!(
            "Lobby #{}: {} picked player {} for {}",
            lobby_id,
            guard.player(captain_id).map(|p| p.username.as_str()).unwrap_or("?"),
            target_id,
            team
        );

        let mut events = vec![LobbyEvent::PlayerPicked(PlayerPicked {
            lobby_id,
            picked_by: captain_id,
            team,
            player_id: target_id,
            team_a: guard.team(Team::A).to_vec(),
            team_b: guard.team(Team::B).to_vec(),
            remaining: guard.remaining().to_vec(),
            next_turn: team.other(),
            timestamp: current_timestamp(),
        })];
        if let PickOutcome::Complete { auto_assigned } = &outcome {
            if let Some((player, team)) = auto_assigned {
                debug!(
                    "Lobby #{}: player {} auto-assigned to {}",
                    lobby_id, player, team
                );
            }
            events.push(match_started(&guard));
        }

        drop(guard);
        self.publish_all(events).await;
        Ok(outcome)
    }

    /// Record a captain's report. The second, agreeing report commits the
    /// result; a disagreeing one resets the round and returns
    /// [`LobbyError::ConsensusConflict`].
    pub async fn report(
        &self,
        captain_id: PlayerId,
        outcome: Outcome,
    ) -> LobbyResult<ReportOutcome> {
        let lobby = self
            .member_lobby(captain_id)?
            .ok_or(LobbyError::NotACaptain {
                player_id: captain_id,
            })?;

        let mut guard = lobby.lock().await;
        let lobby_id = guard.id();
        let verdict = guard.report(captain_id, outcome)?;

        match verdict {
            Verdict::Pending { claimed_winner } => {
                if let Some(metrics) = self.metrics() {
                    metrics.record_report("pending");
                }
                info!(
                    "Lobby #{}: captain {} reported {} as winner, waiting for confirmation",
                    lobby_id, captain_id, claimed_winner
                );
                let event = LobbyEvent::ReportPending(ReportPending {
                    lobby_id,
                    reported_by: captain_id,
                    claimed_winner,
                    timestamp: current_timestamp(),
                });
                drop(guard);
                self.publish_all(vec![event]).await;
                Ok(ReportOutcome::AwaitingConfirmation { claimed_winner })
            }
            Verdict::Conflict => {
                if let Some(metrics) = self.metrics() {
                    metrics.record_report("conflict");
                }
                self.inner()?.stats.report_conflicts += 1;
                warn!(
                    "Lobby #{}: captains reported conflicting results, round reset",
                    lobby_id
                );
                let event = LobbyEvent::ReportConflict(ReportConflict {
                    lobby_id,
                    captain_a: guard.captain(Team::A).unwrap_or_default(),
                    captain_b: guard.captain(Team::B).unwrap_or_default(),
                    timestamp: current_timestamp(),
                });
                drop(guard);
                self.publish_all(vec![event]).await;
                Err(LobbyError::ConsensusConflict { lobby_id })
            }
            Verdict::Agreed { winner } => {
                if let Some(metrics) = self.metrics() {
                    metrics.record_report("agreed");
                }
                let result = self.commit(&mut guard, winner, false).await?;
                drop(guard);
                self.publish_all(vec![match_complete(&result)]).await;
                Ok(ReportOutcome::Committed(result))
            }
        }
    }

    /// Administrator override: commit `winning_team` for a lobby that is
    /// waiting for results, bypassing captain consensus.
    pub async fn force_result(
        &self,
        lobby_id: LobbyId,
        winning_team: u8,
    ) -> LobbyResult<MatchResult> {
        let winner = Team::from_number(winning_team).ok_or(LobbyError::InvalidTeam {
            team: winning_team,
        })?;
        let lobby = self
            .inner()?
            .lobbies
            .get(&lobby_id)
            .cloned()
            .ok_or_else(|| LobbyError::InvalidLobbyState {
                lobby_id,
                reason: "no such active lobby".to_string(),
            })?;

        let mut guard = lobby.lock().await;
        guard.ensure_reporting()?;
        info!("Lobby #{}: forcing {} as winner", lobby_id, winner);

        let result = self.commit(&mut guard, winner, true).await?;
        drop(guard);
        self.publish_all(vec![match_complete(&result)]).await;
        Ok(result)
    }

    /// Rate, persist and close a lobby. On failure the lobby is untouched.
    async fn commit(
        &self,
        lobby: &mut LobbyInstance,
        winner: Team,
        forced: bool,
    ) -> LobbyResult<MatchResult> {
        let lobby_id = lobby.id();
        let committed = match self
            .coordinator
            .commit(
                lobby_id,
                &lobby.team_records(Team::A),
                &lobby.team_records(Team::B),
                winner,
                forced,
            )
            .await
        {
            Ok(committed) => committed,
            Err(e) => {
                if e.requires_operator() {
                    error!(
                        "Lobby #{} result was not applied and needs operator attention: {}",
                        lobby_id, e
                    );
                    if let Some(metrics) = self.metrics() {
                        metrics.record_persistence_failure();
                    }
                }
                return Err(e);
            }
        };

        lobby.apply_result(&committed)?;
        if let Some(metrics) = self.metrics() {
            metrics.record_rating_commit(committed.duration);
            metrics.record_lobby_completed(forced);
        }

        {
            let mut inner = self.inner()?;
            inner.lobbies.remove(&lobby_id);
            for player_id in lobby.player_ids() {
                inner.members.remove(&player_id);
            }
            inner.stats.lobbies_completed += 1;
            if forced {
                inner.stats.matches_forced += 1;
            }
            inner.refresh_counts();
        }

        info!(
            "Lobby #{} complete: {} won{}",
            lobby_id,
            winner,
            if forced { " (forced)" } else { "" }
        );
        Ok(committed.result)
    }

    /// Snapshot of a lobby by id
    pub async fn lobby(&self, lobby_id: LobbyId) -> LobbyResult<Option<LobbyInstance>> {
        let lobby = self.inner()?.lobbies.get(&lobby_id).cloned();
        match lobby {
            Some(lobby) => Ok(Some(lobby.lock().await.clone())),
            None => Ok(None),
        }
    }

    /// Snapshot of the lobby a player belongs to
    pub async fn lobby_for_member(
        &self,
        player_id: PlayerId,
    ) -> LobbyResult<Option<LobbyInstance>> {
        match self.member_lobby(player_id)? {
            Some(lobby) => Ok(Some(lobby.lock().await.clone())),
            None => Ok(None),
        }
    }

    /// Snapshots of every active lobby in `state`, by ascending id
    pub async fn lobbies_in_state(&self, state: LobbyState) -> LobbyResult<Vec<LobbyInstance>> {
        let mut lobbies: Vec<(LobbyId, Arc<Mutex<LobbyInstance>>)> = self
            .inner()?
            .lobbies
            .iter()
            .map(|(id, lobby)| (*id, lobby.clone()))
            .collect();
        lobbies.sort_by_key(|(id, _)| *id);

        let mut matching = Vec::new();
        for (_, lobby) in lobbies {
            let snapshot = lobby.lock().await.clone();
            if snapshot.state() == state {
                matching.push(snapshot);
            }
        }
        Ok(matching)
    }

    /// Get registry statistics
    pub fn stats(&self) -> LobbyResult<LobbyRegistryStats> {
        let stats = self.inner()?.stats.clone();
        if let Some(metrics) = self.metrics() {
            metrics.update_from_registry_stats(&stats);
        }
        Ok(stats)
    }
}

fn match_started(lobby: &LobbyInstance) -> LobbyEvent {
    LobbyEvent::MatchStarted(MatchStarted {
        lobby_id: lobby.id(),
        map: lobby.map().cloned().unwrap_or(Map {
            id: 0,
            name: String::new(),
        }),
        team_a: lobby.team(Team::A).to_vec(),
        team_b: lobby.team(Team::B).to_vec(),
        timestamp: current_timestamp(),
    })
}

fn match_complete(result: &MatchResult) -> LobbyEvent {
    LobbyEvent::MatchComplete(MatchComplete {
        lobby_id: result.lobby_id,
        winner: result.winner,
        forced: result.forced,
        rating_changes: result.rating_changes.clone(),
        timestamp: current_timestamp(),
    })
}
