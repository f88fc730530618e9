//! Lobby instance implementation and lifecycle management
//!
//! A lobby moves `Queuing -> PickingPlayers -> Reporting -> Complete`. Every
//! operation here is synchronous and either succeeds or leaves the lobby
//! untouched; the registry serializes access and performs the I/O (map
//! lookup, rating commit) around these calls.

use crate::error::{LobbyError, LobbyResult};
use crate::lobby::captains::{pick_map, CaptainSelector};
use crate::lobby::consensus::{ReportRound, Verdict};
use crate::lobby::draft::{Draft, PickOutcome};
use crate::rating::CommittedRatings;
use crate::types::{LobbyId, Map, Outcome, PerTeam, PlayerId, PlayerRecord, Team};
use crate::utils::current_timestamp;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Possible states of a lobby
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LobbyState {
    /// Lobby is collecting players
    Queuing,
    /// Captains are drafting
    PickingPlayers,
    /// Teams are set; waiting for both captains to report
    Reporting,
    /// Result committed (terminal state)
    Complete,
}

impl std::fmt::Display for LobbyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LobbyState::Queuing => "queuing",
            LobbyState::PickingPlayers => "picking players",
            LobbyState::Reporting => "reporting",
            LobbyState::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// What happened when the queue popped
#[derive(Debug, Clone, PartialEq)]
pub struct QueuePopped {
    pub captains: PerTeam<PlayerId>,
    pub map: Map,
    /// True when there was no one to draft and the lobby went straight to reporting
    pub draft_skipped: bool,
}

/// Concrete implementation of a lobby instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyInstance {
    id: LobbyId,
    capacity: usize,
    state: LobbyState,
    /// Queued players in join order
    players: Vec<PlayerRecord>,
    captains: Option<PerTeam<PlayerId>>,
    draft: Draft,
    map: Option<Map>,
    round: ReportRound,
    created_at: DateTime<Utc>,
}

impl LobbyInstance {
    /// Create an empty queuing lobby that pops at `capacity` players
    pub fn new(id: LobbyId, capacity: usize) -> Self {
        Self {
            id,
            capacity,
            state: LobbyState::Queuing,
            players: Vec::with_capacity(capacity),
            captains: None,
            draft: Draft::default(),
            map: None,
            round: ReportRound::default(),
            created_at: current_timestamp(),
        }
    }

    /// Get lobby ID
    pub fn id(&self) -> LobbyId {
        self.id
    }

    pub fn state(&self) -> LobbyState {
        self.state
    }

    /// Number of players needed to pop the queue
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Queued players in join order
    pub fn players(&self) -> &[PlayerRecord] {
        &self.players
    }

    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.players.iter().map(|p| p.id).collect()
    }

    pub fn player(&self, player_id: PlayerId) -> Option<&PlayerRecord> {
        self.players.iter().find(|p| p.id == player_id)
    }

    pub fn contains(&self, player_id: PlayerId) -> bool {
        self.player(player_id).is_some()
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.capacity
    }

    pub fn captain(&self, team: Team) -> Option<PlayerId> {
        self.captains.as_ref().map(|c| *c.get(team))
    }

    /// Which team `player_id` captains, if any
    pub fn captain_team(&self, player_id: PlayerId) -> Option<Team> {
        let captains = self.captains.as_ref()?;
        [Team::A, Team::B]
            .into_iter()
            .find(|team| *captains.get(*team) == player_id)
    }

    /// Roster of `team`, captain first
    pub fn team(&self, team: Team) -> &[PlayerId] {
        self.draft.team(team)
    }

    /// Records of `team`'s members in roster order
    pub fn team_records(&self, team: Team) -> Vec<PlayerRecord> {
        self.draft
            .team(team)
            .iter()
            .filter_map(|id| self.player(*id).cloned())
            .collect()
    }

    /// Players not yet drafted
    pub fn remaining(&self) -> &[PlayerId] {
        self.draft.remaining()
    }

    pub fn pick_turn(&self) -> Option<Team> {
        match self.state {
            LobbyState::PickingPlayers => self.draft.turn(),
            _ => None,
        }
    }

    pub fn map(&self) -> Option<&Map> {
        self.map.as_ref()
    }

    pub fn declared_winner(&self) -> Option<Team> {
        self.round.declared_winner()
    }

    pub fn awaiting_confirmation(&self) -> bool {
        self.round.awaiting_confirmation()
    }

    pub fn has_reported(&self, team: Team) -> bool {
        self.round.has_reported(team)
    }

    fn require_state(&self, expected: LobbyState, action: &str) -> LobbyResult<()> {
        if self.state != expected {
            return Err(LobbyError::InvalidLobbyState {
                lobby_id: self.id,
                reason: format!("cannot {} while {}", action, self.state),
            });
        }
        Ok(())
    }

    /// Add a player to the queue. Returns true once the queue is full.
    pub fn add_player(&mut self, player: PlayerRecord) -> LobbyResult<bool> {
        self.require_state(LobbyState::Queuing, "join")?;
        if self.contains(player.id) {
            return Err(LobbyError::AlreadyQueued {
                player_id: player.id,
            });
        }
        if self.is_full() {
            return Err(LobbyError::InvalidLobbyState {
                lobby_id: self.id,
                reason: "the queue is full".to_string(),
            });
        }

        debug!(
            "Player {} ({}) joined lobby #{} ({}/{})",
            player.username,
            player.id,
            self.id,
            self.players.len() + 1,
            self.capacity
        );
        self.players.push(player);
        Ok(self.is_full())
    }

    /// Remove a player from the queue. Only possible while queuing.
    pub fn remove_player(&mut self, player_id: PlayerId) -> LobbyResult<PlayerRecord> {
        self.require_state(LobbyState::Queuing, "leave the queue")?;
        let position = self
            .players
            .iter()
            .position(|p| p.id == player_id)
            .ok_or(LobbyError::NotQueued { player_id })?;
        Ok(self.players.remove(position))
    }

    /// Pop a full queue: choose captains and a map, then open the draft.
    ///
    /// With one player per team there is no one to draft and the lobby goes
    /// straight to reporting.
    pub fn pop_queue(
        &mut self,
        selector: &CaptainSelector,
        maps: &[Map],
        rng: &mut dyn RngCore,
    ) -> LobbyResult<QueuePopped> {
        self.require_state(LobbyState::Queuing, "pop the queue")?;
        if !self.is_full() {
            return Err(LobbyError::InvalidLobbyState {
                lobby_id: self.id,
                reason: format!(
                    "queue has {} of {} players",
                    self.players.len(),
                    self.capacity
                ),
            });
        }

        let map = pick_map(maps, rng)
            .cloned()
            .ok_or(LobbyError::NoMapsAvailable { lobby_id: self.id })?;
        let pair = selector
            .select(&self.players, rng)
            .ok_or_else(|| LobbyError::InvalidLobbyState {
                lobby_id: self.id,
                reason: "not enough players to choose captains".to_string(),
            })?;

        let captain_a = self.players[pair.first].id;
        let captain_b = self.players[pair.second].id;
        let remaining: Vec<PlayerId> = self
            .players
            .iter()
            .map(|p| p.id)
            .filter(|id| *id != captain_a && *id != captain_b)
            .collect();

        let draft_skipped = remaining.is_empty();
        self.draft = Draft::new(captain_a, captain_b, remaining);
        self.captains = Some(PerTeam::new(captain_a, captain_b));
        self.state = if draft_skipped {
            LobbyState::Reporting
        } else {
            LobbyState::PickingPlayers
        };

        info!(
            "Lobby #{} popped: captains {} ({:.0}) and {} ({:.0}) on {}",
            self.id,
            self.players[pair.first].username,
            self.players[pair.first].skill_rating,
            self.players[pair.second].username,
            self.players[pair.second].skill_rating,
            map.name
        );
        self.map = Some(map.clone());

        Ok(QueuePopped {
            captains: PerTeam::new(captain_a, captain_b),
            map,
            draft_skipped,
        })
    }

    fn captain_side(&self, captain_id: PlayerId) -> LobbyResult<Team> {
        self.captain_team(captain_id)
            .ok_or(LobbyError::NotACaptain {
                player_id: captain_id,
            })
    }

    /// Draft `target_id` for the team captained by `captain_id`
    pub fn pick(&mut self, captain_id: PlayerId, target_id: PlayerId) -> LobbyResult<PickOutcome> {
        let team = self.captain_side(captain_id)?;
        self.require_state(LobbyState::PickingPlayers, "pick")?;

        let outcome = self.draft.pick(self.id, team, target_id)?;
        if let PickOutcome::Complete { .. } = outcome {
            info!("Lobby #{} finished drafting, waiting for results", self.id);
            self.state = LobbyState::Reporting;
        }
        Ok(outcome)
    }

    /// Record a captain's report about their own team's result
    pub fn report(&mut self, captain_id: PlayerId, outcome: Outcome) -> LobbyResult<Verdict> {
        let team = self.captain_side(captain_id)?;
        self.require_state(LobbyState::Reporting, "report a result")?;
        self.round.report(self.id, team, outcome)
    }

    /// Check that a forced result may be applied
    pub fn ensure_reporting(&self) -> LobbyResult<()> {
        self.require_state(LobbyState::Reporting, "force a result")
    }

    /// Swap in the committed records and close the lobby
    pub fn apply_result(&mut self, committed: &CommittedRatings) -> LobbyResult<()> {
        self.require_state(LobbyState::Reporting, "complete")?;

        for record in committed.team_a.iter().chain(committed.team_b.iter()) {
            if let Some(player) = self.players.iter_mut().find(|p| p.id == record.id) {
                *player = record.clone();
            }
        }
        self.round.declare(committed.result.winner);
        self.state = LobbyState::Complete;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rating::{MockRatingEngine, RatingUpdateCoordinator};
    use crate::store::InMemoryRepository;
    use crate::types::RatingSnapshot;
    use rand::rngs::mock::StepRng;
    use std::sync::Arc;
    use std::time::Duration;

    fn create_test_player(id: PlayerId, rating: f64) -> PlayerRecord {
        let mut player = PlayerRecord::new(id, format!("player{}", id), RatingSnapshot::default());
        player.skill_rating = rating;
        player
    }

    fn create_test_maps() -> Vec<Map> {
        vec![Map {
            id: 1,
            name: "Mirage".to_string(),
        }]
    }

    /// Fill a lobby of `team_size` per side; player i has rating 1000 + 100 * i
    fn create_full_lobby(team_size: usize) -> LobbyInstance {
        let mut lobby = LobbyInstance::new(1, team_size * 2);
        for i in 1..=(team_size * 2) as u64 {
            lobby
                .add_player(create_test_player(i, 1000.0 + 100.0 * i as f64))
                .unwrap();
        }
        lobby
    }

    fn pop(lobby: &mut LobbyInstance) -> QueuePopped {
        // StepRng(0, 0) always chooses index 0: the top-rated shortlist entry
        let mut rng = StepRng::new(0, 0);
        lobby
            .pop_queue(&CaptainSelector::new(15, 5), &create_test_maps(), &mut rng)
            .unwrap()
    }

    #[test]
    fn test_queue_fills_up() {
        let mut lobby = LobbyInstance::new(3, 4);
        assert!(!lobby.add_player(create_test_player(1, 1500.0)).unwrap());
        assert!(!lobby.add_player(create_test_player(2, 1500.0)).unwrap());
        assert!(matches!(
            lobby.add_player(create_test_player(2, 1500.0)),
            Err(LobbyError::AlreadyQueued { player_id: 2 })
        ));
        assert!(!lobby.add_player(create_test_player(3, 1500.0)).unwrap());
        assert!(lobby.add_player(create_test_player(4, 1500.0)).unwrap());
        assert!(lobby.is_full());
        assert!(lobby.add_player(create_test_player(5, 1500.0)).is_err());
        assert_eq!(lobby.player_ids(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_leave_only_while_queuing() {
        let mut lobby = create_full_lobby(2);
        assert!(matches!(
            lobby.remove_player(9),
            Err(LobbyError::NotQueued { player_id: 9 })
        ));

        pop(&mut lobby);
        let err = lobby.remove_player(1).unwrap_err();
        assert!(matches!(err, LobbyError::InvalidLobbyState { .. }));
        assert_eq!(lobby.players().len(), 4);
    }

    #[test]
    fn test_pop_queue_seeds_draft() {
        let mut lobby = create_full_lobby(5);
        let popped = pop(&mut lobby);

        // top-rated is player 10, its only neighbour is player 9
        assert_eq!(popped.captains, PerTeam::new(9, 10));
        assert!(!popped.draft_skipped);
        assert_eq!(lobby.state(), LobbyState::PickingPlayers);
        assert_eq!(lobby.pick_turn(), Some(Team::A));
        assert_eq!(lobby.team(Team::A), &[9]);
        assert_eq!(lobby.team(Team::B), &[10]);
        assert_eq!(lobby.remaining(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(lobby.map().unwrap().name, "Mirage");
    }

    #[test]
    fn test_pop_queue_without_maps_changes_nothing() {
        let mut lobby = create_full_lobby(2);
        let mut rng = StepRng::new(0, 0);
        let err = lobby
            .pop_queue(&CaptainSelector::new(15, 5), &[], &mut rng)
            .unwrap_err();

        assert_eq!(err, LobbyError::NoMapsAvailable { lobby_id: 1 });
        assert_eq!(lobby.state(), LobbyState::Queuing);
        assert!(lobby.captain(Team::A).is_none());
    }

    #[test]
    fn test_single_player_teams_skip_the_draft() {
        let mut lobby = create_full_lobby(1);
        let popped = pop(&mut lobby);

        assert!(popped.draft_skipped);
        assert_eq!(lobby.state(), LobbyState::Reporting);
        assert_eq!(lobby.pick_turn(), None);
        assert_eq!(lobby.team(Team::A), &[1]);
        assert_eq!(lobby.team(Team::B), &[2]);
    }

    #[test]
    fn test_only_captains_pick() {
        let mut lobby = create_full_lobby(2);
        pop(&mut lobby);
        // captains are 3 (A) and 4 (B); 1 and 2 remain

        assert!(matches!(
            lobby.pick(1, 2),
            Err(LobbyError::NotACaptain { player_id: 1 })
        ));
        assert!(matches!(
            lobby.pick(4, 1),
            Err(LobbyError::NotYourTurn { team: Team::B, .. })
        ));

        let outcome = lobby.pick(3, 2).unwrap();
        assert_eq!(
            outcome,
            PickOutcome::Complete {
                auto_assigned: Some((1, Team::B))
            }
        );
        assert_eq!(lobby.state(), LobbyState::Reporting);
        assert_eq!(lobby.team(Team::A), &[3, 2]);
        assert_eq!(lobby.team(Team::B), &[4, 1]);
    }

    #[test]
    fn test_report_requires_reporting_state() {
        let mut lobby = create_full_lobby(2);
        assert!(matches!(
            lobby.report(3, Outcome::Win),
            Err(LobbyError::NotACaptain { .. })
        ));

        pop(&mut lobby);
        let err = lobby.report(3, Outcome::Win).unwrap_err();
        assert!(matches!(err, LobbyError::InvalidLobbyState { .. }));
        assert!(lobby.ensure_reporting().is_err());
    }

    #[tokio::test]
    async fn test_apply_result_completes_lobby() {
        let mut lobby = create_full_lobby(1);
        pop(&mut lobby);
        lobby.report(1, Outcome::Win).unwrap();
        assert_eq!(
            lobby.report(2, Outcome::Loss).unwrap(),
            Verdict::Agreed { winner: Team::A }
        );

        let coordinator = RatingUpdateCoordinator::new(
            Arc::new(MockRatingEngine::new(25.0)),
            Arc::new(InMemoryRepository::new()),
            Duration::from_secs(1),
        );
        let committed = coordinator
            .commit(
                lobby.id(),
                &lobby.team_records(Team::A),
                &lobby.team_records(Team::B),
                Team::A,
                false,
            )
            .await
            .unwrap();
        lobby.apply_result(&committed).unwrap();

        assert_eq!(lobby.state(), LobbyState::Complete);
        assert_eq!(lobby.declared_winner(), Some(Team::A));
        let winner = lobby.player(1).unwrap();
        assert_eq!(winner.skill_rating, 1125.0);
        assert_eq!(winner.previous_skill_rating, 1100.0);
        assert_eq!(winner.wins, 1);
        assert_eq!(lobby.player(2).unwrap().losses, 1);
    }
}
