//! Rating update coordinator
//!
//! Turns a decided match into one rating period, applies the engine output
//! to copies of the players' records, and writes them back in one atomic
//! repository call. Nothing is handed back to the lobby unless the write
//! succeeded, so a failed commit leaves the lobby exactly as it was.

use crate::error::{LobbyError, LobbyResult};
use crate::rating::engine::{RatingEngine, RatingPeriod};
use crate::store::PlayerRepository;
use crate::types::{LobbyId, MatchResult, PlayerRecord, RatingChange, RatingSnapshot, Team};
use crate::utils::mean;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Updated team rosters plus the per-player summary of a committed match
#[derive(Debug, Clone)]
pub struct CommittedRatings {
    pub team_a: Vec<PlayerRecord>,
    pub team_b: Vec<PlayerRecord>,
    pub result: MatchResult,
    pub duration: Duration,
}

/// Mean rating, deviation and volatility of a team
pub fn composite_rating(team: &[PlayerRecord]) -> Option<RatingSnapshot> {
    let ratings: Vec<f64> = team.iter().map(|p| p.skill_rating).collect();
    let deviations: Vec<f64> = team.iter().map(|p| p.rating_deviation).collect();
    let volatilities: Vec<f64> = team.iter().map(|p| p.volatility).collect();

    Some(RatingSnapshot {
        rating: mean(&ratings)?,
        deviation: mean(&deviations)?,
        volatility: mean(&volatilities)?,
    })
}

/// Copy `records` with engine output applied, tallies bumped and the
/// previous rating snapshotted.
fn apply_ratings(
    records: &[PlayerRecord],
    rated: &[RatingSnapshot],
    team: Team,
    winner: Team,
    changes: &mut Vec<RatingChange>,
) -> Vec<PlayerRecord> {
    let won = team == winner;
    records
        .iter()
        .zip(rated.iter())
        .map(|(record, new_rating)| {
            let mut updated = record.clone();
            updated.previous_skill_rating = record.skill_rating;
            updated.skill_rating = new_rating.rating;
            updated.rating_deviation = new_rating.deviation;
            updated.volatility = new_rating.volatility;
            if won {
                updated.wins += 1;
            } else {
                updated.losses += 1;
            }
            changes.push(RatingChange {
                player_id: record.id,
                username: record.username.clone(),
                team,
                won,
                previous_rating: record.skill_rating,
                new_rating: *new_rating,
            });
            updated
        })
        .collect()
}

pub struct RatingUpdateCoordinator {
    engine: Arc<dyn RatingEngine>,
    players: Arc<dyn PlayerRepository>,
    persistence_timeout: Duration,
}

impl RatingUpdateCoordinator {
    pub fn new(
        engine: Arc<dyn RatingEngine>,
        players: Arc<dyn PlayerRepository>,
        persistence_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            players,
            persistence_timeout,
        }
    }

    /// Compute the post-match records without persisting anything.
    ///
    /// Every player is rated against the opposing team's composite, never
    /// against individual opponents.
    pub fn compute(
        &self,
        lobby_id: LobbyId,
        team_a: &[PlayerRecord],
        team_b: &[PlayerRecord],
        winner: Team,
        forced: bool,
    ) -> LobbyResult<(Vec<PlayerRecord>, Vec<PlayerRecord>, MatchResult)> {
        let (composite_a, composite_b) = match (composite_rating(team_a), composite_rating(team_b))
        {
            (Some(a), Some(b)) => (a, b),
            _ => {
                return Err(LobbyError::RatingCalculationFailed {
                    reason: format!("lobby #{} has an empty team", lobby_id),
                })
            }
        };

        let mut period = RatingPeriod::default();
        let mut members: Vec<(Team, usize)> = Vec::with_capacity(team_a.len() + team_b.len());
        for player in team_a {
            members.push((Team::A, period.add_participant(player.rating())));
        }
        for player in team_b {
            members.push((Team::B, period.add_participant(player.rating())));
        }
        let composite_a_index = period.add_participant(composite_a);
        let composite_b_index = period.add_participant(composite_b);

        for (team, index) in &members {
            let opponent = match team {
                Team::A => composite_b_index,
                Team::B => composite_a_index,
            };
            if *team == winner {
                period.add_result(*index, opponent);
            } else {
                period.add_result(opponent, *index);
            }
        }

        debug!(
            "Rating lobby #{} with {} ({}): composite A {:.1}, composite B {:.1}",
            lobby_id,
            self.engine.name(),
            period.results.len(),
            composite_a.rating,
            composite_b.rating
        );

        let rated = self
            .engine
            .rate_period(&period)
            .map_err(|e| LobbyError::RatingCalculationFailed {
                reason: e.to_string(),
            })?;
        if rated.len() != period.participants.len() {
            return Err(LobbyError::RatingCalculationFailed {
                reason: format!(
                    "engine returned {} ratings for {} participants",
                    rated.len(),
                    period.participants.len()
                ),
            });
        }

        let mut changes = Vec::with_capacity(members.len());
        let (rated_a, rated_b) = rated.split_at(team_a.len());
        let updated_a = apply_ratings(team_a, rated_a, Team::A, winner, &mut changes);
        let updated_b = apply_ratings(team_b, rated_b, Team::B, winner, &mut changes);

        let result = MatchResult {
            lobby_id,
            winner,
            forced,
            rating_changes: changes,
        };
        Ok((updated_a, updated_b, result))
    }

    /// Compute and persist a match result. The repository write is bounded
    /// by the configured timeout; a timeout counts as a persistence failure.
    pub async fn commit(
        &self,
        lobby_id: LobbyId,
        team_a: &[PlayerRecord],
        team_b: &[PlayerRecord],
        winner: Team,
        forced: bool,
    ) -> LobbyResult<CommittedRatings> {
        let start = Instant::now();
        let (updated_a, updated_b, result) =
            self.compute(lobby_id, team_a, team_b, winner, forced)?;

        let all: Vec<PlayerRecord> = updated_a.iter().chain(updated_b.iter()).cloned().collect();
        match tokio::time::timeout(self.persistence_timeout, self.players.save_players(&all)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(
                    "Failed to persist ratings for lobby #{}: {}. Operator attention required",
                    lobby_id, e
                );
                return Err(LobbyError::PersistenceFailure {
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                error!(
                    "Persisting ratings for lobby #{} timed out after {:?}. \
                     Operator attention required",
                    lobby_id, self.persistence_timeout
                );
                return Err(LobbyError::PersistenceFailure {
                    reason: format!("save timed out after {:?}", self.persistence_timeout),
                });
            }
        }

        let duration = start.elapsed();
        info!(
            "Committed ratings for lobby #{} ({} won{}): {} players updated in {:?}",
            lobby_id,
            winner,
            if forced { ", forced" } else { "" },
            all.len(),
            duration
        );

        Ok(CommittedRatings {
            team_a: updated_a,
            team_b: updated_b,
            result,
            duration,
        })
    }
}
