//! Turn-based draft of the non-captain players

use crate::error::{LobbyError, LobbyResult};
use crate::types::{LobbyId, PerTeam, PlayerId, Team};
use serde::{Deserialize, Serialize};

/// Result of a successful pick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickOutcome {
    /// More picks to come; `next_turn` picks next
    Continue { next_turn: Team },
    /// Every player is on a team. `auto_assigned` is the last player, placed
    /// on the team holding the turn without a pick.
    Complete {
        auto_assigned: Option<(PlayerId, Team)>,
    },
}

/// Draft board: the undrafted pool, both rosters and whose turn it is
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    remaining: Vec<PlayerId>,
    teams: PerTeam<Vec<PlayerId>>,
    turn: Option<Team>,
}

impl Draft {
    /// Seed the board with both captains at the head of their rosters.
    /// Team A picks first.
    pub fn new(captain_a: PlayerId, captain_b: PlayerId, remaining: Vec<PlayerId>) -> Self {
        Self {
            remaining,
            teams: PerTeam::new(vec![captain_a], vec![captain_b]),
            turn: Some(Team::A),
        }
    }

    pub fn remaining(&self) -> &[PlayerId] {
        &self.remaining
    }

    pub fn team(&self, team: Team) -> &[PlayerId] {
        self.teams.get(team)
    }

    /// Team holding the pick, `None` before the draft is seeded
    pub fn turn(&self) -> Option<Team> {
        self.turn
    }

    pub fn is_complete(&self) -> bool {
        self.turn.is_some() && self.remaining.is_empty()
    }

    /// Team the player was drafted to, if any
    pub fn team_of(&self, player_id: PlayerId) -> Option<Team> {
        [Team::A, Team::B]
            .into_iter()
            .find(|team| self.teams.get(*team).contains(&player_id))
    }

    /// Move `target` from the pool to `requester`'s roster and pass the turn.
    ///
    /// When a single player is left afterwards they go to the team now
    /// holding the turn, closing the draft. A rejected pick changes nothing.
    pub fn pick(
        &mut self,
        lobby_id: LobbyId,
        requester: Team,
        target: PlayerId,
    ) -> LobbyResult<PickOutcome> {
        let turn = match self.turn {
            Some(turn) if !self.remaining.is_empty() => turn,
            _ => {
                return Err(LobbyError::InvalidLobbyState {
                    lobby_id,
                    reason: "the draft is not open".to_string(),
                })
            }
        };
        if requester != turn {
            return Err(LobbyError::NotYourTurn {
                lobby_id,
                team: requester,
            });
        }
        let position = self
            .remaining
            .iter()
            .position(|id| *id == target)
            .ok_or(LobbyError::PlayerUnavailable {
                lobby_id,
                player_id: target,
            })?;

        let picked = self.remaining.remove(position);
        self.teams.get_mut(requester).push(picked);
        let next = requester.other();
        self.turn = Some(next);

        if self.remaining.len() == 1 {
            let last = self.remaining.remove(0);
            self.teams.get_mut(next).push(last);
            return Ok(PickOutcome::Complete {
                auto_assigned: Some((last, next)),
            });
        }
        if self.remaining.is_empty() {
            return Ok(PickOutcome::Complete {
                auto_assigned: None,
            });
        }

        Ok(PickOutcome::Continue { next_turn: next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_team_a_picks_first() {
        let mut draft = Draft::new(1, 2, vec![3, 4, 5, 6]);
        assert_eq!(draft.turn(), Some(Team::A));

        let err = draft.pick(1, Team::B, 3).unwrap_err();
        assert_eq!(
            err,
            LobbyError::NotYourTurn {
                lobby_id: 1,
                team: Team::B
            }
        );
        assert_eq!(draft.remaining(), &[3, 4, 5, 6]);
    }

    #[test]
    fn test_unavailable_player_is_rejected() {
        let mut draft = Draft::new(1, 2, vec![3, 4, 5, 6]);
        draft.pick(1, Team::A, 3).unwrap();
        let before = draft.clone();

        // already drafted, a captain, and a stranger
        for target in [3, 2, 99] {
            let err = draft.pick(1, Team::B, target).unwrap_err();
            assert!(matches!(err, LobbyError::PlayerUnavailable { .. }));
        }
        assert_eq!(draft, before);
    }

    #[test]
    fn test_last_player_goes_to_team_holding_turn() {
        let mut draft = Draft::new(1, 2, vec![3, 4, 5, 6, 7, 8, 9, 10]);

        assert_eq!(
            draft.pick(1, Team::A, 3).unwrap(),
            PickOutcome::Continue { next_turn: Team::B }
        );
        draft.pick(1, Team::B, 4).unwrap();
        draft.pick(1, Team::A, 5).unwrap();
        draft.pick(1, Team::B, 6).unwrap();
        draft.pick(1, Team::A, 7).unwrap();
        draft.pick(1, Team::B, 8).unwrap();

        // A takes 9; 10 is left and B holds the turn
        let outcome = draft.pick(1, Team::A, 9).unwrap();
        assert_eq!(
            outcome,
            PickOutcome::Complete {
                auto_assigned: Some((10, Team::B))
            }
        );
        assert!(draft.is_complete());
        assert_eq!(draft.team(Team::A), &[1, 3, 5, 7, 9]);
        assert_eq!(draft.team(Team::B), &[2, 4, 6, 8, 10]);
    }

    #[test]
    fn test_two_per_team_draft_is_one_pick() {
        let mut draft = Draft::new(1, 2, vec![3, 4]);
        let outcome = draft.pick(7, Team::A, 4).unwrap();
        assert_eq!(
            outcome,
            PickOutcome::Complete {
                auto_assigned: Some((3, Team::B))
            }
        );
        assert_eq!(draft.team_of(4), Some(Team::A));
        assert_eq!(draft.team_of(3), Some(Team::B));
    }

    #[test]
    fn test_closed_draft_rejects_picks() {
        let mut draft = Draft::new(1, 2, vec![]);
        assert!(draft.is_complete());
        let err = draft.pick(1, Team::A, 3).unwrap_err();
        assert!(matches!(err, LobbyError::InvalidLobbyState { .. }));

        let mut unseeded = Draft::default();
        assert!(!unseeded.is_complete());
        assert!(unseeded.pick(1, Team::A, 3).is_err());
    }

    proptest! {
        #[test]
        fn prop_turns_alternate_and_partition_holds(
            team_size in 2usize..7,
            choices in prop::collection::vec(any::<prop::sample::Index>(), 12),
        ) {
            let total = team_size * 2;
            let pool: Vec<PlayerId> = (3..(total as u64 + 1)).collect();
            let mut draft = Draft::new(1, 2, pool);
            let mut expected_turn = Team::A;
            let mut picks = 0;

            loop {
                prop_assert_eq!(draft.turn(), Some(expected_turn));
                let target = *choices[picks].get(draft.remaining());
                match draft.pick(1, expected_turn, target).unwrap() {
                    PickOutcome::Continue { next_turn } => {
                        prop_assert_eq!(next_turn, expected_turn.other());
                        expected_turn = next_turn;
                    }
                    PickOutcome::Complete { auto_assigned } => {
                        let (_, team) = auto_assigned.unwrap();
                        prop_assert_eq!(team, expected_turn.other());
                        break;
                    }
                }
                picks += 1;
            }

            let a = draft.team(Team::A);
            let b = draft.team(Team::B);
            prop_assert!(draft.remaining().is_empty());
            prop_assert_eq!(a.len(), team_size);
            prop_assert_eq!(b.len(), team_size);
            let all: HashSet<PlayerId> = a.iter().chain(b.iter()).copied().collect();
            prop_assert_eq!(all.len(), total);
            prop_assert_eq!(all, (1..=total as u64).collect::<HashSet<_>>());
        }
    }
}
