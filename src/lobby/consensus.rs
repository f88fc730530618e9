//! Dual-captain result reporting
//!
//! A result only counts once both captains have reported the same winner.
//! Disagreement wipes the round and both captains start over.

use crate::error::{LobbyError, LobbyResult};
use crate::types::{LobbyId, Outcome, PerTeam, Team};
use serde::{Deserialize, Serialize};

/// What a report did to the round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// First report recorded, waiting for the other captain
    Pending { claimed_winner: Team },
    /// Both captains named `winner`. The round is left untouched so a failed
    /// commit can be retried from the same state.
    Agreed { winner: Team },
    /// Captains disagreed; the round has been reset
    Conflict,
}

/// Reporting state of one lobby
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRound {
    declared_winner: Option<Team>,
    awaiting_confirmation: bool,
    reported: PerTeam<bool>,
}

impl ReportRound {
    pub fn declared_winner(&self) -> Option<Team> {
        self.declared_winner
    }

    pub fn awaiting_confirmation(&self) -> bool {
        self.awaiting_confirmation
    }

    pub fn has_reported(&self, team: Team) -> bool {
        *self.reported.get(team)
    }

    /// Clear the declared winner and both report flags
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Fix the winner without consensus (forced result)
    pub fn declare(&mut self, winner: Team) {
        self.declared_winner = Some(winner);
    }

    /// Record `reporter`'s claim about their own team
    pub fn report(
        &mut self,
        lobby_id: LobbyId,
        reporter: Team,
        outcome: Outcome,
    ) -> LobbyResult<Verdict> {
        if self.has_reported(reporter) {
            return Err(LobbyError::AlreadyReported {
                lobby_id,
                team: reporter,
            });
        }

        let claimed_winner = outcome.winner_for(reporter);

        match (self.awaiting_confirmation, self.declared_winner) {
            (true, Some(declared)) if declared == claimed_winner => {
                Ok(Verdict::Agreed { winner: declared })
            }
            (true, _) => {
                self.reset();
                Ok(Verdict::Conflict)
            }
            (false, _) => {
                self.declared_winner = Some(claimed_winner);
                *self.reported.get_mut(reporter) = true;
                self.awaiting_confirmation = true;
                Ok(Verdict::Pending { claimed_winner })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_report_is_provisional() {
        let mut round = ReportRound::default();
        let verdict = round.report(1, Team::B, Outcome::Loss).unwrap();

        assert_eq!(
            verdict,
            Verdict::Pending {
                claimed_winner: Team::A
            }
        );
        assert_eq!(round.declared_winner(), Some(Team::A));
        assert!(round.awaiting_confirmation());
        assert!(round.has_reported(Team::B));
        assert!(!round.has_reported(Team::A));
    }

    #[test]
    fn test_second_report_cannot_come_from_same_captain() {
        let mut round = ReportRound::default();
        round.report(4, Team::A, Outcome::Win).unwrap();
        let before = round.clone();

        let err = round.report(4, Team::A, Outcome::Loss).unwrap_err();
        assert_eq!(
            err,
            LobbyError::AlreadyReported {
                lobby_id: 4,
                team: Team::A
            }
        );
        assert_eq!(round, before);
    }

    #[test]
    fn test_agreement_does_not_mutate() {
        let mut round = ReportRound::default();
        round.report(1, Team::A, Outcome::Win).unwrap();
        let before = round.clone();

        let verdict = round.report(1, Team::B, Outcome::Loss).unwrap();
        assert_eq!(verdict, Verdict::Agreed { winner: Team::A });
        assert_eq!(round, before);
    }

    #[test]
    fn test_conflict_resets_round() {
        let mut round = ReportRound::default();
        round.report(1, Team::A, Outcome::Win).unwrap();

        // both captains claim the win
        let verdict = round.report(1, Team::B, Outcome::Win).unwrap();
        assert_eq!(verdict, Verdict::Conflict);
        assert_eq!(round, ReportRound::default());

        // the round can be reported again from scratch, in either order
        round.report(1, Team::B, Outcome::Win).unwrap();
        let verdict = round.report(1, Team::A, Outcome::Loss).unwrap();
        assert_eq!(verdict, Verdict::Agreed { winner: Team::B });
    }
}
