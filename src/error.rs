//! Error types for the pickup lobby service
//!
//! Lobby operations return the typed [`LobbyError`] so the command layer can
//! tell protocol outcomes apart. Service plumbing (configuration, AMQP, HTTP,
//! storage) uses anyhow like the rest of the application.

use crate::types::{LobbyId, PlayerId, Team};

/// Result type alias for service plumbing
pub type Result<T> = anyhow::Result<T>;

/// Result type alias for lobby operations
pub type LobbyResult<T> = std::result::Result<T, LobbyError>;

/// Errors returned by lobby state machine operations
///
/// Every variant except [`LobbyError::ConsensusConflict`] leaves the lobby
/// exactly as it was before the command.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LobbyError {
    #[error("It is not {team}'s turn to pick in lobby #{lobby_id}")]
    NotYourTurn { lobby_id: LobbyId, team: Team },

    #[error("Player {player_id} is not available to pick in lobby #{lobby_id}")]
    PlayerUnavailable {
        lobby_id: LobbyId,
        player_id: PlayerId,
    },

    #[error("The captain of {team} has already reported the result of lobby #{lobby_id}")]
    AlreadyReported { lobby_id: LobbyId, team: Team },

    #[error("Lobby #{lobby_id} cannot do that right now: {reason}")]
    InvalidLobbyState { lobby_id: LobbyId, reason: String },

    #[error("Player {player_id} is already in an active lobby or queue")]
    AlreadyQueued { player_id: PlayerId },

    #[error("Player {player_id} is not currently in a queue")]
    NotQueued { player_id: PlayerId },

    #[error("Player {player_id} is not registered")]
    UnknownPlayer { player_id: PlayerId },

    #[error("Player {player_id} is not a captain of an open lobby")]
    NotACaptain { player_id: PlayerId },

    #[error("Invalid winning team {team}, expected 1 or 2")]
    InvalidTeam { team: u8 },

    #[error("No maps are available for lobby #{lobby_id}")]
    NoMapsAvailable { lobby_id: LobbyId },

    #[error("Conflicting results reported for lobby #{lobby_id}, both captains must report again")]
    ConsensusConflict { lobby_id: LobbyId },

    #[error("Rating calculation failed: {reason}")]
    RatingCalculationFailed { reason: String },

    #[error("Persistence failure: {reason}")]
    PersistenceFailure { reason: String },
}

impl LobbyError {
    /// Whether an operator has to look at this failure before anyone retries.
    ///
    /// A failed rating commit cannot be retried blindly: the store may or may
    /// not have applied it.
    pub fn requires_operator(&self) -> bool {
        matches!(self, LobbyError::PersistenceFailure { .. })
    }

    /// Lobby the error concerns, for variants that name one
    pub fn lobby_id(&self) -> Option<LobbyId> {
        match self {
            LobbyError::NotYourTurn { lobby_id, .. }
            | LobbyError::PlayerUnavailable { lobby_id, .. }
            | LobbyError::AlreadyReported { lobby_id, .. }
            | LobbyError::NoMapsAvailable { lobby_id }
            | LobbyError::ConsensusConflict { lobby_id } => Some(*lobby_id),
            // 0 marks registry-wide failures
            LobbyError::InvalidLobbyState { lobby_id, .. } if *lobby_id != 0 => Some(*lobby_id),
            _ => None,
        }
    }

    /// Short machine-readable label, used for metrics and command replies
    pub fn kind(&self) -> &'static str {
        match self {
            LobbyError::NotYourTurn { .. } => "not_your_turn",
            LobbyError::PlayerUnavailable { .. } => "player_unavailable",
            LobbyError::AlreadyReported { .. } => "already_reported",
            LobbyError::InvalidLobbyState { .. } => "invalid_lobby_state",
            LobbyError::AlreadyQueued { .. } => "already_queued",
            LobbyError::NotQueued { .. } => "not_queued",
            LobbyError::UnknownPlayer { .. } => "unknown_player",
            LobbyError::NotACaptain { .. } => "not_a_captain",
            LobbyError::InvalidTeam { .. } => "invalid_team",
            LobbyError::NoMapsAvailable { .. } => "no_maps_available",
            LobbyError::ConsensusConflict { .. } => "consensus_conflict",
            LobbyError::RatingCalculationFailed { .. } => "rating_calculation_failed",
            LobbyError::PersistenceFailure { .. } => "persistence_failure",
        }
    }
}

/// Errors raised by the service shell around the lobby core
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Invalid command: {reason}")]
    InvalidCommand { reason: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Storage error: {message}")]
    StorageError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_persistence_failures_need_an_operator() {
        let persistence = LobbyError::PersistenceFailure {
            reason: "disk full".to_string(),
        };
        assert!(persistence.requires_operator());

        let conflict = LobbyError::ConsensusConflict { lobby_id: 3 };
        assert!(!conflict.requires_operator());
        assert!(!LobbyError::InvalidTeam { team: 7 }.requires_operator());
    }

    #[test]
    fn test_error_messages_name_the_lobby() {
        let err = LobbyError::NotYourTurn {
            lobby_id: 12,
            team: Team::B,
        };
        assert_eq!(err.to_string(), "It is not Team 2's turn to pick in lobby #12");
        assert_eq!(err.kind(), "not_your_turn");
    }
}
