//! AMQP message definitions and serialization

use crate::error::{Result, ServiceError};
use crate::types::*;
use serde_json;

/// Default queue for inbound lobby commands
pub const COMMAND_QUEUE: &str = "pickup.commands";
/// Default topic exchange for outbound lobby events
pub const EVENTS_EXCHANGE: &str = "pickup.events";

/// Routing keys for events
pub const QUEUE_JOINED_ROUTING_KEY: &str = "queue.joined";
pub const QUEUE_LEFT_ROUTING_KEY: &str = "queue.left";
pub const DRAFT_STARTED_ROUTING_KEY: &str = "draft.started";
pub const DRAFT_PICKED_ROUTING_KEY: &str = "draft.picked";
pub const MATCH_STARTED_ROUTING_KEY: &str = "match.started";
pub const REPORT_PENDING_ROUTING_KEY: &str = "report.pending";
pub const REPORT_CONFLICT_ROUTING_KEY: &str = "report.conflict";
pub const MATCH_COMPLETE_ROUTING_KEY: &str = "match.complete";
pub const COMMAND_REJECTED_ROUTING_KEY: &str = "command.rejected";

/// Message envelope with metadata
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    /// Create a new message envelope
    pub fn new(payload: T, routing_key: String) -> Self {
        Self {
            payload,
            correlation_id: crate::utils::generate_correlation_id(),
            timestamp: chrono::Utc::now(),
            routing_key,
        }
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            ServiceError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            ServiceError::InvalidCommand {
                reason: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

impl MessageEnvelope<LobbyEvent> {
    /// Wrap an event under its routing key
    pub fn for_event(event: LobbyEvent) -> Self {
        let routing_key = MessageUtils::routing_key(&event).to_string();
        Self::new(event, routing_key)
    }
}

/// Message serialization and validation utilities
pub struct MessageUtils;

impl MessageUtils {
    /// Deserialize a lobby command from bytes. Both a bare command and a
    /// command wrapped in a [`MessageEnvelope`] are accepted.
    pub fn deserialize_command(bytes: &[u8]) -> Result<LobbyCommand> {
        let command = match serde_json::from_slice::<LobbyCommand>(bytes) {
            Ok(command) => command,
            Err(bare_err) => MessageEnvelope::<LobbyCommand>::from_bytes(bytes)
                .map(|envelope| envelope.payload)
                .map_err(|_| ServiceError::InvalidCommand {
                    reason: format!("Failed to deserialize command: {}", bare_err),
                })?,
        };

        Self::validate_command(&command)?;
        Ok(command)
    }

    /// Serialize a lobby command to bytes
    pub fn serialize_command(command: &LobbyCommand) -> Result<Vec<u8>> {
        Self::validate_command(command)?;
        Self::serialize_message(command)
    }

    /// Reject commands that can never succeed. Team numbers are left to the
    /// registry, which reports them as an invalid team.
    pub fn validate_command(command: &LobbyCommand) -> Result<()> {
        let invalid = |reason: &str| -> anyhow::Error {
            ServiceError::InvalidCommand {
                reason: reason.to_string(),
            }
            .into()
        };

        match command {
            LobbyCommand::JoinQueue { player_id } | LobbyCommand::LeaveQueue { player_id } => {
                if *player_id == 0 {
                    return Err(invalid("Player ID cannot be zero"));
                }
            }
            LobbyCommand::Pick {
                captain_id,
                target_id,
            } => {
                if *captain_id == 0 || *target_id == 0 {
                    return Err(invalid("Player ID cannot be zero"));
                }
                if captain_id == target_id {
                    return Err(invalid("Captains cannot pick themselves"));
                }
            }
            LobbyCommand::Report { captain_id, .. } => {
                if *captain_id == 0 {
                    return Err(invalid("Player ID cannot be zero"));
                }
            }
            LobbyCommand::ForceResult { lobby_id, .. } => {
                if *lobby_id == 0 {
                    return Err(invalid("Lobby ID cannot be zero"));
                }
            }
        }

        Ok(())
    }

    /// Serialize any AMQP message to bytes
    pub fn serialize_message<T: serde::Serialize>(message: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| {
            ServiceError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Get routing key for an event
    pub fn routing_key(event: &LobbyEvent) -> &'static str {
        match event {
            LobbyEvent::PlayerJoinedQueue(_) => QUEUE_JOINED_ROUTING_KEY,
            LobbyEvent::PlayerLeftQueue(_) => QUEUE_LEFT_ROUTING_KEY,
            LobbyEvent::DraftStarted(_) => DRAFT_STARTED_ROUTING_KEY,
            LobbyEvent::PlayerPicked(_) => DRAFT_PICKED_ROUTING_KEY,
            LobbyEvent::MatchStarted(_) => MATCH_STARTED_ROUTING_KEY,
            LobbyEvent::ReportPending(_) => REPORT_PENDING_ROUTING_KEY,
            LobbyEvent::ReportConflict(_) => REPORT_CONFLICT_ROUTING_KEY,
            LobbyEvent::MatchComplete(_) => MATCH_COMPLETE_ROUTING_KEY,
            LobbyEvent::CommandRejected(_) => COMMAND_REJECTED_ROUTING_KEY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_envelope_creation() {
        let command = LobbyCommand::JoinQueue { player_id: 42 };
        let envelope = MessageEnvelope::new(command, "test.routing.key".to_string());

        assert_eq!(envelope.routing_key, "test.routing.key");
        assert!(!envelope.correlation_id.is_empty());
    }

    #[test]
    fn test_command_wire_format() {
        let bytes = br#"{"type":"Report","captain_id":7,"outcome":"loss"}"#;
        let command = MessageUtils::deserialize_command(bytes).unwrap();
        assert_eq!(
            command,
            LobbyCommand::Report {
                captain_id: 7,
                outcome: Outcome::Loss
            }
        );

        let bytes = br#"{"type":"ForceResult","lobby_id":3,"winning_team":2}"#;
        let command = MessageUtils::deserialize_command(bytes).unwrap();
        assert_eq!(command.name(), "force_result");
    }

    #[test]
    fn test_enveloped_command_is_accepted() {
        let envelope = MessageEnvelope::new(
            LobbyCommand::Pick {
                captain_id: 1,
                target_id: 9,
            },
            "pick".to_string(),
        );
        let bytes = envelope.to_bytes().unwrap();

        let command = MessageUtils::deserialize_command(&bytes).unwrap();
        assert_eq!(
            command,
            LobbyCommand::Pick {
                captain_id: 1,
                target_id: 9
            }
        );
    }

    #[test]
    fn test_command_validation() {
        assert!(MessageUtils::validate_command(&LobbyCommand::JoinQueue { player_id: 5 }).is_ok());
        assert!(MessageUtils::validate_command(&LobbyCommand::JoinQueue { player_id: 0 }).is_err());
        assert!(MessageUtils::validate_command(&LobbyCommand::Pick {
            captain_id: 4,
            target_id: 4
        })
        .is_err());
        assert!(MessageUtils::validate_command(&LobbyCommand::ForceResult {
            lobby_id: 0,
            winning_team: 1
        })
        .is_err());

        // out-of-range team numbers are the registry's call
        assert!(MessageUtils::validate_command(&LobbyCommand::ForceResult {
            lobby_id: 2,
            winning_team: 9
        })
        .is_ok());
    }

    #[test]
    fn test_garbage_is_rejected() {
        let err = MessageUtils::deserialize_command(b"not json").unwrap_err();
        assert!(err.to_string().contains("Invalid command"));
        assert!(MessageUtils::deserialize_command(br#"{"type":"Dance"}"#).is_err());
    }

    #[test]
    fn test_routing_key_generation() {
        let event = LobbyEvent::ReportConflict(ReportConflict {
            lobby_id: 1,
            captain_a: 10,
            captain_b: 20,
            timestamp: chrono::Utc::now(),
        });
        assert_eq!(MessageUtils::routing_key(&event), REPORT_CONFLICT_ROUTING_KEY);

        let envelope = MessageEnvelope::for_event(event);
        assert_eq!(envelope.routing_key, "report.conflict");

        let json: serde_json::Value =
            serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(json["payload"]["type"], "ReportConflict");
        assert_eq!(json["payload"]["captain_b"], 20);
    }
}
