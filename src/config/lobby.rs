//! Lobby configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings that shape every lobby the registry creates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LobbyConfig {
    /// Players per team; a lobby pops at twice this size
    pub players_per_team: usize,
    /// Minimum wins + losses for a player to be preferred as captain
    pub captain_experience_threshold: u32,
    /// How many of the top-rated candidates are eligible as captain
    pub captain_shortlist_size: usize,
    /// Upper bound on the rating commit's persistence call
    pub persistence_timeout_ms: u64,
}

impl LobbyConfig {
    /// Number of players needed to pop the queue
    pub fn lobby_size(&self) -> usize {
        self.players_per_team * 2
    }

    pub fn persistence_timeout(&self) -> Duration {
        Duration::from_millis(self.persistence_timeout_ms)
    }
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            players_per_team: 5,
            captain_experience_threshold: 15,
            captain_shortlist_size: 5,
            persistence_timeout_ms: 10_000,
        }
    }
}
