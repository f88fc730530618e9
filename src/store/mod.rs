//! Player and map repositories
//!
//! The lobby core only talks to these traits. Player records and maps outlive
//! any single lobby and are never deleted by lobby logic.

pub mod file;
pub mod memory;

use crate::error::Result;
use crate::types::{Map, PlayerId, PlayerRecord};
use async_trait::async_trait;

pub use file::JsonFileRepository;
pub use memory::InMemoryRepository;

/// Persistent store of registered players
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlayerRepository: Send + Sync {
    /// Look up a single player by external id
    async fn find_player(&self, id: PlayerId) -> Result<Option<PlayerRecord>>;

    /// Look up several players; unknown ids are skipped
    async fn find_players(&self, ids: &[PlayerId]) -> Result<Vec<PlayerRecord>>;

    /// Save all records or none of them
    async fn save_players(&self, records: &[PlayerRecord]) -> Result<()>;

    /// Register a new player, replacing any record with the same id
    async fn insert_player(&self, record: PlayerRecord) -> Result<()>;
}

/// Read-only map catalogue
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MapRepository: Send + Sync {
    async fn all_maps(&self) -> Result<Vec<Map>>;
}
