//! In-memory repository used by tests and for running without a data file

use crate::error::{Result, ServiceError};
use crate::store::{MapRepository, PlayerRepository};
use crate::types::{Map, PlayerId, PlayerRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Players and maps held in process memory
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    players: RwLock<HashMap<PlayerId, PlayerRecord>>,
    maps: RwLock<Vec<Map>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository seeded with players and maps
    pub fn with_data(players: Vec<PlayerRecord>, maps: Vec<Map>) -> Self {
        Self {
            players: RwLock::new(players.into_iter().map(|p| (p.id, p)).collect()),
            maps: RwLock::new(maps),
        }
    }

    /// Replace the map catalogue
    pub fn set_maps(&self, maps: Vec<Map>) -> Result<()> {
        let mut current = self.maps.write().map_err(|_| ServiceError::InternalError {
            message: "Failed to acquire maps write lock".to_string(),
        })?;
        *current = maps;
        Ok(())
    }

    /// Number of registered players
    pub fn player_count(&self) -> Result<usize> {
        let players = self.players.read().map_err(|_| ServiceError::InternalError {
            message: "Failed to acquire players read lock".to_string(),
        })?;
        Ok(players.len())
    }
}

#[async_trait]
impl PlayerRepository for InMemoryRepository {
    async fn find_player(&self, id: PlayerId) -> Result<Option<PlayerRecord>> {
        let players = self.players.read().map_err(|_| ServiceError::InternalError {
            message: "Failed to acquire players read lock".to_string(),
        })?;
        Ok(players.get(&id).cloned())
    }

    async fn find_players(&self, ids: &[PlayerId]) -> Result<Vec<PlayerRecord>> {
        let players = self.players.read().map_err(|_| ServiceError::InternalError {
            message: "Failed to acquire players read lock".to_string(),
        })?;
        Ok(ids.iter().filter_map(|id| players.get(id).cloned()).collect())
    }

    async fn save_players(&self, records: &[PlayerRecord]) -> Result<()> {
        // A single write guard covers the whole batch
        let mut players = self.players.write().map_err(|_| ServiceError::InternalError {
            message: "Failed to acquire players write lock".to_string(),
        })?;
        for record in records {
            players.insert(record.id, record.clone());
        }
        Ok(())
    }

    async fn insert_player(&self, record: PlayerRecord) -> Result<()> {
        let mut players = self.players.write().map_err(|_| ServiceError::InternalError {
            message: "Failed to acquire players write lock".to_string(),
        })?;
        players.insert(record.id, record);
        Ok(())
    }
}

#[async_trait]
impl MapRepository for InMemoryRepository {
    async fn all_maps(&self) -> Result<Vec<Map>> {
        let maps = self.maps.read().map_err(|_| ServiceError::InternalError {
            message: "Failed to acquire maps read lock".to_string(),
        })?;
        Ok(maps.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RatingSnapshot;

    fn create_test_player(id: PlayerId) -> PlayerRecord {
        PlayerRecord::new(id, format!("player{}", id), RatingSnapshot::default())
    }

    #[tokio::test]
    async fn test_find_and_save_players() {
        let repo = InMemoryRepository::with_data(
            vec![create_test_player(1), create_test_player(2)],
            vec![],
        );

        assert!(repo.find_player(1).await.unwrap().is_some());
        assert!(repo.find_player(3).await.unwrap().is_none());

        let mut updated = repo.find_players(&[1, 2, 3]).await.unwrap();
        assert_eq!(updated.len(), 2);
        for record in &mut updated {
            record.wins += 1;
        }
        repo.save_players(&updated).await.unwrap();

        assert_eq!(repo.find_player(2).await.unwrap().unwrap().wins, 1);
        assert_eq!(repo.player_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_maps() {
        let repo = InMemoryRepository::new();
        assert!(repo.all_maps().await.unwrap().is_empty());

        repo.set_maps(vec![Map {
            id: 1,
            name: "Dust".to_string(),
        }])
        .unwrap();
        assert_eq!(repo.all_maps().await.unwrap().len(), 1);
    }
}
