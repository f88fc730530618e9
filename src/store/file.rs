//! JSON document repository
//!
//! The whole store is one JSON document, `{ "players": [...], "maps": [...] }`.
//! Every write replaces the document through a temporary sibling file and a
//! rename, so a crash mid-write leaves either the old or the new document on
//! disk, never a mix. The write and the in-memory swap run on their own task,
//! so a caller that stops waiting (a timeout) can't leave the file ahead of
//! memory.

use crate::error::{Result, ServiceError};
use crate::store::{MapRepository, PlayerRepository};
use crate::types::{Map, PlayerId, PlayerRecord};
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    players: Vec<PlayerRecord>,
    #[serde(default)]
    maps: Vec<Map>,
}

#[derive(Debug, Clone, Default)]
struct State {
    players: BTreeMap<PlayerId, PlayerRecord>,
    maps: Vec<Map>,
}

impl State {
    fn to_document(&self) -> Document {
        Document {
            players: self.players.values().cloned().collect(),
            maps: self.maps.clone(),
        }
    }
}

/// Repository persisted as a single JSON file
#[derive(Debug)]
pub struct JsonFileRepository {
    path: PathBuf,
    state: Arc<RwLock<State>>,
}

impl JsonFileRepository {
    /// Open the store at `path`. A missing file is an empty store; it is
    /// created on the first write.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let document = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Document>(&bytes)
                .with_context(|| format!("Failed to parse data file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Data file {} not found, starting empty", path.display());
                Document::default()
            }
            Err(e) => {
                return Err(ServiceError::StorageError {
                    message: format!("Failed to read data file {}: {}", path.display(), e),
                }
                .into())
            }
        };

        info!(
            "Loaded {} players and {} maps from {}",
            document.players.len(),
            document.maps.len(),
            path.display()
        );

        let state = State {
            players: document.players.into_iter().map(|p| (p.id, p)).collect(),
            maps: document.maps,
        };

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(state)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the map catalogue and persist it
    pub async fn set_maps(&self, maps: Vec<Map>) -> Result<()> {
        self.commit(move |state| state.maps = maps).await
    }

    /// Apply `update` to a copy of the state, persist it, then swap it in.
    async fn commit<F>(&self, update: F) -> Result<()>
    where
        F: FnOnce(&mut State),
    {
        let mut state = self.state.clone().write_owned().await;
        let mut next = state.clone();
        update(&mut next);

        let path = self.path.clone();
        let task = tokio::spawn(async move {
            write_document(&path, &next.to_document()).await?;
            *state = next;
            Ok::<(), anyhow::Error>(())
        });
        task.await.map_err(|e| ServiceError::StorageError {
            message: format!("Write task for {} failed: {}", self.path.display(), e),
        })?
    }
}

async fn write_document(path: &Path, document: &Document) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(document)?;
    let tmp = path.with_extension("json.tmp");

    tokio::fs::write(&tmp, &bytes)
        .await
        .map_err(|e| ServiceError::StorageError {
            message: format!("Failed to write {}: {}", tmp.display(), e),
        })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| ServiceError::StorageError {
            message: format!(
                "Failed to replace {} with {}: {}",
                path.display(),
                tmp.display(),
                e
            ),
        })?;

    debug!("Wrote data file {}", path.display());
    Ok(())
}

#[async_trait]
impl PlayerRepository for JsonFileRepository {
    async fn find_player(&self, id: PlayerId) -> Result<Option<PlayerRecord>> {
        Ok(self.state.read().await.players.get(&id).cloned())
    }

    async fn find_players(&self, ids: &[PlayerId]) -> Result<Vec<PlayerRecord>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.players.get(id).cloned())
            .collect())
    }

    async fn save_players(&self, records: &[PlayerRecord]) -> Result<()> {
        self.commit(|state| {
            for record in records {
                state.players.insert(record.id, record.clone());
            }
        })
        .await
    }

    async fn insert_player(&self, record: PlayerRecord) -> Result<()> {
        self.commit(move |state| {
            state.players.insert(record.id, record);
        })
        .await
    }
}

#[async_trait]
impl MapRepository for JsonFileRepository {
    async fn all_maps(&self) -> Result<Vec<Map>> {
        Ok(self.state.read().await.maps.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RatingSnapshot;
    use std::time::Duration;

    fn create_test_player(id: PlayerId) -> PlayerRecord {
        PlayerRecord::new(id, format!("player{}", id), RatingSnapshot::default())
    }

    #[tokio::test]
    async fn test_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFileRepository::open(dir.path().join("pickup.json"))
            .await
            .unwrap();

        assert!(repo.find_player(1).await.unwrap().is_none());
        assert!(repo.all_maps().await.unwrap().is_empty());
        assert!(!repo.path().exists());
    }

    #[tokio::test]
    async fn test_writes_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pickup.json");

        {
            let repo = JsonFileRepository::open(&path).await.unwrap();
            repo.insert_player(create_test_player(1)).await.unwrap();
            repo.insert_player(create_test_player(2)).await.unwrap();
            repo.set_maps(vec![Map {
                id: 1,
                name: "Cache".to_string(),
            }])
            .await
            .unwrap();

            let mut records = repo.find_players(&[1, 2]).await.unwrap();
            records[0].wins = 3;
            records[1].losses = 3;
            repo.save_players(&records).await.unwrap();
        }

        let reopened = JsonFileRepository::open(&path).await.unwrap();
        assert_eq!(reopened.find_player(1).await.unwrap().unwrap().wins, 3);
        assert_eq!(reopened.find_player(2).await.unwrap().unwrap().losses, 3);
        assert_eq!(reopened.all_maps().await.unwrap()[0].name, "Cache");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("pickup.json");
        let repo = JsonFileRepository::open(&path).await.unwrap();

        let result = repo.insert_player(create_test_player(9)).await;
        assert!(result.is_err());
        assert!(repo.find_player(9).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pickup.json");
        std::fs::write(&path, b"{ not json").unwrap();

        assert!(JsonFileRepository::open(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_abandoned_save_still_lands_in_memory_and_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pickup.json");
        let repo = JsonFileRepository::open(&path).await.unwrap();
        repo.insert_player(create_test_player(1)).await.unwrap();

        let mut record = repo.find_player(1).await.unwrap().unwrap();
        record.wins = 5;
        // the caller gives up right away; the write carries on without it
        let _ = tokio::time::timeout(
            Duration::ZERO,
            repo.save_players(std::slice::from_ref(&record)),
        )
        .await;

        // reads queue behind the write lock until the swap is done
        assert_eq!(repo.find_player(1).await.unwrap().unwrap().wins, 5);
        let reopened = JsonFileRepository::open(&path).await.unwrap();
        assert_eq!(reopened.find_player(1).await.unwrap().unwrap().wins, 5);
    }
}
