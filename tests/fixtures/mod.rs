//! Test fixtures and repository doubles for integration testing

#![allow(dead_code)]

use async_trait::async_trait;
use pickup_room::amqp::MockEventPublisher;
use pickup_room::config::{LobbyConfig, RatingConfig};
use pickup_room::error::{Result, ServiceError};
use pickup_room::rating::{Glicko2Engine, RatingEngine, RatingUpdateCoordinator};
use pickup_room::store::InMemoryRepository;
use pickup_room::types::{Map, PlayerId, PlayerRecord, RatingSnapshot};
use pickup_room::{LobbyRegistry, MapRepository, PlayerRepository};
use rand::rngs::mock::StepRng;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Create a registered player with a given rating and game count
pub fn create_player(id: PlayerId, rating: f64, games: u32) -> PlayerRecord {
    let mut player = PlayerRecord::new(id, format!("player{}", id), RatingSnapshot::default());
    player.skill_rating = rating;
    player.previous_skill_rating = rating;
    player.wins = games / 2;
    player.losses = games - games / 2;
    player
}

/// `count` fresh players with ids starting at 1
pub fn fresh_players(count: u64) -> Vec<PlayerRecord> {
    (1..=count)
        .map(|id| PlayerRecord::new(id, format!("player{}", id), RatingSnapshot::default()))
        .collect()
}

pub fn test_maps() -> Vec<Map> {
    vec![
        Map {
            id: 1,
            name: "Quarry".to_string(),
        },
        Map {
            id: 2,
            name: "Harbor".to_string(),
        },
    ]
}

/// Repository wrapper that can refuse or stall writes and map lookups
#[derive(Default)]
pub struct FailingRepository {
    inner: InMemoryRepository,
    fail_saves: AtomicBool,
    fail_maps: AtomicBool,
    save_delay_ms: AtomicU64,
    lookup_delay_ms: AtomicU64,
}

impl FailingRepository {
    pub fn new(players: Vec<PlayerRecord>, maps: Vec<Map>) -> Self {
        Self {
            inner: InMemoryRepository::with_data(players, maps),
            ..Default::default()
        }
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn fail_maps(&self, fail: bool) {
        self.fail_maps.store(fail, Ordering::SeqCst);
    }

    /// Delay every save by `delay`
    pub fn slow_saves(&self, delay: Duration) {
        self.save_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Hold every player lookup for `delay` after the record was read
    pub fn slow_lookups(&self, delay: Duration) {
        self.lookup_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &InMemoryRepository {
        &self.inner
    }
}

#[async_trait]
impl PlayerRepository for FailingRepository {
    async fn find_player(&self, id: PlayerId) -> Result<Option<PlayerRecord>> {
        let record = self.inner.find_player(id).await?;
        let delay = self.lookup_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(record)
    }

    async fn find_players(&self, ids: &[PlayerId]) -> Result<Vec<PlayerRecord>> {
        self.inner.find_players(ids).await
    }

    async fn save_players(&self, records: &[PlayerRecord]) -> Result<()> {
        let delay = self.save_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(ServiceError::StorageError {
                message: "disk full".to_string(),
            }
            .into());
        }
        self.inner.save_players(records).await
    }

    async fn insert_player(&self, record: PlayerRecord) -> Result<()> {
        self.inner.insert_player(record).await
    }
}

#[async_trait]
impl MapRepository for FailingRepository {
    async fn all_maps(&self) -> Result<Vec<Map>> {
        if self.fail_maps.load(Ordering::SeqCst) {
            return Err(ServiceError::StorageError {
                message: "map table unavailable".to_string(),
            }
            .into());
        }
        self.inner.all_maps().await
    }
}

/// A registry wired to a controllable repository and a recording publisher
pub struct TestSystem {
    pub registry: Arc<LobbyRegistry>,
    pub repo: Arc<FailingRepository>,
    pub publisher: Arc<MockEventPublisher>,
}

impl TestSystem {
    pub fn count_events(&self, name: &str) -> usize {
        self.publisher
            .get_published_events()
            .iter()
            .filter(|event| event.as_str() == name)
            .count()
    }

    pub async fn stored(&self, id: PlayerId) -> PlayerRecord {
        self.repo
            .find_player(id)
            .await
            .expect("lookup failed")
            .expect("player missing")
    }
}

/// Builder for a [`TestSystem`]
pub struct TestSystemBuilder {
    players: Vec<PlayerRecord>,
    maps: Vec<Map>,
    config: LobbyConfig,
    engine: Option<Arc<dyn RatingEngine>>,
    seed: Option<u64>,
}

impl TestSystemBuilder {
    pub fn new(players_per_team: usize) -> Self {
        Self {
            players: fresh_players(40),
            maps: test_maps(),
            config: LobbyConfig {
                players_per_team,
                persistence_timeout_ms: 200,
                ..LobbyConfig::default()
            },
            engine: None,
            seed: None,
        }
    }

    pub fn players(mut self, players: Vec<PlayerRecord>) -> Self {
        self.players = players;
        self
    }

    pub fn maps(mut self, maps: Vec<Map>) -> Self {
        self.maps = maps;
        self
    }

    pub fn engine(mut self, engine: Arc<dyn RatingEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Use a seeded random source instead of the always-zero one
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> TestSystem {
        let repo = Arc::new(FailingRepository::new(self.players, self.maps));
        let publisher = Arc::new(MockEventPublisher::new());
        let engine = self.engine.unwrap_or_else(|| {
            Arc::new(Glicko2Engine::new(&RatingConfig::default()).expect("valid rating config"))
        });
        let coordinator =
            RatingUpdateCoordinator::new(engine, repo.clone(), self.config.persistence_timeout());
        let rng: Box<dyn rand::RngCore + Send> = match self.seed {
            Some(seed) => Box::new(StdRng::seed_from_u64(seed)),
            None => Box::new(StepRng::new(0, 0)),
        };

        let registry = Arc::new(LobbyRegistry::new(
            self.config,
            repo.clone(),
            repo.clone(),
            coordinator,
            publisher.clone(),
            rng,
        ));

        TestSystem {
            registry,
            repo,
            publisher,
        }
    }
}
