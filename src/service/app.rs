//! Main application state and service coordination
//!
//! This module contains the production AppState that wires storage, rating,
//! the lobby registry, AMQP and the health server together, and owns the
//! background tasks.

use crate::amqp::{
    AmqpConfig, AmqpConnection, AmqpEventPublisher, CommandConsumer, EventPublisher,
    NoOpEventPublisher, PublisherConfig, RegistryCommandHandler,
};
use crate::config::{AppConfig, RatingConfig, SeedPlayer, StorageSettings};
use crate::error::ServiceError;
use crate::lobby::LobbyRegistry;
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector, MetricsService};
use crate::rating::{Glicko2Engine, RatingUpdateCoordinator};
use crate::service::health::{HealthCheck, ServiceProbe};
use crate::store::{InMemoryRepository, JsonFileRepository, MapRepository, PlayerRepository};
use crate::types::{PlayerId, PlayerRecord};
use crate::utils::build_rng;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, warn};

/// Player and map repositories backing the registry
#[derive(Clone)]
pub struct Storage {
    pub players: Arc<dyn PlayerRepository>,
    pub maps: Arc<dyn MapRepository>,
}

impl Storage {
    /// Open the JSON data file when one is configured, else an in-memory
    /// store, then register the configured seed players and maps
    pub async fn open(
        settings: &StorageSettings,
        rating: &RatingConfig,
    ) -> Result<Self, ServiceError> {
        let storage = match &settings.data_file {
            Some(path) => {
                info!("Opening data file {}", path.display());
                let repo = Arc::new(JsonFileRepository::open(path).await.map_err(|e| {
                    ServiceError::StorageError {
                        message: format!("Failed to open {}: {}", path.display(), e),
                    }
                })?);
                let empty = repo.all_maps().await.map_err(storage_error)?.is_empty();
                if empty && !settings.maps.is_empty() {
                    repo.set_maps(settings.maps.clone()).await.map_err(storage_error)?;
                }
                Self {
                    players: repo.clone(),
                    maps: repo,
                }
            }
            None => {
                warn!("No data file configured; players and maps live in memory only");
                let repo = Arc::new(InMemoryRepository::new());
                repo.set_maps(settings.maps.clone()).map_err(storage_error)?;
                Self {
                    players: repo.clone(),
                    maps: repo,
                }
            }
        };

        let added = storage.register(&settings.players, rating).await?;
        if added > 0 {
            info!("Registered {} new players from config", added);
        }
        Ok(storage)
    }

    /// Insert the listed players the store doesn't know yet with the default
    /// rating. Known players keep their record. Returns how many were added.
    pub async fn register(
        &self,
        players: &[SeedPlayer],
        rating: &RatingConfig,
    ) -> Result<usize, ServiceError> {
        let ids: Vec<PlayerId> = players.iter().map(|p| p.id).collect();
        let known: HashSet<PlayerId> = self
            .players
            .find_players(&ids)
            .await
            .map_err(storage_error)?
            .into_iter()
            .map(|p| p.id)
            .collect();

        let mut added = 0;
        for seed in players.iter().filter(|p| !known.contains(&p.id)) {
            let record = PlayerRecord::new(seed.id, seed.username.clone(), rating.initial_rating());
            self.players
                .insert_player(record)
                .await
                .map_err(storage_error)?;
            debug!("Registered player {} ({})", seed.username, seed.id);
            added += 1;
        }
        Ok(added)
    }
}

fn storage_error(e: anyhow::Error) -> ServiceError {
    ServiceError::StorageError {
        message: e.to_string(),
    }
}

/// Build the lobby registry and its rating pipeline over `storage`
pub fn build_registry(
    config: &AppConfig,
    storage: &Storage,
    publisher: Arc<dyn EventPublisher>,
) -> Result<LobbyRegistry, ServiceError> {
    let engine = Glicko2Engine::new(&config.rating).map_err(|e| ServiceError::ConfigurationError {
        message: format!("Failed to initialize rating engine: {}", e),
    })?;
    let coordinator = RatingUpdateCoordinator::new(
        Arc::new(engine),
        storage.players.clone(),
        config.lobby.persistence_timeout(),
    );

    Ok(LobbyRegistry::new(
        config.lobby.clone(),
        storage.players.clone(),
        storage.maps.clone(),
        coordinator,
        publisher,
        build_rng(config.service.rng_seed),
    ))
}

/// Summary of a dry run
#[derive(Debug, Clone, PartialEq)]
pub struct DryRunReport {
    pub lobby_size: usize,
    pub maps: usize,
}

/// Build everything except the broker connection, then stop. Catches bad
/// configuration and unreadable data files before a deploy.
pub async fn dry_run(config: &AppConfig) -> Result<DryRunReport, ServiceError> {
    let storage = Storage::open(&config.storage, &config.rating).await?;
    let registry = build_registry(config, &storage, Arc::new(NoOpEventPublisher))?;
    let maps = storage
        .maps
        .all_maps()
        .await
        .map_err(|e| ServiceError::StorageError {
            message: format!("Failed to read maps: {}", e),
        })?;
    if maps.is_empty() {
        warn!("No maps configured; full lobbies will not be able to start");
    }

    Ok(DryRunReport {
        lobby_size: registry.config().lobby_size(),
        maps: maps.len(),
    })
}

/// Main application state containing all service components
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    registry: Arc<LobbyRegistry>,

    /// AMQP connection for command consumption and event publishing
    amqp_connection: Arc<AmqpConnection>,

    /// Metrics service for monitoring and health checks
    metrics_service: Arc<MetricsService>,

    probe: ServiceProbe,

    /// Background task handles
    background_tasks: Vec<JoinHandle<()>>,

    /// AMQP consumer for lobby commands
    command_consumer: Option<CommandConsumer>,

    /// Service status
    is_running: Arc<RwLock<bool>>,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing pickup-room lobby service");

        let amqp_connection = Self::initialize_amqp(&config).await?;

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::InternalError {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let channel = amqp_connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnectionFailed {
                message: format!("Failed to open publisher channel: {}", e),
            })?;
        let publisher_config = PublisherConfig {
            exchange: config.amqp.events_exchange.clone(),
            max_retries: config.amqp.max_retry_attempts,
            retry_delay_ms: config.amqp.retry_delay_ms,
            ..PublisherConfig::default()
        };
        let publisher = AmqpEventPublisher::new(channel, publisher_config)
            .await
            .map_err(|e| ServiceError::AmqpConnectionFailed {
                message: format!("Failed to initialize event publisher: {}", e),
            })?;

        let storage = Storage::open(&config.storage, &config.rating).await?;
        let registry = Arc::new(
            build_registry(&config, &storage, Arc::new(publisher))?
                .with_metrics(metrics_collector.clone()),
        );
        info!(
            "Lobby registry ready: {} players per team",
            config.lobby.players_per_team
        );

        let is_running = Arc::new(RwLock::new(false));
        let probe = ServiceProbe::new(
            config.service.name.clone(),
            registry.clone(),
            Some(amqp_connection.clone()),
            is_running.clone(),
        );

        let health_config = HealthServerConfig {
            port: config.service.health_port,
            ..HealthServerConfig::default()
        };
        let health_server = Arc::new(
            HealthServer::new(health_config, metrics_collector.clone()).with_probe(probe.clone()),
        );
        let metrics_service = Arc::new(MetricsService::new(metrics_collector, health_server));

        Ok(Self {
            config,
            registry,
            amqp_connection,
            metrics_service,
            probe,
            background_tasks: Vec::new(),
            command_consumer: None,
            is_running,
        })
    }

    /// Start all background services and message consumption
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting pickup-room lobby service");

        *self.is_running.write().await = true;

        self.start_metrics_service().await;
        self.start_amqp_consumption().await?;
        self.start_background_tasks();

        info!("Pickup-room lobby service started");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of pickup-room service");

        *self.is_running.write().await = false;

        // Stop taking commands first so no lobby changes mid-shutdown
        if let Some(consumer) = self.command_consumer.take() {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop AMQP consumer: {}", e);
            }
        }

        self.stop_background_tasks();

        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop metrics service: {}", e);
        }

        let final_stats =
            self.registry
                .stats()
                .map_err(|e| ServiceError::InternalError {
                    message: format!("Failed to get final stats: {}", e),
                })?;
        info!("Final registry statistics: {:?}", final_stats);

        info!("Pickup-room service shutdown completed");
        Ok(())
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn registry(&self) -> Arc<LobbyRegistry> {
        self.registry.clone()
    }

    /// Probe used by health checks
    pub fn probe(&self) -> ServiceProbe {
        self.probe.clone()
    }

    /// Get metrics service
    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    /// Connect to the broker with retry
    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        let amqp_config =
            AmqpConfig::from_settings(&config.amqp).map_err(|e| ServiceError::ConfigurationError {
                message: format!("Failed to parse AMQP URL: {}", e),
            })?;
        info!(
            "Connecting to AMQP broker at {}:{}{}",
            amqp_config.host, amqp_config.port, amqp_config.vhost
        );

        let connection =
            AmqpConnection::new(amqp_config)
                .await
                .map_err(|e| ServiceError::AmqpConnectionFailed {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        Ok(Arc::new(connection))
    }

    async fn start_metrics_service(&mut self) {
        let metrics_service = self.metrics_service.clone();
        let port = self.config.service.health_port;

        let handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                tracing::error!("Health server failed: {}", e);
            }
        });
        self.background_tasks.push(handle);

        // Give the server a moment to bind
        tokio::time::sleep(Duration::from_millis(100)).await;
        info!("Health endpoints served on port {}", port);
    }

    /// Declare the command queue and start consuming from it
    async fn start_amqp_consumption(&mut self) -> Result<(), ServiceError> {
        let queue = self.config.amqp.command_queue.clone();

        let channel = self
            .amqp_connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnectionFailed {
                message: format!("Failed to open consumer channel: {}", e),
            })?;

        let queue_declare_args = amqprs::channel::QueueDeclareArguments::new(&queue)
            .durable(true)
            .auto_delete(false)
            .finish();
        channel
            .queue_declare(queue_declare_args)
            .await
            .map_err(|e| ServiceError::AmqpConnectionFailed {
                message: format!("Failed to declare queue {}: {}", queue, e),
            })?;
        debug!("Queue '{}' declared", queue);

        let metrics = self.metrics_service.collector();
        let handler = Arc::new(
            RegistryCommandHandler::new(self.registry.clone()).with_metrics(metrics.clone()),
        );
        let consumer = CommandConsumer::new(handler, channel, Some(metrics));
        consumer
            .start_consuming(&queue)
            .await
            .map_err(|e| ServiceError::AmqpConnectionFailed {
                message: format!("Failed to start consuming commands: {}", e),
            })?;

        self.command_consumer = Some(consumer);
        Ok(())
    }

    /// Periodic metrics refresh from registry state and health
    fn start_background_tasks(&mut self) {
        let probe = self.probe.clone();
        let metrics_collector = self.metrics_service.collector();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));

            while probe.is_running().await {
                interval.tick().await;

                match probe.registry.stats() {
                    Ok(stats) => {
                        debug!(
                            "Updating metrics - lobbies: {}, queued: {}",
                            stats.active_lobbies, stats.queued_players
                        );
                        metrics_collector.update_from_registry_stats(&stats);
                    }
                    Err(e) => warn!("Failed to get registry stats for metrics: {}", e),
                }

                metrics_collector
                    .service()
                    .uptime_seconds
                    .set(probe.uptime_seconds() as i64);

                match HealthCheck::check(&probe).await {
                    Ok(health) => {
                        metrics_collector.update_health_status(health.status.as_gauge());
                        for check in &health.checks {
                            metrics_collector.update_component_health(
                                &check.name,
                                check.status != crate::service::HealthStatus::Unhealthy,
                            );
                        }
                    }
                    Err(e) => warn!("Health check failed: {}", e),
                }
            }
        });

        self.background_tasks.push(task);
        info!("{} background tasks running", self.background_tasks.len());
    }

    fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        for task in self.background_tasks.drain(..) {
            task.abort();
        }
        debug!("Aborted {} background tasks", task_count);
    }
}
