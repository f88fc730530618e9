//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the pickup-room lobby service
//! using Prometheus metrics.

use crate::lobby::registry::LobbyRegistryStats;
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the lobby service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Lobby lifecycle metrics
    lobby_metrics: LobbyMetrics,

    /// Inbound command metrics
    command_metrics: CommandMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Total AMQP messages processed
    pub amqp_messages_total: IntCounterVec,

    /// AMQP message processing errors
    pub amqp_errors_total: IntCounterVec,

    /// Outbound lobby events by event name and status
    pub events_published_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Lobby lifecycle metrics
#[derive(Clone)]
pub struct LobbyMetrics {
    /// Number of lobbies currently in the registry
    pub active_lobbies: IntGauge,

    /// Players waiting in queuing lobbies
    pub players_queued: IntGauge,

    /// Total lobbies created
    pub lobbies_created_total: IntCounter,

    /// Total lobbies completed, by resolution (agreed or forced)
    pub lobbies_completed_total: IntCounterVec,

    /// Total draft picks
    pub picks_total: IntCounter,

    /// Captain reports by verdict (pending, agreed, conflict)
    pub reports_total: IntCounterVec,

    /// Rating commits that failed to persist
    pub persistence_failures_total: IntCounter,
}

/// Inbound command metrics
#[derive(Clone)]
pub struct CommandMetrics {
    /// Commands handled, by command and status
    pub commands_total: IntCounterVec,

    /// Command handling time
    pub command_duration: HistogramVec,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Rating computation plus persistence time
    pub rating_commit_duration: Histogram,

    /// AMQP operation durations
    pub amqp_operation_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let lobby_metrics = LobbyMetrics::new(&registry)?;
        let command_metrics = CommandMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            lobby_metrics,
            command_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Get service metrics
    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    /// Get lobby metrics
    pub fn lobby(&self) -> &LobbyMetrics {
        &self.lobby_metrics
    }

    /// Get command metrics
    pub fn command(&self) -> &CommandMetrics {
        &self.command_metrics
    }

    /// Get performance metrics
    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Refresh gauges from a registry stats snapshot
    pub fn update_from_registry_stats(&self, stats: &LobbyRegistryStats) {
        self.lobby_metrics
            .active_lobbies
            .set(stats.active_lobbies as i64);
        self.lobby_metrics
            .players_queued
            .set(stats.queued_players as i64);
    }

    /// Record a lobby being created
    pub fn record_lobby_created(&self) {
        self.lobby_metrics.lobbies_created_total.inc();
        self.lobby_metrics.active_lobbies.inc();
    }

    /// Record a lobby being completed and removed from the registry
    pub fn record_lobby_completed(&self, forced: bool) {
        let resolution = if forced { "forced" } else { "agreed" };
        self.lobby_metrics
            .lobbies_completed_total
            .with_label_values(&[resolution])
            .inc();
        self.lobby_metrics.active_lobbies.dec();
    }

    /// Record an empty queuing lobby being dropped
    pub fn record_lobby_dropped(&self) {
        self.lobby_metrics.active_lobbies.dec();
    }

    pub fn record_player_queued(&self) {
        self.lobby_metrics.players_queued.inc();
    }

    /// Record players leaving the queue, either by leaving or by the queue popping
    pub fn record_players_dequeued(&self, count: usize) {
        self.lobby_metrics.players_queued.sub(count as i64);
    }

    pub fn record_pick(&self) {
        self.lobby_metrics.picks_total.inc();
    }

    /// Record a captain report by verdict
    pub fn record_report(&self, verdict: &str) {
        self.lobby_metrics
            .reports_total
            .with_label_values(&[verdict])
            .inc();
    }

    pub fn record_persistence_failure(&self) {
        self.lobby_metrics.persistence_failures_total.inc();
    }

    /// Record rating commit duration
    pub fn record_rating_commit(&self, duration: Duration) {
        self.performance_metrics
            .rating_commit_duration
            .observe(duration.as_secs_f64());
    }

    /// Record an inbound command and its outcome
    pub fn record_command(&self, command: &str, status: &str, duration: Duration) {
        self.command_metrics
            .commands_total
            .with_label_values(&[command, status])
            .inc();
        self.command_metrics
            .command_duration
            .with_label_values(&[command])
            .observe(duration.as_secs_f64());
    }

    /// Record an outbound event publication
    pub fn record_event_published(&self, event: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        self.service_metrics
            .events_published_total
            .with_label_values(&[event, status])
            .inc();
    }

    /// Record AMQP operation
    pub fn record_amqp_operation(&self, operation: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .amqp_messages_total
            .with_label_values(&[operation, status])
            .inc();

        if !success {
            self.service_metrics
                .amqp_errors_total
                .with_label_values(&[operation])
                .inc();
        }

        self.performance_metrics
            .amqp_operation_duration
            .with_label_values(&[operation, status])
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("pickup_room_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let amqp_messages_total = IntCounterVec::new(
            Opts::new(
                "pickup_room_amqp_messages_total",
                "Total AMQP messages processed",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_messages_total.clone()))?;

        let amqp_errors_total = IntCounterVec::new(
            Opts::new("pickup_room_amqp_errors_total", "Total AMQP errors"),
            &["operation"],
        )?;
        registry.register(Box::new(amqp_errors_total.clone()))?;

        let events_published_total = IntCounterVec::new(
            Opts::new(
                "pickup_room_events_published_total",
                "Outbound lobby events",
            ),
            &["event", "status"],
        )?;
        registry.register(Box::new(events_published_total.clone()))?;

        let health_status = IntGauge::new(
            "pickup_room_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("pickup_room_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            amqp_messages_total,
            amqp_errors_total,
            events_published_total,
            health_status,
            component_health,
        })
    }
}

impl LobbyMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let active_lobbies =
            IntGauge::new("pickup_room_active_lobbies", "Number of active lobbies")?;
        registry.register(Box::new(active_lobbies.clone()))?;

        let players_queued = IntGauge::new(
            "pickup_room_players_queued",
            "Players waiting in queuing lobbies",
        )?;
        registry.register(Box::new(players_queued.clone()))?;

        let lobbies_created_total =
            IntCounter::new("pickup_room_lobbies_created_total", "Total lobbies created")?;
        registry.register(Box::new(lobbies_created_total.clone()))?;

        let lobbies_completed_total = IntCounterVec::new(
            Opts::new(
                "pickup_room_lobbies_completed_total",
                "Total lobbies completed",
            ),
            &["resolution"],
        )?;
        registry.register(Box::new(lobbies_completed_total.clone()))?;

        let picks_total = IntCounter::new("pickup_room_picks_total", "Total draft picks")?;
        registry.register(Box::new(picks_total.clone()))?;

        let reports_total = IntCounterVec::new(
            Opts::new("pickup_room_reports_total", "Captain reports by verdict"),
            &["verdict"],
        )?;
        registry.register(Box::new(reports_total.clone()))?;

        let persistence_failures_total = IntCounter::new(
            "pickup_room_persistence_failures_total",
            "Rating commits that failed to persist",
        )?;
        registry.register(Box::new(persistence_failures_total.clone()))?;

        Ok(Self {
            active_lobbies,
            players_queued,
            lobbies_created_total,
            lobbies_completed_total,
            picks_total,
            reports_total,
            persistence_failures_total,
        })
    }
}

impl CommandMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let commands_total = IntCounterVec::new(
            Opts::new("pickup_room_commands_total", "Lobby commands handled"),
            &["command", "status"],
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        let command_duration = HistogramVec::new(
            HistogramOpts::new(
                "pickup_room_command_duration_seconds",
                "Lobby command handling time",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["command"],
        )?;
        registry.register(Box::new(command_duration.clone()))?;

        Ok(Self {
            commands_total,
            command_duration,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let rating_commit_duration = Histogram::with_opts(
            HistogramOpts::new(
                "pickup_room_rating_commit_duration_seconds",
                "Rating computation and persistence time",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 10.0]),
        )?;
        registry.register(Box::new(rating_commit_duration.clone()))?;

        let amqp_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "pickup_room_amqp_operation_duration_seconds",
                "AMQP operation duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_operation_duration.clone()))?;

        Ok(Self {
            rating_commit_duration,
            amqp_operation_duration,
        })
    }
}
