//! Health check logic and monitoring
//!
//! This module provides health check functionality for the pickup-room
//! service, including readiness and liveness probes.

use crate::amqp::AmqpConnection;
use crate::lobby::{LobbyRegistry, LobbyRegistryStats};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::error;

/// Health check status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value (0=unhealthy, 1=degraded, 2=healthy)
    pub fn as_gauge(self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    /// The worse of two statuses
    fn worst(self, other: HealthStatus) -> HealthStatus {
        if other.as_gauge() < self.as_gauge() {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Everything a health check needs to look at
#[derive(Clone)]
pub struct ServiceProbe {
    pub service_name: String,
    pub registry: Arc<LobbyRegistry>,
    pub amqp: Option<Arc<AmqpConnection>>,
    running: Arc<RwLock<bool>>,
    started_at: Instant,
}

impl ServiceProbe {
    pub fn new(
        service_name: impl Into<String>,
        registry: Arc<LobbyRegistry>,
        amqp: Option<Arc<AmqpConnection>>,
        running: Arc<RwLock<bool>>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            registry,
            amqp,
            running,
            started_at: Instant::now(),
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    /// Service name
    pub service: String,
    pub version: String,
    /// Current timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    /// Service statistics
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    /// Component name
    pub name: String,
    /// Component status
    pub status: HealthStatus,
    /// Optional error message if unhealthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    pub active_lobbies: usize,
    pub queued_players: usize,
    pub lobbies_created: u64,
    pub lobbies_completed: u64,
    pub matches_forced: u64,
    pub report_conflicts: u64,
    pub uptime_seconds: u64,
}

impl ServiceStats {
    fn from_registry(stats: LobbyRegistryStats, uptime_seconds: u64) -> Self {
        Self {
            active_lobbies: stats.active_lobbies,
            queued_players: stats.queued_players,
            lobbies_created: stats.lobbies_created,
            lobbies_completed: stats.lobbies_completed,
            matches_forced: stats.matches_forced,
            report_conflicts: stats.report_conflicts,
            uptime_seconds,
        }
    }
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(probe: &ServiceProbe) -> Result<Self> {
        let checks = vec![
            Self::check_service_running(probe).await,
            Self::check_registry(probe),
            Self::check_amqp_health(probe),
        ];
        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |status, check| status.worst(check.status));

        let stats = match probe.registry.stats() {
            Ok(stats) => ServiceStats::from_registry(stats, probe.uptime_seconds()),
            Err(_) => ServiceStats {
                uptime_seconds: probe.uptime_seconds(),
                ..ServiceStats::default()
            },
        };

        Ok(HealthCheck {
            status,
            service: probe.service_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(probe: &ServiceProbe) -> HealthStatus {
        if probe.is_running().await {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }

    /// Readiness check - verify service can handle commands
    pub async fn readiness_check(probe: &ServiceProbe) -> HealthStatus {
        if !probe.is_running().await {
            return HealthStatus::Unhealthy;
        }

        Self::check_registry(probe)
            .status
            .worst(Self::check_amqp_health(probe).status)
    }

    async fn check_service_running(probe: &ServiceProbe) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = if probe.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// The registry is unusable once its lock is poisoned
    fn check_registry(probe: &ServiceProbe) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = match probe.registry.stats() {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Lobby registry check failed: {}", e);
                (HealthStatus::Unhealthy, Some(e.to_string()))
            }
        };

        ComponentCheck {
            name: "lobby_registry".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_amqp_health(probe: &ServiceProbe) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = match &probe.amqp {
            Some(connection) if connection.is_alive() => (HealthStatus::Healthy, None),
            Some(_) => (
                HealthStatus::Unhealthy,
                Some("AMQP connection is closed".to_string()),
            ),
            None => (
                HealthStatus::Degraded,
                Some("No AMQP connection; commands are not being consumed".to_string()),
            ),
        };

        ComponentCheck {
            name: "amqp_connection".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
