//! Service layer for the pickup-room lobby service
//!
//! This module contains the main application state, service coordination,
//! health checks and background task management.

pub mod app;
pub mod health;

pub use app::{build_registry, dry_run, AppState, DryRunReport, Storage};
pub use health::{HealthCheck, HealthStatus, ServiceProbe};
