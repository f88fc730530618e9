//! Pickup Room - captain-draft pickup lobbies
//!
//! This crate runs pickup game lobbies: players queue, two captains draft
//! the rest in turns, both captains report the result and player ratings are
//! updated with Glicko-2. Commands arrive and events leave over AMQP.

pub mod amqp;
pub mod config;
pub mod error;
pub mod lobby;
pub mod metrics;
pub mod rating;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{LobbyError, LobbyResult, Result, ServiceError};
pub use types::*;

// Re-export key components
pub use amqp::publisher::EventPublisher;
pub use lobby::{LobbyInstance, LobbyRegistry, LobbyState};
pub use store::{MapRepository, PlayerRepository};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
