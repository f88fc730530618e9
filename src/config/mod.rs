//! Configuration management for the pickup-room service
//!
//! Configuration is loaded from a TOML file or from environment variables,
//! validated, and then overridden by command line flags in `main`.

pub mod app;
pub mod lobby;
pub mod rating;

pub use app::{
    validate_config, AmqpSettings, AppConfig, SeedPlayer, ServiceSettings, StorageSettings,
};
pub use lobby::LobbyConfig;
pub use rating::RatingConfig;
