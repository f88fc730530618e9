//! Rating system integration using Glicko-2
//!
//! This module provides the pluggable rating engine interface, the default
//! Glicko-2 engine from the skillratings crate, and the coordinator that
//! applies a match result to every participant.

pub mod coordinator;
pub mod engine;
pub mod glicko2;

// Re-export commonly used types
pub use coordinator::{composite_rating, CommittedRatings, RatingUpdateCoordinator};
pub use engine::{MockRatingEngine, PairwiseResult, RatingEngine, RatingPeriod};
pub use glicko2::Glicko2Engine;
