//! Rating system configuration

use serde::{Deserialize, Serialize};

use crate::types::RatingSnapshot;

/// Glicko-2 parameters and new-player defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingConfig {
    pub default_rating: f64,
    pub default_deviation: f64,
    pub default_volatility: f64,
    /// System constant constraining volatility change over time
    pub tau: f64,
    pub convergence_tolerance: f64,
}

impl RatingConfig {
    /// Rating tuple assigned to a newly registered player
    pub fn initial_rating(&self) -> RatingSnapshot {
        RatingSnapshot {
            rating: self.default_rating,
            deviation: self.default_deviation,
            volatility: self.default_volatility,
        }
    }
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            default_rating: 1500.0,
            default_deviation: 350.0,
            default_volatility: 0.06,
            tau: 0.5,
            convergence_tolerance: 0.000_001,
        }
    }
}
