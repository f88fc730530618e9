//! Glicko-2 rating engine backed by the skillratings crate

use crate::config::RatingConfig;
use crate::error::{Result, ServiceError};
use crate::rating::engine::{RatingEngine, RatingPeriod};
use crate::types::RatingSnapshot;
use skillratings::glicko2::{glicko2_rating_period, Glicko2Config, Glicko2Rating};
use skillratings::Outcomes;

/// Glicko-2 engine. Each participant is rated once per period against the
/// pre-period ratings of everyone it met.
#[derive(Debug, Clone)]
pub struct Glicko2Engine {
    config: Glicko2Config,
}

impl Glicko2Engine {
    pub fn new(config: &RatingConfig) -> Result<Self> {
        if config.tau <= 0.0 {
            return Err(ServiceError::ConfigurationError {
                message: "Glicko-2 tau must be positive".to_string(),
            }
            .into());
        }
        if config.convergence_tolerance <= 0.0 {
            return Err(ServiceError::ConfigurationError {
                message: "Glicko-2 convergence tolerance must be positive".to_string(),
            }
            .into());
        }

        Ok(Self {
            config: Glicko2Config {
                tau: config.tau,
                convergence_tolerance: config.convergence_tolerance,
            },
        })
    }
}

impl Default for Glicko2Engine {
    fn default() -> Self {
        Self {
            config: Glicko2Config::new(),
        }
    }
}

impl RatingEngine for Glicko2Engine {
    fn rate_period(&self, period: &RatingPeriod) -> Result<Vec<RatingSnapshot>> {
        period.validate()?;

        let before: Vec<Glicko2Rating> = period
            .participants
            .iter()
            .map(|snapshot| (*snapshot).into())
            .collect();

        let mut games: Vec<Vec<(Glicko2Rating, Outcomes)>> = vec![Vec::new(); before.len()];
        for result in &period.results {
            games[result.winner].push((before[result.loser], Outcomes::WIN));
            games[result.loser].push((before[result.winner], Outcomes::LOSS));
        }

        let updated = before
            .iter()
            .zip(games.iter())
            .map(|(player, results)| {
                let rated = glicko2_rating_period(player, results, &self.config);
                if rated.rating.is_finite()
                    && rated.deviation.is_finite()
                    && rated.volatility.is_finite()
                {
                    Ok(RatingSnapshot::from(rated))
                } else {
                    Err(ServiceError::InternalError {
                        message: format!("Glicko-2 produced a non-finite rating: {:?}", rated),
                    }
                    .into())
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(updated)
    }

    fn name(&self) -> &'static str {
        "glicko2"
    }
}
