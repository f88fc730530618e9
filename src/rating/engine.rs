//! Rating engine trait and a deterministic stub
//!
//! An engine consumes one rating period: a list of participant tuples plus the
//! pairwise results between them, and returns one updated tuple per
//! participant, in the same order.

use crate::error::{Result, ServiceError};
use crate::types::RatingSnapshot;
use serde::{Deserialize, Serialize};

/// A single decided game between two participants of a period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairwiseResult {
    /// Index of the winning participant
    pub winner: usize,
    /// Index of the losing participant
    pub loser: usize,
}

/// All results to be rated together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingPeriod {
    pub participants: Vec<RatingSnapshot>,
    pub results: Vec<PairwiseResult>,
}

impl RatingPeriod {
    /// Add a participant and return its index
    pub fn add_participant(&mut self, rating: RatingSnapshot) -> usize {
        self.participants.push(rating);
        self.participants.len() - 1
    }

    pub fn add_result(&mut self, winner: usize, loser: usize) {
        self.results.push(PairwiseResult { winner, loser });
    }

    /// Check that every result refers to two distinct known participants
    pub fn validate(&self) -> Result<()> {
        if self.participants.is_empty() {
            return Err(ServiceError::InternalError {
                message: "Rating period has no participants".to_string(),
            }
            .into());
        }

        for result in &self.results {
            let count = self.participants.len();
            if result.winner >= count || result.loser >= count {
                return Err(ServiceError::InternalError {
                    message: format!(
                        "Result {:?} refers to a participant outside 0..{}",
                        result, count
                    ),
                }
                .into());
            }
            if result.winner == result.loser {
                return Err(ServiceError::InternalError {
                    message: format!("Participant {} cannot play itself", result.winner),
                }
                .into());
            }
        }

        Ok(())
    }
}

/// Computes updated ratings for a batch of pairwise results
pub trait RatingEngine: Send + Sync {
    /// Rate a whole period at once. The returned vector is index-aligned with
    /// `period.participants`.
    fn rate_period(&self, period: &RatingPeriod) -> Result<Vec<RatingSnapshot>>;

    /// Engine name for logs
    fn name(&self) -> &'static str;
}

/// Deterministic engine for tests: every win adds `step` to the rating and
/// every loss subtracts it. Deviation and volatility pass through unchanged.
#[derive(Debug, Default)]
pub struct MockRatingEngine {
    step: f64,
    periods: std::sync::Mutex<Vec<RatingPeriod>>,
    fail_with: std::sync::Mutex<Option<String>>,
}

impl MockRatingEngine {
    pub fn new(step: f64) -> Self {
        Self {
            step,
            ..Default::default()
        }
    }

    /// Make every following call fail with `message`
    pub fn fail_with(&self, message: impl Into<String>) {
        if let Ok(mut fail) = self.fail_with.lock() {
            *fail = Some(message.into());
        }
    }

    /// Get all periods rated so far (for testing)
    pub fn get_periods(&self) -> Vec<RatingPeriod> {
        self.periods
            .lock()
            .map(|periods| periods.clone())
            .unwrap_or_default()
    }
}

impl RatingEngine for MockRatingEngine {
    fn rate_period(&self, period: &RatingPeriod) -> Result<Vec<RatingSnapshot>> {
        if let Ok(mut periods) = self.periods.lock() {
            periods.push(period.clone());
        }
        if let Ok(fail) = self.fail_with.lock() {
            if let Some(message) = fail.as_ref() {
                return Err(anyhow::anyhow!(message.clone()));
            }
        }

        period.validate()?;

        let mut updated = period.participants.clone();
        for result in &period.results {
            updated[result.winner].rating += self.step;
            updated[result.loser].rating -= self.step;
        }
        Ok(updated)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
