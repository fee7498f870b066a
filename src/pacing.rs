// Pacing Module
// Think time between the iterations of a virtual user.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Normally distributed pause after each iteration
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingProfile {
    /// Mean pause in milliseconds
    pub mean_ms: u64,
    /// Standard deviation of the pause
    pub stddev_ms: u64,
}

impl PacingProfile {
    pub fn new(mean_ms: u64, stddev_ms: u64) -> Self {
        Self { mean_ms, stddev_ms }
    }

    /// No pause, iterations run back to back
    pub fn none() -> Self {
        Self::default()
    }

    /// Fixed pause without jitter
    pub fn fixed(mean_ms: u64) -> Self {
        Self::new(mean_ms, 0)
    }

    pub fn is_none(&self) -> bool {
        self.mean_ms == 0
    }

    /// Sample one pause
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.mean_ms == 0 {
            return Duration::ZERO;
        }

        let sample = if self.stddev_ms > 0 {
            match Normal::new(self.mean_ms as f64, self.stddev_ms as f64) {
                // Never drop below 1ms when a pause is configured
                Ok(normal) => normal.sample(rng).max(1.0) as u64,
                Err(_) => self.mean_ms,
            }
        } else {
            self.mean_ms
        };

        Duration::from_millis(sample)
    }
}
