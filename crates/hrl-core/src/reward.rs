//! Reward signals

use serde::{Deserialize, Serialize};

/// Reward signal from the environment or a termination detector
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Reward(pub f64);

impl Reward {
    /// Get the reward value
    #[must_use]
    pub fn value(&self) -> f64 {
        self.0
    }
}
