//! Configuration for the SMDP agent and its termination detector

use std::path::Path;

use hrl_core::{RLError, Result};
use serde::{Deserialize, Serialize};

/// Which TD error formulation the agent uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TdStrategyKind {
    /// Integrated reward and integrated discount (canonical)
    #[default]
    Continuous,
    /// Multiplicative decay of the current value and of the reward
    Multiplicative,
}

/// Configuration for [`crate::SmdpAgent`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmdpConfig {
    /// Learning rate of the decoder update
    pub learning_rate: f64,
    /// Discount factor used by the TD error
    pub discount: f64,
    /// Expected radius of Q values; the error is divided by it before capping
    pub q_radius: f64,
    /// Initial Q value per action (defaults to 0.2 for every action)
    pub init_qs: Option<Vec<f64>>,
    /// Standard deviation of the exploration noise
    pub noise_level: f64,
    /// How often (per time unit) the exploration noise is resampled
    pub noise_frequency: f64,
    /// Level above which save/reset/learn inputs count as active
    pub signal_threshold: f64,
    /// Intercept range for the units of a rectified state encoder
    pub state_threshold: (f64, f64),
    /// Largest per-dimension state difference for which dual training applies
    pub statediff_threshold: f64,
    /// Train the current-state values toward the saved-state values
    pub dual_training: bool,
    /// Magnitude cap of the error signal
    pub error_cap: f64,
    /// Added to the error wherever the saved-state Q value is negative
    pub positive_bias: f64,
    /// Whether the value stores learn at all
    pub learning: bool,
    /// TD error formulation
    pub td_strategy: TdStrategyKind,
    /// Simulation time step
    pub dt: f64,
    /// Seed of the agent's random number generator
    pub seed: u64,
    /// Additional parameters
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl Default for SmdpConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            discount: 0.3,
            q_radius: 1.0,
            init_qs: None,
            noise_level: 0.03,
            noise_frequency: 1.0,
            signal_threshold: 0.1,
            state_threshold: (0.0, 1.0),
            statediff_threshold: 0.2,
            dual_training: true,
            error_cap: 0.1,
            positive_bias: 0.03,
            learning: true,
            td_strategy: TdStrategyKind::Continuous,
            dt: 0.001,
            seed: 0,
            params: serde_json::Map::new(),
        }
    }
}

impl SmdpConfig {
    /// Parse from a JSON string and validate
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read from a JSON file and validate
    pub fn from_json_file(path: &Path) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    /// Initial Q values for `num_actions` actions
    pub fn init_qs_for(&self, num_actions: usize) -> Result<Vec<f64>> {
        match &self.init_qs {
            None => Ok(vec![0.2; num_actions]),
            Some(qs) if qs.len() == num_actions => Ok(qs.clone()),
            Some(qs) => Err(RLError::DimensionMismatch {
                expected: num_actions,
                actual: qs.len(),
            }),
        }
    }

    /// Check ranges of all numeric knobs
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("q_radius", self.q_radius),
            ("noise_frequency", self.noise_frequency),
            ("dt", self.dt),
            ("error_cap", self.error_cap),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(RLError::Config(format!("{name} must be positive, got {value}")));
            }
        }

        let non_negative = [
            ("learning_rate", self.learning_rate),
            ("discount", self.discount),
            ("noise_level", self.noise_level),
            ("statediff_threshold", self.statediff_threshold),
            ("positive_bias", self.positive_bias),
            ("signal_threshold", self.signal_threshold),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(RLError::Config(format!("{name} must be non-negative, got {value}")));
            }
        }

        let (lo, hi) = self.state_threshold;
        if !(lo <= hi) {
            return Err(RLError::Config(format!("state_threshold ({lo}, {hi}) is not ordered")));
        }
        Ok(())
    }
}

/// Configuration for [`crate::TerminationDetector`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminationConfig {
    /// Reward while any termination condition holds
    pub reward_val: f64,
    /// Reward when no condition holds
    pub default_reward: f64,
    /// Wait between termination and the start of learning
    pub state_delay: f64,
    /// Length of the learn pulse
    pub learn_interval: f64,
    /// Gap between the end of learning and the reset pulse
    pub reset_delay: f64,
    /// Length of the reset pulse
    pub reset_interval: f64,
    /// Time a region condition must hold before it terminates the action
    pub dwell_time: f64,
    /// Penalty added per tick while the environment state does not change
    pub penalty_increment: f64,
    /// Reset window active at start-up so the agent begins from a clean state
    pub initial_reset: (f64, f64),
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            reward_val: 0.0,
            default_reward: -0.05,
            state_delay: 0.0,
            learn_interval: 0.1,
            reset_delay: 0.1,
            reset_interval: 0.05,
            dwell_time: 0.5,
            penalty_increment: 1e-4,
            initial_reset: (0.05, 0.1),
        }
    }
}

impl TerminationConfig {
    /// Check that all delays and intervals are non-negative
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("state_delay", self.state_delay),
            ("learn_interval", self.learn_interval),
            ("reset_delay", self.reset_delay),
            ("reset_interval", self.reset_interval),
            ("dwell_time", self.dwell_time),
            ("penalty_increment", self.penalty_increment),
        ];
        for (name, value) in checks {
            if !(value.is_finite() && value >= 0.0) {
                return Err(RLError::Config(format!("{name} must be non-negative, got {value}")));
            }
        }
        Ok(())
    }
}
