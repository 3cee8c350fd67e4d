//! Exploration noise added to Q values before action selection

use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

use hrl_core::{RLError, Result};

/// Gaussian noise held constant for `1 / frequency` time units, then resampled
#[derive(Debug, Clone)]
pub struct NoiseSource {
    period: f64,
    next_update: f64,
    dist: Option<Normal<f64>>,
    current: Vec<f64>,
    rng: StdRng,
}

impl NoiseSource {
    /// Noise of dimension `dim` with standard deviation `scale`
    pub fn new(dim: usize, frequency: f64, scale: f64, rng: StdRng) -> Result<Self> {
        if !(frequency.is_finite() && frequency > 0.0) {
            return Err(RLError::Config(format!(
                "noise frequency must be positive, got {frequency}"
            )));
        }
        let dist = if scale > 0.0 {
            Some(Normal::new(0.0, scale).map_err(|e| RLError::Config(e.to_string()))?)
        } else {
            None
        };

        Ok(Self {
            period: 1.0 / frequency,
            next_update: 0.0,
            dist,
            current: vec![0.0; dim],
            rng,
        })
    }

    /// Noise vector at time `t`
    pub fn sample(&mut self, t: f64) -> &[f64] {
        if t >= self.next_update {
            if let Some(dist) = &self.dist {
                for v in &mut self.current {
                    *v = dist.sample(&mut self.rng);
                }
            }
            self.next_update = t + self.period;
        }
        &self.current
    }

    /// Most recent noise vector without advancing
    #[must_use]
    pub fn current(&self) -> &[f64] {
        &self.current
    }
}
