//! Feature encoders mapping a state vector to the activity the value
//! decoders are learned over

use ndarray::{Array1, Array2};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::{RLError, Result};

/// Maps a state vector onto a non-negative, L1-normalised activity vector.
///
/// Returning `None` from [`FeatureEncoder::activity`] means the activity is
/// not available for this input (wrong length, non-finite values). Callers
/// treat that as a transient condition.
pub trait FeatureEncoder: Clone + Send + Sync + 'static {
    /// Length of the state vectors this encoder accepts
    fn input_dim(&self) -> usize;

    /// Number of features produced
    fn feature_dim(&self) -> usize;

    /// Activity for `state`
    fn activity(&self, state: &[f64]) -> Option<Array1<f64>>;

    /// Encoder matrix, one row per feature
    fn encoders(&self) -> Array2<f64>;

    /// Replace the encoder matrix (shape must match)
    fn set_encoders(&mut self, encoders: Array2<f64>) -> Result<()>;
}

/// Scale `activity` so that it sums to one. All-zero activity is left as is.
fn l1_normalize(mut activity: Array1<f64>) -> Array1<f64> {
    let total: f64 = activity.sum();
    if total > 0.0 {
        activity.mapv_inplace(|a| a / total);
    }
    activity
}

fn usable(state: &[f64], dim: usize) -> bool {
    state.len() == dim && state.iter().all(|x| x.is_finite())
}

/// Table lookup: each state dimension is its own feature.
///
/// Intended for one-hot state inputs, where it reduces the value store to a
/// plain Q table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabularEncoder {
    dim: usize,
}

impl TabularEncoder {
    /// Create a tabular encoder over `dim` states
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl FeatureEncoder for TabularEncoder {
    fn input_dim(&self) -> usize {
        self.dim
    }

    fn feature_dim(&self) -> usize {
        self.dim
    }

    fn activity(&self, state: &[f64]) -> Option<Array1<f64>> {
        if !usable(state, self.dim) {
            return None;
        }
        Some(l1_normalize(state.iter().map(|x| x.max(0.0)).collect()))
    }

    fn encoders(&self) -> Array2<f64> {
        Array2::eye(self.dim)
    }

    /// Tabular features have no learned encoders; only the shape is checked.
    fn set_encoders(&mut self, encoders: Array2<f64>) -> Result<()> {
        if encoders.dim() != (self.dim, self.dim) {
            return Err(RLError::DimensionMismatch {
                expected: self.dim,
                actual: encoders.nrows(),
            });
        }
        Ok(())
    }
}

/// Population of rectified-linear units with random preferred directions.
///
/// Unit `i` responds with `max(0, (e_i · x / radius - c_i) / (1 - c_i))`
/// where `e_i` is a unit encoder and `c_i` an intercept drawn from the
/// configured threshold range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RectifiedEncoder {
    encoders: Array2<f64>,
    intercepts: Array1<f64>,
    radius: f64,
}

impl RectifiedEncoder {
    /// Sample `units` random units over `dim`-dimensional states
    pub fn new<R: Rng>(
        units: usize,
        dim: usize,
        radius: f64,
        threshold: (f64, f64),
        rng: &mut R,
    ) -> Result<Self> {
        if units == 0 || dim == 0 {
            return Err(RLError::Config("encoder needs at least one unit and one dimension".into()));
        }
        let (lo, hi) = threshold;
        if lo.is_nan() || hi.is_nan() || lo > hi || lo < -1.0 || hi > 1.0 {
            return Err(RLError::Config(format!(
                "state_threshold ({lo}, {hi}) must be an ordered range inside [-1, 1]"
            )));
        }

        let mut encoders = Array2::zeros((units, dim));
        for mut row in encoders.rows_mut() {
            loop {
                row.mapv_inplace(|_| rng.sample::<f64, _>(StandardNormal));
                let length = row.dot(&row).sqrt();
                if length > 1e-9 {
                    row.mapv_inplace(|x| x / length);
                    break;
                }
            }
        }

        let intercepts = (0..units)
            .map(|_| if lo < hi { rng.gen_range(lo..hi) } else { lo })
            .collect();

        Self::from_parts(encoders, intercepts, radius)
    }

    /// Build from explicit encoders and intercepts
    pub fn from_parts(encoders: Array2<f64>, intercepts: Array1<f64>, radius: f64) -> Result<Self> {
        if encoders.nrows() != intercepts.len() {
            return Err(RLError::DimensionMismatch {
                expected: encoders.nrows(),
                actual: intercepts.len(),
            });
        }
        if radius <= 0.0 {
            return Err(RLError::Config(format!("radius must be positive, got {radius}")));
        }
        // keep the gain finite
        let intercepts = intercepts.mapv(|c| c.min(0.999));
        Ok(Self {
            encoders,
            intercepts,
            radius,
        })
    }

    /// Intercepts of the units
    #[must_use]
    pub fn intercepts(&self) -> &Array1<f64> {
        &self.intercepts
    }
}

impl FeatureEncoder for RectifiedEncoder {
    fn input_dim(&self) -> usize {
        self.encoders.ncols()
    }

    fn feature_dim(&self) -> usize {
        self.encoders.nrows()
    }

    fn activity(&self, state: &[f64]) -> Option<Array1<f64>> {
        if !usable(state, self.input_dim()) {
            return None;
        }
        let x = Array1::from(state.to_vec()) / self.radius;
        let drive = self.encoders.dot(&x);
        let rates = ndarray::Zip::from(&drive)
            .and(&self.intercepts)
            .map_collect(|d, c| ((d - c) / (1.0 - c)).max(0.0));
        Some(l1_normalize(rates))
    }

    fn encoders(&self) -> Array2<f64> {
        self.encoders.clone()
    }

    fn set_encoders(&mut self, encoders: Array2<f64>) -> Result<()> {
        if encoders.dim() != self.encoders.dim() {
            return Err(RLError::DimensionMismatch {
                expected: self.encoders.nrows(),
                actual: encoders.nrows(),
            });
        }
        self.encoders = encoders;
        Ok(())
    }
}
