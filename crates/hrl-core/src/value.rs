//! Action-value storage with decoder-style online learning

use std::path::Path;

use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::encoder::FeatureEncoder;
use crate::persistence;
use crate::{RLError, Result};

/// One Q-value per action, in action-set order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QValues(pub Vec<f64>);

impl QValues {
    /// Value of action `index`, 0.0 if out of range
    #[must_use]
    pub fn get(&self, index: usize) -> f64 {
        self.0.get(index).copied().unwrap_or(0.0)
    }
}

impl std::ops::Deref for QValues {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.0
    }
}

/// What a call to [`ValueStore::update`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Weights were changed
    Applied,
    /// Learning is switched off for this store
    Disabled,
    /// Activity was not available this tick; nothing changed
    Skipped,
}

/// Linear decoders from encoder activity to per-action values.
///
/// `Q(s) = Wᵀ φ(s)` with `W` of shape (features, actions). The encoder's
/// activity sums to one, so initialising every row of `W` to the initial
/// Q-values makes every state start at exactly those values.
#[derive(Debug, Clone)]
pub struct ValueStore<E> {
    encoder: E,
    decoders: Array2<f64>,
    learning: bool,
    skipped_updates: u64,
}

impl<E: FeatureEncoder> ValueStore<E> {
    /// Create a store for `init_qs.len()` actions
    pub fn new(encoder: E, init_qs: &[f64]) -> Result<Self> {
        if init_qs.is_empty() {
            return Err(RLError::Config("value store needs at least one action".into()));
        }
        let features = encoder.feature_dim();
        let decoders = Array2::from_shape_fn((features, init_qs.len()), |(_, a)| init_qs[a]);

        Ok(Self {
            encoder,
            decoders,
            learning: true,
            skipped_updates: 0,
        })
    }

    /// Number of actions
    #[must_use]
    pub fn num_actions(&self) -> usize {
        self.decoders.ncols()
    }

    /// Current Q-values for `state`. Does not modify the store.
    pub fn evaluate(&self, state: &[f64]) -> Result<QValues> {
        self.try_evaluate(state)?
            .ok_or_else(|| RLError::InvalidState("state contains non-finite values".into()))
    }

    /// Like [`Self::evaluate`], but unavailable activity is `Ok(None)`
    /// instead of an error. Only a state of the wrong length fails.
    pub fn try_evaluate(&self, state: &[f64]) -> Result<Option<QValues>> {
        if state.len() != self.encoder.input_dim() {
            return Err(RLError::DimensionMismatch {
                expected: self.encoder.input_dim(),
                actual: state.len(),
            });
        }
        Ok(self
            .encoder
            .activity(state)
            .map(|activity| QValues(activity.dot(&self.decoders).to_vec())))
    }

    /// Apply `W += learning_rate * outer(φ(state), error)`.
    ///
    /// Never fails: unavailable activity or a malformed error vector skip the
    /// update for this tick.
    pub fn update(&mut self, state: &[f64], error: &[f64], learning_rate: f64) -> UpdateOutcome {
        if !self.learning {
            return UpdateOutcome::Disabled;
        }
        if error.len() != self.num_actions() {
            warn!(
                expected = self.num_actions(),
                actual = error.len(),
                "error vector has wrong length, skipping update"
            );
            return self.skip_update();
        }
        let Some(activity) = self.encoder.activity(state) else {
            debug!("activity unavailable, skipping update");
            return self.skip_update();
        };

        let error = ArrayView1::from(error);
        for (mut row, &a) in self.decoders.rows_mut().into_iter().zip(activity.iter()) {
            if a != 0.0 {
                row.scaled_add(learning_rate * a, &error);
            }
        }
        UpdateOutcome::Applied
    }

    /// Count an update that could not be applied this tick
    pub fn skip_update(&mut self) -> UpdateOutcome {
        self.skipped_updates += 1;
        metrics::counter!("hrl.value_store.skipped_updates", 1);
        UpdateOutcome::Skipped
    }

    /// Number of updates skipped so far
    #[must_use]
    pub fn skipped_updates(&self) -> u64 {
        self.skipped_updates
    }

    /// Turn learning on or off
    pub fn set_learning(&mut self, learning: bool) {
        self.learning = learning;
    }

    /// Whether updates modify the weights
    #[must_use]
    pub fn is_learning(&self) -> bool {
        self.learning
    }

    /// Decoder matrix, shape (features, actions)
    #[must_use]
    pub fn decoders(&self) -> &Array2<f64> {
        &self.decoders
    }

    /// Replace the decoder matrix
    pub fn set_decoders(&mut self, decoders: Array2<f64>) -> Result<()> {
        if decoders.dim() != self.decoders.dim() {
            return Err(RLError::DimensionMismatch {
                expected: self.decoders.nrows(),
                actual: decoders.nrows(),
            });
        }
        self.decoders = decoders;
        Ok(())
    }

    /// Feature encoder
    #[must_use]
    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Mutable feature encoder
    pub fn encoder_mut(&mut self) -> &mut E {
        &mut self.encoder
    }

    /// Write the decoders to `path`
    pub fn save_decoders(&self, path: &Path) -> Result<()> {
        persistence::save_matrix(path, &self.decoders)
    }

    /// Load decoders from `path`; the file must match the current shape
    pub fn load_decoders(&mut self, path: &Path) -> Result<()> {
        let decoders = persistence::load_matrix(path, self.decoders.dim())?;
        self.decoders = decoders;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{RectifiedEncoder, TabularEncoder};
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn tabular_store() -> ValueStore<TabularEncoder> {
        ValueStore::new(TabularEncoder::new(3), &[0.2, 0.2, 0.2, 0.2]).unwrap()
    }

    #[test]
    fn test_initial_values() {
        let store = tabular_store();
        let q = store.evaluate(&[0.0, 1.0, 0.0]).unwrap();
        assert_eq!(q.0, vec![0.2; 4]);

        let mut rng = StdRng::seed_from_u64(5);
        let enc = RectifiedEncoder::new(40, 2, 1.0, (0.0, 0.6), &mut rng).unwrap();
        let store = ValueStore::new(enc, &[0.1, -0.3]).unwrap();
        let q = store.evaluate(&[0.5, 0.5]).unwrap();
        assert_relative_eq!(q[0], 0.1, epsilon = 1e-9);
        assert_relative_eq!(q[1], -0.3, epsilon = 1e-9);
    }

    #[test]
    fn test_update_only_touches_error_column() {
        let mut store = tabular_store();
        let before = store.decoders().clone();

        let outcome = store.update(&[0.0, 1.0, 0.0], &[0.0, 0.05, 0.0, 0.0], 1e-3);
        assert_eq!(outcome, UpdateOutcome::Applied);

        let after = store.decoders();
        for ((r, c), v) in after.indexed_iter() {
            if (r, c) == (1, 1) {
                assert_relative_eq!(*v, 0.2 + 1e-3 * 0.05);
            } else {
                assert_eq!(v.to_bits(), before[(r, c)].to_bits());
            }
        }
        let q = store.evaluate(&[0.0, 1.0, 0.0]).unwrap();
        assert_eq!(q[0].to_bits(), 0.2f64.to_bits());
        assert!(q[1] > 0.2);
    }

    #[test]
    fn test_disabled_and_skipped_updates() {
        let mut store = tabular_store();
        store.set_learning(false);
        assert_eq!(store.update(&[1.0, 0.0, 0.0], &[0.1; 4], 1.0), UpdateOutcome::Disabled);

        store.set_learning(true);
        assert_eq!(store.update(&[f64::NAN, 0.0, 0.0], &[0.1; 4], 1.0), UpdateOutcome::Skipped);
        assert_eq!(store.update(&[1.0, 0.0], &[0.1; 4], 1.0), UpdateOutcome::Skipped);
        assert_eq!(store.skipped_updates(), 2);
        assert_eq!(store.evaluate(&[1.0, 0.0, 0.0]).unwrap().0, vec![0.2; 4]);
    }

    #[test]
    fn test_evaluate_rejects_bad_state() {
        let store = tabular_store();
        assert!(matches!(
            store.evaluate(&[1.0]),
            Err(RLError::DimensionMismatch { expected: 3, actual: 1 })
        ));
        assert!(matches!(store.evaluate(&[f64::INFINITY, 0.0, 0.0]), Err(RLError::InvalidState(_))));
        assert!(store.try_evaluate(&[f64::NAN, 0.0, 0.0]).unwrap().is_none());
        assert!(store.try_evaluate(&[1.0]).is_err());
    }

    #[test]
    fn test_decoder_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dec.txt");
        let mut store = tabular_store();
        store.update(&[0.0, 0.0, 1.0], &[0.3, 0.0, 0.0, -0.1], 0.5);
        store.save_decoders(&path).unwrap();

        let mut restored = tabular_store();
        restored.load_decoders(&path).unwrap();
        assert_eq!(restored.decoders(), store.decoders());

        let mut wrong = ValueStore::new(TabularEncoder::new(3), &[0.2, 0.2]).unwrap();
        assert!(matches!(wrong.load_decoders(&path), Err(RLError::ConfigMismatch { .. })));
    }

    proptest! {
        #[test]
        fn prop_evaluate_is_idempotent(
            state in proptest::collection::vec(-1.0f64..1.0, 2),
            seed in any::<u64>(),
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let enc = RectifiedEncoder::new(20, 2, 1.0, (0.0, 1.0), &mut rng).unwrap();
            let mut store = ValueStore::new(enc, &[0.2, 0.4, 0.0]).unwrap();
            store.update(&[0.3, 0.1], &[0.0, 0.1, 0.0], 0.1);

            let first = store.evaluate(&state).unwrap();
            let second = store.evaluate(&state).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
