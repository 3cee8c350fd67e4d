//! Greedy action selection over noisy Q values, with a latched saved choice

use hrl_core::state::{argmax, one_hot};
use hrl_core::{ActionSet, RLError, Result};

use crate::noise::NoiseSource;

/// Picks the highest (noisy) Q value each tick and remembers the choice
/// that was latched by the last save pulse.
#[derive(Debug, Clone)]
pub struct ActionSelector {
    actions: ActionSet,
    noise: NoiseSource,
    save_threshold: f64,
    biased: Vec<f64>,
    saved_biased: Vec<f64>,
    current: usize,
    saved: usize,
}

impl ActionSelector {
    /// Selector over `actions`. The saved choice starts at action 0.
    pub fn new(actions: ActionSet, noise: NoiseSource, save_threshold: f64) -> Self {
        let n = actions.len();
        Self {
            actions,
            noise,
            save_threshold,
            biased: vec![0.0; n],
            saved_biased: vec![0.0; n],
            current: 0,
            saved: 0,
        }
    }

    /// Add the exploration noise for time `t` to `values` and select
    pub fn choose(&mut self, values: &[f64], t: f64) -> Result<usize> {
        let noise = self.noise.sample(t).to_vec();
        self.choose_with_noise(values, &noise)
    }

    /// Select `argmax(values + noise)`; ties go to the lowest index
    pub fn choose_with_noise(&mut self, values: &[f64], noise: &[f64]) -> Result<usize> {
        if values.len() != self.actions.len() {
            return Err(RLError::DimensionMismatch {
                expected: self.actions.len(),
                actual: values.len(),
            });
        }
        self.biased = values
            .iter()
            .enumerate()
            .map(|(i, v)| v + noise.get(i).copied().unwrap_or(0.0))
            .collect();
        self.current = argmax(&self.biased);
        Ok(self.current)
    }

    /// Latch the current choice if `signal` exceeds the save threshold.
    /// Returns whether the saved choice was overwritten.
    pub fn save(&mut self, signal: f64) -> bool {
        if signal > self.save_threshold {
            self.saved_biased.clone_from(&self.biased);
            self.saved = self.current;
            true
        } else {
            false
        }
    }

    /// Index of the action chosen this tick
    #[must_use]
    pub fn current(&self) -> usize {
        self.current
    }

    /// Index of the latched action
    #[must_use]
    pub fn saved(&self) -> usize {
        self.saved
    }

    /// One-hot encoding of [`Self::current`]
    #[must_use]
    pub fn current_one_hot(&self) -> Vec<f64> {
        one_hot(self.actions.len(), self.current)
    }

    /// One-hot encoding of [`Self::saved`]
    #[must_use]
    pub fn saved_one_hot(&self) -> Vec<f64> {
        one_hot(self.actions.len(), self.saved)
    }

    /// Effect vector of the current action
    #[must_use]
    pub fn current_action_vector(&self) -> &[f64] {
        self.vector_of(self.current)
    }

    /// Effect vector of the latched action
    #[must_use]
    pub fn saved_action_vector(&self) -> &[f64] {
        self.vector_of(self.saved)
    }

    fn vector_of(&self, index: usize) -> &[f64] {
        self.actions
            .get(index)
            .map_or(&[][..], |a| a.vector.as_slice())
    }

    /// Noisy values from the last [`Self::choose`]
    #[must_use]
    pub fn biased_values(&self) -> &[f64] {
        &self.biased
    }

    /// Noisy values as they were at the last save
    #[must_use]
    pub fn saved_biased_values(&self) -> &[f64] {
        &self.saved_biased
    }

    /// Action set being selected from
    #[must_use]
    pub fn actions(&self) -> &ActionSet {
        &self.actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn selector() -> ActionSelector {
        let noise = NoiseSource::new(4, 1.0, 0.0, StdRng::seed_from_u64(0)).unwrap();
        ActionSelector::new(ActionSet::cardinal(), noise, 0.1)
    }

    #[test]
    fn test_ties_go_to_first_index() {
        let mut sel = selector();
        assert_eq!(sel.choose_with_noise(&[0.2, 0.2, 0.2, 0.2], &[0.0; 4]).unwrap(), 0);
        assert_eq!(sel.choose_with_noise(&[0.1, 0.3, 0.3, 0.0], &[0.0; 4]).unwrap(), 1);
    }

    #[test]
    fn test_noise_can_flip_choice() {
        let mut sel = selector();
        let idx = sel.choose_with_noise(&[0.2, 0.1, 0.0, 0.0], &[0.0, 0.2, 0.0, 0.0]).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(sel.current_action_vector(), &[1.0, 0.0]);
    }

    #[test]
    fn test_save_latches_until_next_pulse() {
        let mut sel = selector();
        sel.choose_with_noise(&[0.0, 0.0, 0.5, 0.0], &[0.0; 4]).unwrap();
        assert!(sel.save(1.0));
        assert_eq!(sel.saved(), 2);

        sel.choose_with_noise(&[0.9, 0.0, 0.0, 0.0], &[0.0; 4]).unwrap();
        assert!(!sel.save(0.05));
        assert_eq!(sel.current(), 0);
        assert_eq!(sel.saved(), 2);
        assert_eq!(sel.saved_one_hot(), vec![0.0, 0.0, 1.0, 0.0]);
        assert_eq!(sel.saved_action_vector(), &[0.0, -1.0]);
        assert_eq!(sel.saved_biased_values(), &[0.0, 0.0, 0.5, 0.0]);
    }

    #[test]
    fn test_rejects_wrong_length() {
        let mut sel = selector();
        assert!(sel.choose_with_noise(&[0.1, 0.2], &[0.0; 2]).is_err());
    }

    proptest! {
        #[test]
        fn prop_one_hot_outputs_sum_to_one(
            values in proptest::collection::vec(-1.0f64..1.0, 4),
            noise in proptest::collection::vec(-0.1f64..0.1, 4),
            save in 0.0f64..1.0,
        ) {
            let mut sel = selector();
            sel.choose_with_noise(&values, &noise).unwrap();
            sel.save(save);
            prop_assert_eq!(sel.current_one_hot().iter().sum::<f64>(), 1.0);
            prop_assert_eq!(sel.saved_one_hot().iter().sum::<f64>(), 1.0);
        }
    }
}
