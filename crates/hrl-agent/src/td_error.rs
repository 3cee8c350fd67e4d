//! Continuous-time SMDP temporal-difference error.
//!
//! Between two reset pulses the error accumulates reward and discount over
//! the running action, so that when the action terminates and the learn
//! pulse arrives the error compares the value of the new state, plus what was
//! collected along the way, against the value stored when the action began.

use std::fmt::Debug;

use hrl_core::state::argmax;

use crate::config::TdStrategyKind;

/// Level above which the reset input counts as active
pub const RESET_THRESHOLD: f64 = 0.1;

/// Inputs to one TD error tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TdInput {
    /// Reward received this tick
    pub reward: f64,
    /// Q value of the current action in the current state
    pub curr_q: f64,
    /// Q value of the saved action in the saved state
    pub store_q: f64,
    /// Reset signal; above [`RESET_THRESHOLD`] the accumulators are cleared
    pub reset: f64,
}

/// A formulation of the SMDP TD error
pub trait TdErrorStrategy: Debug + Send + Sync {
    /// Advance one tick of length `dt` and return the new error
    fn step(&mut self, input: TdInput) -> f64;

    /// Most recent error
    fn error(&self) -> f64;

    /// Reward accumulated since the last reset
    fn reward_acc(&self) -> f64;

    /// Discount accumulated since the last reset
    fn discount_acc(&self) -> f64;
}

/// Build the strategy selected by `kind`
#[must_use]
pub fn strategy_for(kind: TdStrategyKind, discount: f64, dt: f64) -> Box<dyn TdErrorStrategy> {
    match kind {
        TdStrategyKind::Continuous => Box::new(ContinuousTdError::new(discount, dt)),
        TdStrategyKind::Multiplicative => Box::new(MultiplicativeTdError::new(discount, dt)),
    }
}

/// `error = curr_q + ∫reward - store_q - ∫discount·store_q`
#[derive(Debug, Clone)]
pub struct ContinuousTdError {
    discount: f64,
    dt: f64,
    reward_acc: f64,
    discount_acc: f64,
    error: f64,
}

impl ContinuousTdError {
    /// New strategy with empty accumulators
    #[must_use]
    pub fn new(discount: f64, dt: f64) -> Self {
        Self {
            discount,
            dt,
            reward_acc: 0.0,
            discount_acc: 0.0,
            error: 0.0,
        }
    }
}

impl TdErrorStrategy for ContinuousTdError {
    fn step(&mut self, input: TdInput) -> f64 {
        if input.reset > RESET_THRESHOLD {
            self.reward_acc = 0.0;
            self.discount_acc = 0.0;
        } else {
            self.reward_acc += self.dt * input.reward;
            self.discount_acc += self.discount * self.dt * input.store_q;
        }
        self.error = input.curr_q + self.reward_acc - input.store_q - self.discount_acc;
        self.error
    }

    fn error(&self) -> f64 {
        self.error
    }

    fn reward_acc(&self) -> f64 {
        self.reward_acc
    }

    fn discount_acc(&self) -> f64 {
        self.discount_acc
    }
}

/// `error = γ(t)·curr_q + ∫γ·reward - store_q` with `γ(t) = discount^t`
#[derive(Debug, Clone)]
pub struct MultiplicativeTdError {
    step_decay: f64,
    dt: f64,
    gamma: f64,
    reward_acc: f64,
    error: f64,
}

impl MultiplicativeTdError {
    /// New strategy with `γ = 1`
    #[must_use]
    pub fn new(discount: f64, dt: f64) -> Self {
        Self {
            step_decay: discount.powf(dt),
            dt,
            gamma: 1.0,
            reward_acc: 0.0,
            error: 0.0,
        }
    }

    /// Discount applied to rewards arriving now
    #[must_use]
    pub fn gamma(&self) -> f64 {
        self.gamma
    }
}

impl TdErrorStrategy for MultiplicativeTdError {
    fn step(&mut self, input: TdInput) -> f64 {
        if input.reset > RESET_THRESHOLD {
            self.gamma = 1.0;
            self.reward_acc = 0.0;
        } else {
            self.gamma *= self.step_decay;
            self.reward_acc += self.dt * input.reward * self.gamma;
        }
        self.error = self.gamma * input.curr_q + self.reward_acc - input.store_q;
        self.error
    }

    fn error(&self) -> f64 {
        self.error
    }

    fn reward_acc(&self) -> f64 {
        self.reward_acc
    }

    /// Fraction of the current value lost to discounting
    fn discount_acc(&self) -> f64 {
        1.0 - self.gamma
    }
}

/// Error split into the masked TD part and the positive bias
#[derive(Debug, Clone, PartialEq)]
pub struct GatedError {
    /// Scaled, capped TD error at the saved action; zero elsewhere
    pub masked: Vec<f64>,
    /// Bias added where the saved-state value is negative
    pub bias: Vec<f64>,
}

impl GatedError {
    fn zeros(n: usize) -> Self {
        Self {
            masked: vec![0.0; n],
            bias: vec![0.0; n],
        }
    }

    /// Error vector sent to the value stores, capped to `±cap`
    #[must_use]
    pub fn combined(&self, cap: f64) -> Vec<f64> {
        self.masked
            .iter()
            .zip(&self.bias)
            .map(|(m, b)| (m + b).clamp(-cap, cap))
            .collect()
    }

    /// Whether every component is zero
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.masked.iter().chain(&self.bias).all(|v| *v == 0.0)
    }
}

/// Turns the scalar TD error into a per-action learning signal
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorGate {
    /// Divides the TD error before capping
    pub q_radius: f64,
    /// Magnitude cap
    pub cap: f64,
    /// Added where the saved-state value is negative
    pub positive_bias: f64,
    /// Learn level above which the gate opens
    pub learn_threshold: f64,
}

impl ErrorGate {
    /// Gate the TD error.
    ///
    /// Zero unless `learn` reaches the threshold. The TD part only lands on
    /// the action `argmax(saved_one_hot)`.
    #[must_use]
    pub fn gate(
        &self,
        td_error: f64,
        saved_one_hot: &[f64],
        old_values: &[f64],
        learn: f64,
    ) -> GatedError {
        let n = saved_one_hot.len();
        let mut out = GatedError::zeros(n);
        if learn < self.learn_threshold || n == 0 {
            return out;
        }

        let index = argmax(saved_one_hot);
        out.masked[index] = (td_error / self.q_radius).clamp(-self.cap, self.cap);
        for (b, v) in out.bias.iter_mut().zip(old_values) {
            if *v < 0.0 {
                *b = self.positive_bias;
            }
        }
        out
    }

    /// [`Self::gate`] followed by [`GatedError::combined`]
    #[must_use]
    pub fn error_vector(
        &self,
        td_error: f64,
        saved_one_hot: &[f64],
        old_values: &[f64],
        learn: f64,
    ) -> Vec<f64> {
        self.gate(td_error, saved_one_hot, old_values, learn).combined(self.cap)
    }
}
