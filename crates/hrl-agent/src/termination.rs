//! Termination detection: decides when the running action has finished and
//! schedules the learn and reset pulses that follow.
//!
//! A detector owns an ordered list of conditions. Timers fire after a random
//! duration; regions fire once the environment has been inside a labelled
//! area (optionally matching a context vector) for the configured dwell time.
//! The first condition that fires in a tick opens a learn window followed by
//! a reset window:
//!
//! ```text
//! t ──┬── state_delay ──┬── learn_interval ──┬── reset_delay ──┬── reset_interval ──┐
//!  activate           learn on            learn off         reset on            reset off
//! ```

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use hrl_core::state::{normalize, similarity};
use hrl_core::{Observe, RLError, Result};

use crate::config::TerminationConfig;

/// Minimum similarity between the context vector and the reference for a
/// region condition to hold
const CONTEXT_MATCH: f64 = 0.3;

/// Similarity at or above which two normalised states count as unchanged
const UNCHANGED: f64 = 1.0 - 1e-9;

/// Declarative description of a termination condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerminationCondition {
    /// Fires after a duration drawn uniformly from `[min, max]`
    Timer {
        /// Shortest duration
        min: f64,
        /// Longest duration
        max: f64,
    },
    /// Fires when the environment reports being in region `label`
    Region {
        /// Region name passed to [`Observe::is_in`]
        label: String,
        /// Reference context; the environment's context must match it
        context: Option<Vec<f64>>,
    },
}

/// Countdown measured in whole ticks
#[derive(Debug, Clone)]
pub struct Timer {
    min: f64,
    max: f64,
    dt: f64,
    remaining: u64,
}

impl Timer {
    /// Timer over `[min, max]`, already armed with a first duration
    pub fn new(min: f64, max: f64, dt: f64, rng: &mut StdRng) -> Result<Self> {
        if !(min > 0.0 && min <= max && max.is_finite()) {
            return Err(RLError::Config(format!("invalid timer range ({min}, {max})")));
        }
        let mut timer = Self {
            min,
            max,
            dt,
            remaining: 0,
        };
        timer.rearm(rng);
        Ok(timer)
    }

    /// Count down one tick
    pub fn tick(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
    }

    /// Whether the countdown has run out
    #[must_use]
    pub fn rings(&self) -> bool {
        self.remaining == 0
    }

    /// Draw a new duration
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn rearm(&mut self, rng: &mut StdRng) {
        let duration = if self.max > self.min {
            rng.gen_range(self.min..=self.max)
        } else {
            self.min
        };
        self.remaining = ((duration / self.dt).round() as u64).max(1);
    }
}

#[derive(Debug, Clone)]
enum ConditionState {
    Timer(Timer),
    Region {
        label: String,
        context: Option<Vec<f64>>,
        dwell: u64,
    },
}

/// Coarse view of where the detector is in its termination cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No termination pending
    Running,
    /// A condition fired; learning has not finished yet
    ArmedLearn,
    /// Learning finished; reset has not finished yet
    ArmedReset,
}

/// Signals produced by one [`TerminationDetector::tick`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerminationSignals {
    /// 1.0 while the learn window is open
    pub learn: f64,
    /// 1.0 while the reset window is open
    pub reset: f64,
    /// Pseudo-reward minus the stationary-state penalty
    pub reward: f64,
    /// Whether a condition fired this tick and scheduled new windows
    pub activated: bool,
}

/// Watches termination conditions and emits learn, reset and pseudo-reward
#[derive(Debug, Clone)]
pub struct TerminationDetector {
    config: TerminationConfig,
    dt: f64,
    dwell_ticks: u64,
    conditions: Vec<ConditionState>,
    rng: StdRng,
    activated_at: Option<f64>,
    learn_window: (f64, f64),
    reset_window: (f64, f64),
    prev_state: Vec<f64>,
    state_penalty: f64,
    activations: u64,
    last: TerminationSignals,
}

impl TerminationDetector {
    /// Build a detector; conditions are evaluated in the given order
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn new(
        conditions: &[TerminationCondition],
        config: TerminationConfig,
        dt: f64,
        mut rng: StdRng,
    ) -> Result<Self> {
        config.validate()?;
        if !(dt.is_finite() && dt > 0.0) {
            return Err(RLError::Config(format!("dt must be positive, got {dt}")));
        }

        let conditions = conditions
            .iter()
            .map(|c| match c {
                TerminationCondition::Timer { min, max } => {
                    Ok(ConditionState::Timer(Timer::new(*min, *max, dt, &mut rng)?))
                }
                TerminationCondition::Region { label, context } => Ok(ConditionState::Region {
                    label: label.clone(),
                    context: context.as_deref().map(normalize),
                    dwell: 0,
                }),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            dwell_ticks: (config.dwell_time / dt).round() as u64,
            learn_window: (-1.0, -1.0),
            reset_window: config.initial_reset,
            last: TerminationSignals {
                learn: 0.0,
                reset: 0.0,
                reward: config.default_reward,
                activated: false,
            },
            config,
            dt,
            conditions,
            rng,
            activated_at: None,
            prev_state: Vec::new(),
            state_penalty: 0.0,
            activations: 0,
        })
    }

    /// Advance to time `t` and look at `env`
    pub fn tick<O: Observe + ?Sized>(&mut self, t: f64, env: &O) -> TerminationSignals {
        let mut active = false;
        let mut fire = false;

        for condition in &mut self.conditions {
            match condition {
                ConditionState::Timer(timer) => {
                    timer.tick();
                    if timer.rings() {
                        active = true;
                        fire = true;
                        timer.rearm(&mut self.rng);
                    }
                }
                ConditionState::Region {
                    label,
                    context,
                    dwell,
                } => {
                    if region_holds(env, label, context.as_deref()) {
                        active = true;
                        *dwell += 1;
                        if *dwell > self.dwell_ticks {
                            fire = true;
                            *dwell = 0;
                        }
                    }
                }
            }
        }

        if fire {
            self.activate(t);
        }

        let reset = window_value(self.reset_window, t);
        if reset > 0.0 {
            for condition in &mut self.conditions {
                if let ConditionState::Region { dwell, .. } = condition {
                    *dwell = 0;
                }
            }
        }

        self.update_state_penalty(env.state());
        let base = if active {
            self.config.reward_val
        } else {
            self.config.default_reward
        };

        self.last = TerminationSignals {
            learn: window_value(self.learn_window, t),
            reset,
            reward: base - self.state_penalty,
            activated: fire,
        };
        trace!(
            t,
            learn = self.last.learn,
            reset = self.last.reset,
            reward = self.last.reward,
            "termination tick"
        );
        self.last
    }

    /// Schedule learn and reset windows for a termination at time `t`
    pub fn activate(&mut self, t: f64) {
        let c = &self.config;
        let learn_start = t + c.state_delay;
        let learn_end = learn_start + c.learn_interval;
        let reset_start = learn_end + c.reset_delay;
        self.learn_window = (learn_start, learn_end);
        self.reset_window = (reset_start, reset_start + c.reset_interval);
        self.activated_at = Some(t);
        self.activations += 1;

        metrics::counter!("hrl.termination.activations", 1);
        debug!(t, learn = ?self.learn_window, reset = ?self.reset_window, "action terminated");
    }

    fn update_state_penalty(&mut self, state: &[f64]) {
        let prev_zero = self.prev_state.iter().all(|v| *v == 0.0);
        let changed = !prev_zero
            && similarity(&normalize(state), &normalize(&self.prev_state)) < UNCHANGED;
        if changed {
            self.state_penalty = 0.0;
        } else {
            self.state_penalty += self.config.penalty_increment;
        }
        self.prev_state.clear();
        self.prev_state.extend_from_slice(state);
    }

    /// Learn output of the last tick
    #[must_use]
    pub fn learn(&self) -> f64 {
        self.last.learn
    }

    /// Reset output of the last tick
    #[must_use]
    pub fn reset(&self) -> f64 {
        self.last.reset
    }

    /// Pseudo-reward of the last tick
    #[must_use]
    pub fn reward(&self) -> f64 {
        self.last.reward
    }

    /// Penalty accumulated while the environment state stays put
    #[must_use]
    pub fn state_penalty(&self) -> f64 {
        self.state_penalty
    }

    /// Number of terminations so far
    #[must_use]
    pub fn activations(&self) -> u64 {
        self.activations
    }

    /// Currently scheduled learn window
    #[must_use]
    pub fn learn_window(&self) -> (f64, f64) {
        self.learn_window
    }

    /// Currently scheduled reset window
    #[must_use]
    pub fn reset_window(&self) -> (f64, f64) {
        self.reset_window
    }

    /// Where the detector is in its cycle at time `t`
    #[must_use]
    pub fn phase(&self, t: f64) -> Phase {
        match self.activated_at {
            Some(at) if t >= at && t < self.learn_window.1 => Phase::ArmedLearn,
            Some(_) if t >= self.learn_window.1 && t < self.reset_window.1 => Phase::ArmedReset,
            _ => Phase::Running,
        }
    }

    /// Simulation time step
    #[must_use]
    pub fn dt(&self) -> f64 {
        self.dt
    }
}

fn region_holds<O: Observe + ?Sized>(env: &O, label: &str, reference: Option<&[f64]>) -> bool {
    if !env.is_in(label) {
        return false;
    }
    match (reference, env.context()) {
        (None, _) => true,
        (Some(reference), Some(context)) => {
            similarity(&normalize(context), reference) > CONTEXT_MATCH
        }
        (Some(_), None) => false,
    }
}

fn window_value((start, end): (f64, f64), t: f64) -> f64 {
    if start < t && t < end {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use hrl_core::Reward;
    use rand::SeedableRng;

    struct StubEnv {
        state: Vec<f64>,
        regions: Vec<&'static str>,
        context: Option<Vec<f64>>,
    }

    impl StubEnv {
        fn new(state: Vec<f64>) -> Self {
            Self {
                state,
                regions: Vec::new(),
                context: None,
            }
        }
    }

    impl Observe for StubEnv {
        fn state_dim(&self) -> usize {
            self.state.len()
        }

        fn state(&self) -> &[f64] {
            &self.state
        }

        fn reward(&self) -> Reward {
            Reward::default()
        }

        fn context(&self) -> Option<&[f64]> {
            self.context.as_deref()
        }

        fn is_in(&self, label: &str) -> bool {
            self.regions.contains(&label)
        }
    }

    fn detector(conditions: &[TerminationCondition], dt: f64) -> TerminationDetector {
        TerminationDetector::new(
            conditions,
            TerminationConfig::default(),
            dt,
            StdRng::seed_from_u64(42),
        )
        .unwrap()
    }

    #[test]
    fn test_fixed_timer_fires_every_period() {
        let dt = 0.01;
        let mut det = detector(&[TerminationCondition::Timer { min: 30.0, max: 30.0 }], dt);
        let mut env = StubEnv::new(vec![1.0, 0.0]);

        let mut pulses = Vec::new();
        let mut in_pulse = false;
        let mut pulse_start = 0.0;
        for k in 0..30_100u32 {
            let t = f64::from(k) * dt;
            // keep the state moving so the penalty stays out of the picture
            env.state = vec![(t * 7.0).cos(), (t * 7.0).sin()];
            let out = det.tick(t, &env);
            if out.learn > 0.0 && !in_pulse {
                in_pulse = true;
                pulse_start = t;
            } else if out.learn == 0.0 && in_pulse {
                in_pulse = false;
                pulses.push((pulse_start, t));
            }
        }

        assert_eq!(det.activations(), 10);
        assert_eq!(pulses.len(), 10);
        for (i, (start, end)) in pulses.iter().enumerate() {
            assert_relative_eq!(*start, 30.0 * (i as f64 + 1.0), epsilon = 0.05);
            assert_relative_eq!(end - start, 0.1, epsilon = 1.5 * dt);
        }
    }

    #[test]
    fn test_windows_follow_activation() {
        let config = TerminationConfig {
            state_delay: 0.2,
            ..TerminationConfig::default()
        };
        let mut det = TerminationDetector::new(&[], config, 0.001, StdRng::seed_from_u64(1)).unwrap();
        det.activate(1.0);
        let (ls, le) = det.learn_window();
        let (rs, re) = det.reset_window();
        assert_relative_eq!(ls, 1.2, epsilon = 1e-12);
        assert_relative_eq!(le, 1.3, epsilon = 1e-12);
        assert_relative_eq!(rs, 1.4, epsilon = 1e-12);
        assert_relative_eq!(re, 1.45, epsilon = 1e-12);

        assert_eq!(det.phase(0.5), Phase::Running);
        assert_eq!(det.phase(1.1), Phase::ArmedLearn);
        assert_eq!(det.phase(1.35), Phase::ArmedReset);
        assert_eq!(det.phase(2.0), Phase::Running);
    }

    #[test]
    fn test_initial_reset_window() {
        let mut det = detector(&[], 0.001);
        let env = StubEnv::new(vec![0.0]);
        assert_eq!(det.tick(0.01, &env).reset, 0.0);
        assert_eq!(det.tick(0.07, &env).reset, 1.0);
        assert_eq!(det.tick(0.2, &env).reset, 0.0);
    }

    #[test]
    fn test_region_needs_dwell_time() {
        let dt = 0.01;
        let cond = TerminationCondition::Region {
            label: "goal".into(),
            context: None,
        };
        let mut det = detector(&[cond], dt);
        let mut env = StubEnv::new(vec![1.0, 0.0]);
        env.regions.push("goal");

        let mut fired_at = None;
        for k in 20..200u32 {
            let t = f64::from(k) * dt;
            env.state = vec![t.cos(), t.sin()];
            let out = det.tick(t, &env);
            assert_relative_eq!(out.reward, 0.0, epsilon = 1e-3);
            if out.activated {
                fired_at = Some(k);
                break;
            }
        }
        // 0.5 time units of dwell at dt = 0.01 is 50 ticks; fires on the 51st
        assert_eq!(fired_at, Some(70));
    }

    #[test]
    fn test_region_context_must_match() {
        let cond = TerminationCondition::Region {
            label: "room".into(),
            context: Some(vec![1.0, 0.0]),
        };
        let mut det = detector(&[cond], 0.01);
        let mut env = StubEnv::new(vec![0.3]);
        env.regions.push("room");
        env.context = Some(vec![0.0, 2.0]);
        env.state = vec![0.5];
        let out = det.tick(1.0, &env);
        assert_relative_eq!(out.reward, -0.05 - det.state_penalty());

        env.context = Some(vec![3.0, 0.5]);
        env.state = vec![0.7, 0.1];
        let out = det.tick(1.01, &env);
        assert_relative_eq!(out.reward, 0.0);
    }

    #[test]
    fn test_only_first_activation_schedules() {
        let dt = 0.01;
        let conds = [
            TerminationCondition::Timer { min: 0.05, max: 0.05 },
            TerminationCondition::Timer { min: 0.05, max: 0.05 },
        ];
        let mut det = detector(&conds, dt);
        let env = StubEnv::new(vec![0.0]);
        let mut fired = 0;
        for k in 0..5u32 {
            if det.tick(f64::from(k) * dt, &env).activated {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
        assert_eq!(det.activations(), 1);
    }

    #[test]
    fn test_stationary_state_penalty() {
        let mut det = detector(&[], 0.001);
        let mut env = StubEnv::new(vec![0.2, 0.4]);
        for k in 1..=100u32 {
            let out = det.tick(1.0 + f64::from(k) * 0.001, &env);
            assert_relative_eq!(det.state_penalty(), f64::from(k) * 1e-4, epsilon = 1e-12);
            assert_relative_eq!(out.reward, -0.05 - f64::from(k) * 1e-4, epsilon = 1e-12);
        }

        env.state = vec![0.4, 0.1];
        let out = det.tick(2.0, &env);
        assert_eq!(det.state_penalty(), 0.0);
        assert_relative_eq!(out.reward, -0.05);
    }

    #[test]
    fn test_penalty_resets_after_zero_sum_state() {
        let mut det = detector(&[], 0.001);
        let mut env = StubEnv::new(vec![1.0, -1.0]);
        det.tick(1.0, &env);
        det.tick(1.001, &env);
        assert_relative_eq!(det.state_penalty(), 2e-4, epsilon = 1e-12);

        env.state = vec![0.5, 0.9];
        det.tick(1.002, &env);
        assert_eq!(det.state_penalty(), 0.0);
    }

    #[test]
    fn test_bad_timer_range() {
        let result = TerminationDetector::new(
            &[TerminationCondition::Timer { min: 2.0, max: 1.0 }],
            TerminationConfig::default(),
            0.01,
            StdRng::seed_from_u64(0),
        );
        assert!(matches!(result, Err(RLError::Config(_))));
    }

    #[test]
    fn test_condition_serde() {
        let json = r#"[{"kind": "timer", "min": 1.0, "max": 2.0},
                       {"kind": "region", "label": "goal", "context": null}]"#;
        let conds: Vec<TerminationCondition> = serde_json::from_str(json).unwrap();
        assert_eq!(conds.len(), 2);
        assert!(matches!(conds[1], TerminationCondition::Region { ref label, .. } if label == "goal"));
    }
}
