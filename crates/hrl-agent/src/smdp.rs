//! The SMDP agent: one decision-making unit of the hierarchy.
//!
//! Each tick the agent evaluates the current state, picks an action over
//! noisy Q values, and (when the termination detector says so) latches the
//! state and action, then learns from the continuous TD error between the
//! value of where it ended up and the value stored when the action began.

use std::path::Path;

use chrono::{DateTime, Utc};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, info};

use hrl_core::persistence::{load_matrix, save_matrix};
use hrl_core::{ActionSet, CheckpointPaths, FeatureEncoder, QValues, RLError, Result, ValueStore};

use crate::config::SmdpConfig;
use crate::noise::NoiseSource;
use crate::selector::ActionSelector;
use crate::td_error::{strategy_for, ErrorGate, TdErrorStrategy, TdInput};
use crate::termination::TerminationSignals;

/// Per-tick inputs of [`SmdpAgent::step`]
#[derive(Debug, Clone, Copy)]
pub struct AgentInputs<'a> {
    /// Environment state
    pub state: &'a [f64],
    /// Reward for this tick
    pub reward: f64,
    /// Clears the TD accumulators while active
    pub reset: f64,
    /// Opens the error gate while active
    pub learn: f64,
    /// Copies `state` into the saved state while active
    pub save_state: f64,
    /// Latches the current action while active
    pub save_action: f64,
}

impl<'a> AgentInputs<'a> {
    /// Inputs driven by a termination detector: its reset pulse resets the
    /// accumulators and latches state and action, its learn pulse gates learning.
    #[must_use]
    pub fn from_termination(state: &'a [f64], reward: f64, signals: &TerminationSignals) -> Self {
        Self {
            state,
            reward,
            reset: signals.reset,
            learn: signals.learn,
            save_state: signals.reset,
            save_action: signals.reset,
        }
    }
}

/// What the agent produced this tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentOutput {
    /// Vector of the latched action; this is what the environment acts on
    pub action_output: Vec<f64>,
    /// Index of the action chosen this tick
    pub selected: usize,
    /// Index of the latched action
    pub saved: usize,
    /// Q values of the current state
    pub qs: QValues,
    /// Q values of the saved state
    pub old_qs: QValues,
    /// Error vector applied to the value stores
    pub error: Vec<f64>,
    /// Scalar TD error
    pub td_error: f64,
}

/// Weights captured at one instant, ready to be written out
#[derive(Debug, Clone)]
pub struct AgentSnapshot {
    /// Decoders of the current-state store
    pub decoders: Array2<f64>,
    /// Decoders of the saved-state store
    pub old_decoders: Array2<f64>,
    /// Shared encoder matrix
    pub encoders: Array2<f64>,
    /// Ticks the agent had run when the snapshot was taken
    pub steps: u64,
    /// Wall-clock time of the snapshot
    pub taken_at: DateTime<Utc>,
}

impl AgentSnapshot {
    /// Write all three matrices under `paths`
    pub fn write(&self, paths: &CheckpointPaths) -> Result<()> {
        save_matrix(&paths.state_decoders, &self.decoders)?;
        save_matrix(&paths.old_state_decoders, &self.old_decoders)?;
        save_matrix(&paths.state_encoders, &self.encoders)?;
        Ok(())
    }
}

/// SMDP temporal-difference agent
#[derive(Debug)]
pub struct SmdpAgent<E> {
    config: SmdpConfig,
    current: ValueStore<E>,
    old: ValueStore<E>,
    selector: ActionSelector,
    td: Box<dyn TdErrorStrategy>,
    gate: ErrorGate,
    saved_state: Vec<f64>,
    last_qs: QValues,
    last_old_qs: QValues,
    time: f64,
    steps: u64,
}

impl<E: FeatureEncoder> SmdpAgent<E> {
    /// Build an agent over `actions`. Both value stores share `encoder`.
    pub fn new(config: SmdpConfig, actions: ActionSet, encoder: E) -> Result<Self> {
        config.validate()?;
        let init_qs = config.init_qs_for(actions.len())?;

        let noise = NoiseSource::new(
            actions.len(),
            config.noise_frequency,
            config.noise_level,
            StdRng::seed_from_u64(config.seed),
        )?;

        let state_dim = encoder.input_dim();
        let mut current = ValueStore::new(encoder.clone(), &init_qs)?;
        let mut old = ValueStore::new(encoder, &init_qs)?;
        current.set_learning(config.learning);
        old.set_learning(config.learning);

        let gate = ErrorGate {
            q_radius: config.q_radius,
            cap: config.error_cap,
            positive_bias: config.positive_bias,
            learn_threshold: config.signal_threshold,
        };

        info!(
            actions = actions.len(),
            state_dim,
            strategy = ?config.td_strategy,
            "created SMDP agent"
        );

        Ok(Self {
            td: strategy_for(config.td_strategy, config.discount, config.dt),
            selector: ActionSelector::new(actions, noise, config.signal_threshold),
            saved_state: vec![0.0; state_dim],
            last_qs: QValues(init_qs.clone()),
            last_old_qs: QValues(init_qs),
            current,
            old,
            gate,
            config,
            time: 0.0,
            steps: 0,
        })
    }

    /// Build an agent and restore its weights from the checkpoint at `prefix`
    pub fn from_checkpoint(
        config: SmdpConfig,
        actions: ActionSet,
        encoder: E,
        prefix: impl AsRef<Path>,
    ) -> Result<Self> {
        let mut agent = Self::new(config, actions, encoder)?;
        agent.load_checkpoint(prefix)?;
        Ok(agent)
    }

    /// Advance one tick.
    ///
    /// A state whose activity is unavailable (non-finite values) does not
    /// fail the tick: the last valid Q values are held and the updates of
    /// this tick are counted as skipped. Only a state of the wrong length is
    /// an error.
    pub fn step(&mut self, inputs: &AgentInputs<'_>) -> Result<AgentOutput> {
        let threshold = self.config.signal_threshold;
        let learning_tick = inputs.learn >= threshold;

        let state_available = match self.current.try_evaluate(inputs.state)? {
            Some(qs) => {
                self.last_qs = qs;
                true
            }
            None => {
                debug!(step = self.steps, "state activity unavailable, holding Q values");
                false
            }
        };
        let qs = self.last_qs.clone();

        if state_available && inputs.save_state > threshold {
            self.saved_state.clear();
            self.saved_state.extend_from_slice(inputs.state);
        }
        let old_available = match self.old.try_evaluate(&self.saved_state)? {
            Some(old_qs) => {
                self.last_old_qs = old_qs;
                true
            }
            None => false,
        };
        let old_qs = self.last_old_qs.clone();

        let selected = self.selector.choose(&qs, self.time)?;
        self.selector.save(inputs.save_action);
        let saved = self.selector.saved();

        let td_error = self.td.step(TdInput {
            reward: inputs.reward,
            curr_q: qs.get(selected),
            store_q: old_qs.get(saved),
            reset: inputs.reset,
        });

        let error = self
            .gate
            .gate(td_error, &self.selector.saved_one_hot(), &old_qs, inputs.learn)
            .combined(self.gate.cap);
        let lr = self.config.learning_rate;

        if learning_tick {
            if old_available {
                self.old.update(&self.saved_state, &error, lr);
            } else {
                self.old.skip_update();
            }
        }

        if state_available {
            let mut current_error = if learning_tick {
                error.clone()
            } else {
                vec![0.0; error.len()]
            };
            if self.config.dual_training && self.states_close(inputs.state) {
                let cap = self.gate.cap;
                for ((e, o), c) in current_error.iter_mut().zip(old_qs.iter()).zip(qs.iter()) {
                    *e = (*e + 2.0 * (o - c)).clamp(-cap, cap);
                }
            }
            if current_error.iter().any(|e| *e != 0.0) {
                self.current.update(inputs.state, &current_error, lr);
            }
        } else if learning_tick {
            self.current.skip_update();
        }

        self.time += self.config.dt;
        self.steps += 1;
        debug!(step = self.steps, selected, saved, td_error, "agent tick");

        Ok(AgentOutput {
            action_output: self.selector.saved_action_vector().to_vec(),
            selected,
            saved,
            qs,
            old_qs,
            error,
            td_error,
        })
    }

    fn states_close(&self, state: &[f64]) -> bool {
        state
            .iter()
            .zip(&self.saved_state)
            .all(|(a, b)| (a - b).abs() < self.config.statediff_threshold)
    }

    /// Q values of `state` under the current-state store
    pub fn q_values(&self, state: &[f64]) -> Result<QValues> {
        self.current.evaluate(state)
    }

    /// Turn learning on or off for both stores
    pub fn set_learning(&mut self, learning: bool) {
        self.config.learning = learning;
        self.current.set_learning(learning);
        self.old.set_learning(learning);
    }

    /// Capture the weights
    #[must_use]
    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            decoders: self.current.decoders().clone(),
            old_decoders: self.old.decoders().clone(),
            encoders: self.current.encoder().encoders(),
            steps: self.steps,
            taken_at: Utc::now(),
        }
    }

    /// Write decoders and encoders to the files at `prefix`
    pub fn save_checkpoint(&self, prefix: impl AsRef<Path>) -> Result<()> {
        let paths = CheckpointPaths::new(prefix);
        self.snapshot().write(&paths)?;
        info!(path = %paths.state_decoders.display(), steps = self.steps, "saved checkpoint");
        Ok(())
    }

    /// Restore decoders and encoders from the files at `prefix`.
    /// Shapes must match this agent exactly. Nothing is replaced unless all
    /// three files load.
    pub fn load_checkpoint(&mut self, prefix: impl AsRef<Path>) -> Result<()> {
        let paths = CheckpointPaths::new(prefix);
        let decoders = load_matrix(&paths.state_decoders, self.current.decoders().dim())?;
        let old_decoders = load_matrix(&paths.old_state_decoders, self.old.decoders().dim())?;
        let encoders =
            load_matrix(&paths.state_encoders, self.current.encoder().encoders().dim())?;

        let mut current_encoder = self.current.encoder().clone();
        let mut old_encoder = self.old.encoder().clone();
        current_encoder.set_encoders(encoders.clone())?;
        old_encoder.set_encoders(encoders)?;

        self.current.set_decoders(decoders)?;
        self.old.set_decoders(old_decoders)?;
        *self.current.encoder_mut() = current_encoder;
        *self.old.encoder_mut() = old_encoder;

        info!(path = %paths.state_decoders.display(), "loaded checkpoint");
        Ok(())
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &SmdpConfig {
        &self.config
    }

    /// Action set
    #[must_use]
    pub fn actions(&self) -> &ActionSet {
        self.selector.actions()
    }

    /// Action selector
    #[must_use]
    pub fn selector(&self) -> &ActionSelector {
        &self.selector
    }

    /// Current-state value store
    #[must_use]
    pub fn current_store(&self) -> &ValueStore<E> {
        &self.current
    }

    /// Saved-state value store
    #[must_use]
    pub fn old_store(&self) -> &ValueStore<E> {
        &self.old
    }

    /// TD error strategy
    #[must_use]
    pub fn td(&self) -> &dyn TdErrorStrategy {
        self.td.as_ref()
    }

    /// State latched by the last save pulse
    #[must_use]
    pub fn saved_state(&self) -> &[f64] {
        &self.saved_state
    }

    /// Ticks run so far
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Replace the saved state; used when restoring a paused run
    pub fn set_saved_state(&mut self, state: &[f64]) -> Result<()> {
        if state.len() != self.saved_state.len() {
            return Err(RLError::DimensionMismatch {
                expected: self.saved_state.len(),
                actual: state.len(),
            });
        }
        self.saved_state.copy_from_slice(state);
        Ok(())
    }
}
