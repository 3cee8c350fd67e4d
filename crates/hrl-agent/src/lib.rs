//! SMDP temporal-difference agent for hierarchical reinforcement learning
//!
//! This crate provides the decision-making unit of the hierarchy:
//! - Action selection over noisy Q values with a latched saved choice
//! - Termination detection that schedules learn and reset pulses
//! - Continuous-time SMDP TD error and the error gate feeding the value stores
//! - The agent composing them, plus periodic weight autosave

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod autosave;
pub mod config;
pub mod noise;
pub mod selector;
pub mod smdp;
pub mod td_error;
pub mod termination;

// Re-export the agent
pub use smdp::{AgentInputs, AgentOutput, AgentSnapshot, SmdpAgent};

// Re-export components
pub use autosave::{spawn_autosave, AutosaveHandle};
pub use config::{SmdpConfig, TdStrategyKind, TerminationConfig};
pub use noise::NoiseSource;
pub use selector::ActionSelector;
pub use td_error::{
    ContinuousTdError, ErrorGate, GatedError, MultiplicativeTdError, TdErrorStrategy, TdInput,
};
pub use termination::{Phase, TerminationCondition, TerminationDetector, TerminationSignals};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        AgentInputs, AgentOutput, SmdpAgent, SmdpConfig, TerminationCondition,
        TerminationConfig, TerminationDetector,
    };
    pub use hrl_core::prelude::*;
}
