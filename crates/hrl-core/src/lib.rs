//! Core types for the SMDP hierarchical reinforcement learning agent
//!
//! This crate provides the pieces shared by the agent and the environments:
//! actions, the environment contract, feature encoders, the action-value
//! store and plain-text weight persistence.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod action;
pub mod encoder;
pub mod environment;
pub mod error;
pub mod persistence;
pub mod reward;
pub mod state;
pub mod telemetry;
pub mod value;

// Re-export core traits and types
pub use action::{Action, ActionSet};
pub use encoder::{FeatureEncoder, RectifiedEncoder, TabularEncoder};
pub use environment::{Environment, Observe};
pub use error::{RLError, Result};
pub use persistence::CheckpointPaths;
pub use reward::Reward;
pub use value::{QValues, UpdateOutcome, ValueStore};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Action, ActionSet, Environment, FeatureEncoder, Observe, QValues, Result, Reward,
        ValueStore,
    };
}
