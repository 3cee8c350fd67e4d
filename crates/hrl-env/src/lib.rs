//! Environments and simulation driver for the SMDP agent
//!
//! This crate provides:
//! - A text-map grid navigation environment and a context-cued variant
//! - The simulation loop ticking environment, termination detector and agent
//! - A two-level loop where a controller agent sets goals for a navigator
//! - A periodic data recorder for run statistics

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod context;
pub mod gridworld;
pub mod hierarchy;
pub mod recorder;
pub mod simulation;

// Re-export environments
pub use context::{ContextGridConfig, ContextGridWorld};
pub use gridworld::{GridWorld, GridWorldConfig, StateEncoding};

// Re-export the driver and recording
pub use hierarchy::{HierarchicalSimulation, HierarchyReport, Level, LevelReport, WithContext};
pub use recorder::{DataRecorder, Entry, Reduce};
pub use simulation::{RewardSource, Simulation, TickReport};

// Re-export core types
pub use hrl_core::{Environment, Observe, Reward};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        ContextGridConfig, ContextGridWorld, DataRecorder, GridWorld, GridWorldConfig,
        HierarchicalSimulation, Level, RewardSource, Simulation,
    };
    pub use hrl_agent::prelude::*;
}
