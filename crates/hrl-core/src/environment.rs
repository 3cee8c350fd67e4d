//! Environment collaborator contract

use async_trait::async_trait;

use crate::{Reward, Result};

/// Read-only view of an environment.
///
/// Everything the termination detector needs to look at lives here, so it
/// can be driven from any state source without the async stepping half.
pub trait Observe: Send + Sync {
    /// Dimension of the state vector
    fn state_dim(&self) -> usize;

    /// Current state vector
    fn state(&self) -> &[f64];

    /// Reward for the current tick
    fn reward(&self) -> Reward;

    /// Optional context vector (e.g. the goal signalled to a sub-agent)
    fn context(&self) -> Option<&[f64]> {
        None
    }

    /// Whether the current state lies inside the region called `label`
    fn is_in(&self, label: &str) -> bool;
}

/// An environment the SMDP agent interacts with.
///
/// The simulation driver calls [`Environment::step`] once per tick with the
/// action vector currently output by the agent, then reads the state, reward
/// and context back through the [`Observe`] accessors. Region queries are
/// answered against the current state.
#[async_trait]
pub trait Environment: Observe {
    /// Reset the environment to a fresh trial
    async fn reset(&mut self) -> Result<()>;

    /// Advance the environment by `dt`, ending at simulation time `t`
    async fn step(&mut self, action: &[f64], t: f64, dt: f64) -> Result<()>;
}
