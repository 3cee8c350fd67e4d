//! Discrete-time driver running an environment, a termination detector and
//! an SMDP agent in lockstep.
//!
//! Each tick advances the environment with the agent's last action, lets the
//! detector look at the result, then steps the agent with the detector's
//! pulses. The agent sits behind an `Arc<RwLock<_>>` so an autosave task can
//! snapshot it between ticks.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use hrl_agent::{AgentInputs, AgentOutput, SmdpAgent, TerminationDetector, TerminationSignals};
use hrl_core::{Environment, FeatureEncoder, RLError, Result};

use crate::recorder::{DataRecorder, Reduce};

/// Which reward the agent learns from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardSource {
    /// The environment's reward
    #[default]
    Environment,
    /// The termination detector's pseudo-reward
    Termination,
    /// Both added together
    Sum,
}

impl RewardSource {
    /// Combine the two reward streams
    #[must_use]
    pub fn combine(self, environment: f64, termination: f64) -> f64 {
        match self {
            Self::Environment => environment,
            Self::Termination => termination,
            Self::Sum => environment + termination,
        }
    }
}

/// Everything that happened in one tick
#[derive(Debug, Clone)]
pub struct TickReport {
    /// Simulation time of the tick
    pub t: f64,
    /// Reward fed to the agent
    pub reward: f64,
    /// Detector output
    pub signals: TerminationSignals,
    /// Agent output
    pub output: AgentOutput,
}

/// Runs one agent against one environment
pub struct Simulation<Env, E> {
    run_id: Uuid,
    env: Env,
    detector: TerminationDetector,
    agent: Arc<RwLock<SmdpAgent<E>>>,
    reward_source: RewardSource,
    recorder: Option<DataRecorder>,
    dt: f64,
    ticks: u64,
    action: Vec<f64>,
}

impl<Env, E> Simulation<Env, E>
where
    Env: Environment,
    E: FeatureEncoder,
{
    /// Wire up a simulation. The detector and the agent must share `dt`,
    /// and the agent's encoder must accept the environment's state.
    pub fn new(
        env: Env,
        detector: TerminationDetector,
        agent: SmdpAgent<E>,
        reward_source: RewardSource,
    ) -> Result<Self> {
        let dt = agent.config().dt;
        if (detector.dt() - dt).abs() > f64::EPSILON {
            return Err(RLError::Config(format!(
                "detector dt {} differs from agent dt {dt}",
                detector.dt()
            )));
        }
        let expected = agent.current_store().encoder().input_dim();
        if env.state_dim() != expected {
            return Err(RLError::DimensionMismatch {
                expected,
                actual: env.state_dim(),
            });
        }

        let action = vec![0.0; agent.actions().vector_dim()];
        Ok(Self {
            run_id: Uuid::new_v4(),
            env,
            detector,
            agent: Arc::new(RwLock::new(agent)),
            reward_source,
            recorder: None,
            dt,
            ticks: 0,
            action,
        })
    }

    /// Record reward, TD error, pulses and mean Q value into `recorder`
    #[must_use]
    pub fn with_recorder(mut self, mut recorder: DataRecorder) -> Self {
        recorder.add_channel("reward", Reduce::Raw);
        recorder.add_channel("td_error", Reduce::Raw);
        recorder.add_channel("learn", Reduce::Raw);
        recorder.add_channel("reset", Reduce::Raw);
        recorder.add_channel("qs", Reduce::Mean);
        self.recorder = Some(recorder);
        self
    }

    /// Current simulation time
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn time(&self) -> f64 {
        self.ticks as f64 * self.dt
    }

    /// Advance one tick
    pub async fn tick(&mut self) -> Result<TickReport> {
        let t = self.time();
        self.env.step(&self.action, t, self.dt).await?;

        let signals = self.detector.tick(t, &self.env);
        let reward = self.reward_source.combine(self.env.reward().value(), signals.reward);

        let output = {
            let mut agent = self.agent.write().await;
            agent.step(&AgentInputs::from_termination(self.env.state(), reward, &signals))?
        };
        self.action.clone_from(&output.action_output);

        if let Some(recorder) = &mut self.recorder {
            recorder.record("reward", &[reward])?;
            recorder.record("td_error", &[output.td_error])?;
            recorder.record("learn", &[signals.learn])?;
            recorder.record("reset", &[signals.reset])?;
            recorder.record("qs", &output.qs)?;
        }

        self.ticks += 1;
        let now = self.time();
        if let Some(recorder) = &mut self.recorder {
            recorder.advance(now);
        }
        Ok(TickReport {
            t,
            reward,
            signals,
            output,
        })
    }

    /// Tick until the clock reaches `duration`. Returns the ticks run.
    pub async fn run(&mut self, duration: f64) -> Result<u64> {
        let start = self.ticks;
        info!(run_id = %self.run_id, from = self.time(), to = duration, "starting run");
        while self.time() < duration {
            self.tick().await?;
        }
        info!(
            run_id = %self.run_id,
            ticks = self.ticks - start,
            activations = self.detector.activations(),
            "run finished"
        );
        Ok(self.ticks - start)
    }

    /// Shared handle to the agent, e.g. for autosave
    #[must_use]
    pub fn agent(&self) -> Arc<RwLock<SmdpAgent<E>>> {
        Arc::clone(&self.agent)
    }

    /// Environment
    #[must_use]
    pub fn env(&self) -> &Env {
        &self.env
    }

    /// Mutable environment
    pub fn env_mut(&mut self) -> &mut Env {
        &mut self.env
    }

    /// Termination detector
    #[must_use]
    pub fn detector(&self) -> &TerminationDetector {
        &self.detector
    }

    /// Recorder, if one was attached
    #[must_use]
    pub fn recorder(&self) -> Option<&DataRecorder> {
        self.recorder.as_ref()
    }

    /// Identifier of this run, used in log lines
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gridworld::{GridWorld, GridWorldConfig, StateEncoding};
    use approx::assert_relative_eq;
    use hrl_agent::{SmdpConfig, TerminationCondition, TerminationConfig};
    use hrl_core::{ActionSet, Observe, TabularEncoder};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const MAP: &str = "\
......
.    .
. .  .
.   x.
......
";

    fn simulation(dt: f64) -> Result<Simulation<GridWorld, TabularEncoder>> {
        let env = GridWorld::from_map(
            MAP,
            GridWorldConfig {
                encoding: StateEncoding::OneHot,
                seed: 3,
                ..GridWorldConfig::default()
            },
        )?;
        let config = SmdpConfig {
            learning_rate: 0.1,
            ..SmdpConfig::default()
        };
        let encoder = TabularEncoder::new(env.state_dim());
        let agent = SmdpAgent::new(config, ActionSet::cardinal(), encoder)?;
        let detector = TerminationDetector::new(
            &[TerminationCondition::Timer { min: 0.6, max: 0.6 }],
            TerminationConfig::default(),
            dt,
            StdRng::seed_from_u64(4),
        )?;
        Simulation::new(env, detector, agent, RewardSource::Sum)
    }

    #[test]
    fn test_reward_sources() {
        assert_eq!(RewardSource::Environment.combine(1.0, -0.05), 1.0);
        assert_eq!(RewardSource::Termination.combine(1.0, -0.05), -0.05);
        assert_relative_eq!(RewardSource::Sum.combine(1.0, -0.05), 0.95);
    }

    #[test]
    fn test_rejects_mismatched_dt() {
        assert!(matches!(simulation(0.01), Err(RLError::Config(_))));
    }

    #[tokio::test]
    async fn test_run_learns_and_records() {
        let sim = simulation(0.001).unwrap();
        let mut sim = sim.with_recorder(DataRecorder::new(1.0, "gridworld").unwrap());

        let ticks = sim.run(3.0).await.unwrap();
        assert_eq!(ticks, 3000);
        assert!(sim.time() >= 3.0);
        assert!(sim.detector().activations() >= 4);

        let agent = sim.agent();
        let agent = agent.read().await;
        let changed = agent
            .old_store()
            .decoders()
            .iter()
            .any(|w| (*w - 0.2).abs() > 1e-12);
        assert!(changed);
        drop(agent);

        let recorder = sim.recorder().unwrap();
        assert_eq!(recorder.entries("reward").len(), 3);
        assert_eq!(recorder.entries("qs").len(), 3);
    }

    #[tokio::test]
    async fn test_action_reaches_environment() {
        let mut sim = simulation(0.001).unwrap();
        for _ in 0..199 {
            sim.tick().await.unwrap();
        }
        let last = sim.tick().await.unwrap().output.action_output;
        assert_eq!(last.len(), 2);
        assert_relative_eq!(last.iter().map(|v| v * v).sum::<f64>(), 1.0);
    }
}
