//! Two-level driver: a controller agent choosing goals for a navigation agent
//!
//! The controller sees the environment state and reward and picks a goal.
//! Its latched action vector is appended to the environment state to form
//! the navigation agent's input, and it doubles as the context its own
//! termination detector matches region conditions against. The navigation
//! agent acts on the environment and learns from the controller detector's
//! pseudo-reward, so reaching the chosen goal is what pays off.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use hrl_agent::{AgentInputs, AgentOutput, SmdpAgent, TerminationDetector, TerminationSignals};
use hrl_core::{Environment, FeatureEncoder, Observe, RLError, Result, Reward};

use crate::recorder::{DataRecorder, Reduce};
use crate::simulation::RewardSource;

/// [`Observe`] view of an environment with its context replaced
pub struct WithContext<'a, O: ?Sized> {
    inner: &'a O,
    context: &'a [f64],
}

impl<'a, O: Observe + ?Sized> WithContext<'a, O> {
    /// View `inner` as if its context were `context`
    #[must_use]
    pub fn new(inner: &'a O, context: &'a [f64]) -> Self {
        Self { inner, context }
    }
}

impl<O: Observe + ?Sized> Observe for WithContext<'_, O> {
    fn state_dim(&self) -> usize {
        self.inner.state_dim()
    }

    fn state(&self) -> &[f64] {
        self.inner.state()
    }

    fn reward(&self) -> Reward {
        self.inner.reward()
    }

    fn context(&self) -> Option<&[f64]> {
        Some(self.context)
    }

    fn is_in(&self, label: &str) -> bool {
        self.inner.is_in(label)
    }
}

/// One level of the hierarchy: an agent and the detector ending its actions
pub struct Level<E> {
    /// Termination detector of this level
    pub detector: TerminationDetector,
    /// Agent of this level
    pub agent: SmdpAgent<E>,
}

/// What one level did in a tick
#[derive(Debug, Clone)]
pub struct LevelReport {
    /// Reward fed to the agent
    pub reward: f64,
    /// Detector output
    pub signals: TerminationSignals,
    /// Agent output
    pub output: AgentOutput,
}

/// Everything that happened in one hierarchical tick
#[derive(Debug, Clone)]
pub struct HierarchyReport {
    /// Simulation time of the tick
    pub t: f64,
    /// Controller level
    pub controller: LevelReport,
    /// Navigation level
    pub navigator: LevelReport,
}

struct Running<E> {
    detector: TerminationDetector,
    agent: Arc<RwLock<SmdpAgent<E>>>,
}

/// Runs a controller and a navigation agent against one environment
pub struct HierarchicalSimulation<Env, E> {
    run_id: Uuid,
    env: Env,
    controller: Running<E>,
    navigator: Running<E>,
    nav_reward: RewardSource,
    recorder: Option<DataRecorder>,
    dt: f64,
    ticks: u64,
    goal: Vec<f64>,
    nav_action: Vec<f64>,
    nav_state: Vec<f64>,
}

impl<Env, E> HierarchicalSimulation<Env, E>
where
    Env: Environment,
    E: FeatureEncoder,
{
    /// Wire up both levels. Every detector and agent must share `dt`. The
    /// controller's encoder takes the environment state; the navigator's
    /// takes the environment state followed by the controller's action
    /// vector. `nav_reward` picks between the environment reward and the
    /// controller detector's pseudo-reward for the navigator.
    pub fn new(
        env: Env,
        controller: Level<E>,
        navigator: Level<E>,
        nav_reward: RewardSource,
    ) -> Result<Self> {
        let dt = controller.agent.config().dt;
        for (name, other) in [
            ("controller detector", controller.detector.dt()),
            ("navigator detector", navigator.detector.dt()),
            ("navigator agent", navigator.agent.config().dt),
        ] {
            if (other - dt).abs() > f64::EPSILON {
                return Err(RLError::Config(format!(
                    "{name} dt {other} differs from controller dt {dt}"
                )));
            }
        }

        let goal_dim = controller.agent.actions().vector_dim();
        let checks = [
            (controller.agent.current_store().encoder().input_dim(), env.state_dim()),
            (navigator.agent.current_store().encoder().input_dim(), env.state_dim() + goal_dim),
        ];
        for (expected, actual) in checks {
            if expected != actual {
                return Err(RLError::DimensionMismatch { expected, actual });
            }
        }

        let nav_action = vec![0.0; navigator.agent.actions().vector_dim()];
        Ok(Self {
            run_id: Uuid::new_v4(),
            env,
            controller: Running {
                detector: controller.detector,
                agent: Arc::new(RwLock::new(controller.agent)),
            },
            navigator: Running {
                detector: navigator.detector,
                agent: Arc::new(RwLock::new(navigator.agent)),
            },
            nav_reward,
            recorder: None,
            dt,
            ticks: 0,
            goal: vec![0.0; goal_dim],
            nav_action,
            nav_state: Vec::new(),
        })
    }

    /// Record both levels' rewards and TD errors, and the controller's mean
    /// Q value, into `recorder`
    #[must_use]
    pub fn with_recorder(mut self, mut recorder: DataRecorder) -> Self {
        recorder.add_channel("reward", Reduce::Raw);
        recorder.add_channel("nav_reward", Reduce::Raw);
        recorder.add_channel("ctrl_td_error", Reduce::Raw);
        recorder.add_channel("nav_td_error", Reduce::Raw);
        recorder.add_channel("ctrl_qs", Reduce::Mean);
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
    pub async fn tick(&mut self) -> Result<HierarchyReport> {
        let t = self.time();
        self.env.step(&self.nav_action, t, self.dt).await?;

        let goal_view = WithContext::new(&self.env, &self.goal);
        let ctrl_signals = self.controller.detector.tick(t, &goal_view);
        let nav_signals = self.navigator.detector.tick(t, &self.env);
        let env_reward = self.env.reward().value();

        let ctrl_output = {
            let mut agent = self.controller.agent.write().await;
            agent.step(&AgentInputs::from_termination(self.env.state(), env_reward, &ctrl_signals))?
        };
        self.goal.clone_from(&ctrl_output.action_output);

        self.nav_state.clear();
        self.nav_state.extend_from_slice(self.env.state());
        self.nav_state.extend_from_slice(&self.goal);
        let nav_reward = self.nav_reward.combine(env_reward, ctrl_signals.reward);
        let nav_output = {
            let mut agent = self.navigator.agent.write().await;
            agent.step(&AgentInputs::from_termination(&self.nav_state, nav_reward, &nav_signals))?
        };
        self.nav_action.clone_from(&nav_output.action_output);

        if let Some(recorder) = &mut self.recorder {
            recorder.record("reward", &[env_reward])?;
            recorder.record("nav_reward", &[nav_reward])?;
            recorder.record("ctrl_td_error", &[ctrl_output.td_error])?;
            recorder.record("nav_td_error", &[nav_output.td_error])?;
            recorder.record("ctrl_qs", &ctrl_output.qs)?;
        }

        self.ticks += 1;
        let now = self.time();
        if let Some(recorder) = &mut self.recorder {
            recorder.advance(now);
        }
        Ok(HierarchyReport {
            t,
            controller: LevelReport {
                reward: env_reward,
                signals: ctrl_signals,
                output: ctrl_output,
            },
            navigator: LevelReport {
                reward: nav_reward,
                signals: nav_signals,
                output: nav_output,
            },
        })
    }

    /// Tick until the clock reaches `duration`. Returns the ticks run.
    pub async fn run(&mut self, duration: f64) -> Result<u64> {
        let start = self.ticks;
        info!(
            run_id = %self.run_id,
            from = self.time(),
            to = duration,
            "starting hierarchical run"
        );
        while self.time() < duration {
            self.tick().await?;
        }
        info!(
            run_id = %self.run_id,
            ticks = self.ticks - start,
            goals_ended = self.controller.detector.activations(),
            nav_actions_ended = self.navigator.detector.activations(),
            "hierarchical run finished"
        );
        Ok(self.ticks - start)
    }

    /// Shared handle to the controller agent
    #[must_use]
    pub fn controller(&self) -> Arc<RwLock<SmdpAgent<E>>> {
        Arc::clone(&self.controller.agent)
    }

    /// Shared handle to the navigation agent
    #[must_use]
    pub fn navigator(&self) -> Arc<RwLock<SmdpAgent<E>>> {
        Arc::clone(&self.navigator.agent)
    }

    /// Controller's termination detector
    #[must_use]
    pub fn controller_detector(&self) -> &TerminationDetector {
        &self.controller.detector
    }

    /// Navigator's termination detector
    #[must_use]
    pub fn navigator_detector(&self) -> &TerminationDetector {
        &self.navigator.detector
    }

    /// Goal vector currently output by the controller
    #[must_use]
    pub fn goal(&self) -> &[f64] {
        &self.goal
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
    use crate::context::{ContextGridConfig, ContextGridWorld};
    use approx::assert_relative_eq;
    use hrl_agent::{SmdpConfig, TerminationCondition, TerminationConfig};
    use hrl_core::{Action, ActionSet, TabularEncoder};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const MAP: &str = "\
......
.a   .
.    .
.   b.
......
";

    fn goals() -> ActionSet {
        ActionSet::new(vec![
            Action::new("a", vec![0.0, 1.0]),
            Action::new("b", vec![1.0, 0.0]),
        ])
        .unwrap()
    }

    fn config() -> SmdpConfig {
        SmdpConfig {
            noise_level: 0.0,
            learning_rate: 0.05,
            ..SmdpConfig::default()
        }
    }

    fn levels(
        env: &ContextGridWorld,
        nav_dim: usize,
    ) -> (Level<TabularEncoder>, Level<TabularEncoder>) {
        let dt = config().dt;
        let ctrl_detector = TerminationDetector::new(
            &[
                TerminationCondition::Region {
                    label: "a".into(),
                    context: Some(vec![0.0, 1.0]),
                },
                TerminationCondition::Region {
                    label: "b".into(),
                    context: Some(vec![1.0, 0.0]),
                },
                TerminationCondition::Timer { min: 30.0, max: 30.0 },
            ],
            TerminationConfig {
                reward_val: 1.5,
                ..TerminationConfig::default()
            },
            dt,
            StdRng::seed_from_u64(1),
        )
        .unwrap();
        let nav_detector = TerminationDetector::new(
            &[TerminationCondition::Timer { min: 0.6, max: 0.9 }],
            TerminationConfig::default(),
            dt,
            StdRng::seed_from_u64(2),
        )
        .unwrap();

        let controller = Level {
            detector: ctrl_detector,
            agent: SmdpAgent::new(config(), goals(), TabularEncoder::new(env.state_dim())).unwrap(),
        };
        let navigator = Level {
            detector: nav_detector,
            agent: SmdpAgent::new(config(), ActionSet::cardinal(), TabularEncoder::new(nav_dim))
                .unwrap(),
        };
        (controller, navigator)
    }

    fn env() -> ContextGridWorld {
        let mut env = ContextGridWorld::from_map(MAP, ContextGridConfig::default()).unwrap();
        env.set_goal('b').unwrap();
        env.set_position(1, 1).unwrap();
        env
    }

    #[test]
    fn test_context_view_replaces_only_context() {
        let env = env();
        let goal = [0.0, 1.0];
        let view = WithContext::new(&env, &goal);
        assert_eq!(view.context(), Some(&goal[..]));
        assert_eq!(view.state(), env.state());
        assert!(view.is_in("a"));
        assert_ne!(env.context(), view.context());
    }

    #[test]
    fn test_rejects_wrong_navigator_input() {
        let env = env();
        let (controller, navigator) = levels(&env, env.state_dim());
        let result =
            HierarchicalSimulation::new(env, controller, navigator, RewardSource::Termination);
        assert!(matches!(result, Err(RLError::DimensionMismatch { .. })));
    }

    #[tokio::test]
    async fn test_goal_region_ends_controller_action() {
        let env = env();
        let nav_dim = env.state_dim() + 2;
        let (controller, navigator) = levels(&env, nav_dim);
        let mut sim =
            HierarchicalSimulation::new(env, controller, navigator, RewardSource::Termination)
                .unwrap();

        let mut pseudo_rewarded = false;
        while sim.time() < 1.0 {
            let report = sim.tick().await.unwrap();
            assert_relative_eq!(report.navigator.reward, report.controller.signals.reward);
            assert_eq!(report.navigator.output.action_output.len(), 2);
            pseudo_rewarded |= report.navigator.reward > 1.0;
        }

        // the agent starts in region a, which the controller's first goal asks for
        assert!(sim.controller_detector().activations() >= 1);
        assert!(pseudo_rewarded);

        let nav = sim.navigator();
        let nav = nav.read().await;
        assert_eq!(nav.saved_state().len(), nav_dim);
        assert_relative_eq!(nav.saved_state()[nav_dim - 2..].iter().sum::<f64>(), 1.0);
    }

    #[tokio::test]
    async fn test_records_both_levels() {
        let env = env();
        let nav_dim = env.state_dim() + 2;
        let (controller, navigator) = levels(&env, nav_dim);
        let mut sim =
            HierarchicalSimulation::new(env, controller, navigator, RewardSource::Sum)
                .unwrap()
                .with_recorder(DataRecorder::new(0.5, "hierarchy").unwrap());

        assert_eq!(sim.run(1.0).await.unwrap(), 1000);
        let recorder = sim.recorder().unwrap();
        for channel in ["reward", "nav_reward", "ctrl_td_error", "nav_td_error", "ctrl_qs"] {
            assert_eq!(recorder.entries(channel).len(), 2, "{channel}");
        }
    }
}
