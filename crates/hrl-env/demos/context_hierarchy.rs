//! Demo: a controller agent picks which goal a navigation agent should reach

use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;

use hrl_agent::{
    spawn_autosave, SmdpAgent, SmdpConfig, TerminationCondition, TerminationConfig,
    TerminationDetector,
};
use hrl_core::telemetry::init_tracing;
use hrl_core::{Action, ActionSet, Observe, TabularEncoder};
use hrl_env::{
    ContextGridConfig, ContextGridWorld, DataRecorder, HierarchicalSimulation, Level,
    RewardSource,
};

const MAP: &str = "\
.......
.a    .
. ..  .
.     .
.  .. .
.    b.
.......
";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = SmdpConfig {
        learning_rate: 0.05,
        ..SmdpConfig::default()
    };
    let env = ContextGridWorld::from_map(MAP, ContextGridConfig::default())?;

    // "go to a" / "go to b"
    let goals = ActionSet::new(vec![
        Action::new("a", vec![0.0, 1.0]),
        Action::new("b", vec![1.0, 0.0]),
    ])?;
    let goal_dim = goals.vector_dim();

    let controller = Level {
        detector: TerminationDetector::new(
            &[
                TerminationCondition::Region {
                    label: "a".into(),
                    context: Some(vec![0.0, 1.0]),
                },
                TerminationCondition::Region {
                    label: "b".into(),
                    context: Some(vec![1.0, 0.0]),
                },
                // keeps the controller from sticking with one goal forever
                TerminationCondition::Timer { min: 30.0, max: 30.0 },
            ],
            TerminationConfig {
                reward_val: 1.5,
                ..TerminationConfig::default()
            },
            config.dt,
            StdRng::seed_from_u64(config.seed + 1),
        )?,
        agent: SmdpAgent::new(
            SmdpConfig {
                seed: config.seed + 2,
                ..config.clone()
            },
            goals,
            TabularEncoder::new(env.state_dim()),
        )?,
    };
    let navigator = Level {
        detector: TerminationDetector::new(
            &[TerminationCondition::Timer { min: 0.6, max: 0.9 }],
            TerminationConfig::default(),
            config.dt,
            StdRng::seed_from_u64(config.seed + 3),
        )?,
        agent: SmdpAgent::new(
            config.clone(),
            env.actions().clone(),
            TabularEncoder::new(env.state_dim() + goal_dim),
        )?,
    };

    let mut sim =
        HierarchicalSimulation::new(env, controller, navigator, RewardSource::Termination)?
            .with_recorder(DataRecorder::new(10.0, "# context hierarchy")?);

    let out_dir = std::env::temp_dir().join("hrl_context");
    let ctrl_save = spawn_autosave(sim.controller(), out_dir.join("ctrl"), Duration::from_secs(5));
    let nav_save = spawn_autosave(sim.navigator(), out_dir.join("nav"), Duration::from_secs(5));

    sim.run(180.0).await?;
    let snapshots = ctrl_save.stop().await? + nav_save.stop().await?;

    println!("Goals reached: {}", sim.env().goals_reached());
    println!("Controller terminations: {}", sim.controller_detector().activations());
    println!("Navigator terminations: {}", sim.navigator_detector().activations());
    println!("Autosave snapshots: {snapshots}");

    if let Some(recorder) = sim.recorder() {
        recorder.write(&out_dir.join("data.txt"))?;
    }
    Ok(())
}
