//! Demo: SMDP agent learning to navigate a small grid world

use std::path::PathBuf;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;

use hrl_agent::{
    spawn_autosave, SmdpAgent, SmdpConfig, TerminationCondition, TerminationConfig,
    TerminationDetector,
};
use hrl_core::telemetry::init_tracing;
use hrl_core::{Observe, TabularEncoder};
use hrl_env::{DataRecorder, GridWorld, GridWorldConfig, RewardSource, Simulation};

const MAP: &str = "\
.......
.     .
. ... .
.   _ .
. .   .
.   .x.
.......
";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    // Optional agent config as the first argument
    let config = match std::env::args().nth(1) {
        Some(path) => SmdpConfig::from_json_file(&PathBuf::from(path))?,
        None => SmdpConfig {
            learning_rate: 0.05,
            discount: 0.3,
            ..SmdpConfig::default()
        },
    };

    let env = GridWorld::from_map(MAP, GridWorldConfig::default())?;
    let actions = env.actions().clone();
    let encoder = TabularEncoder::new(env.state_dim());
    let agent = SmdpAgent::new(config.clone(), actions, encoder)?;

    let termination = TerminationConfig {
        reward_val: 1.0,
        ..TerminationConfig::default()
    };
    let detector = TerminationDetector::new(
        &[TerminationCondition::Timer { min: 0.6, max: 0.6 }],
        termination,
        config.dt,
        StdRng::seed_from_u64(config.seed + 1),
    )?;

    let mut sim = Simulation::new(env, detector, agent, RewardSource::Environment)?
        .with_recorder(DataRecorder::new(10.0, "# gridworld navigation")?);

    let out_dir = std::env::temp_dir().join("hrl_gridworld");
    let autosave = spawn_autosave(sim.agent(), out_dir.join("nav"), Duration::from_secs(5));

    sim.run(120.0).await?;
    let snapshots = autosave.stop().await?;

    let latencies = sim.env().latencies();
    println!("Trials completed: {}", latencies.len());
    if !latencies.is_empty() {
        let first: Vec<_> = latencies.iter().take(5).collect();
        let last: Vec<_> = latencies.iter().rev().take(5).collect();
        println!("First latencies: {first:?}");
        println!("Last latencies:  {last:?}");
    }
    println!("Autosave snapshots: {snapshots}");

    if let Some(recorder) = sim.recorder() {
        recorder.write(&out_dir.join("data.txt"))?;
        println!("Recorded data written to {}", out_dir.join("data.txt").display());
    }
    sim.agent().read().await.save_checkpoint(out_dir.join("final"))?;

    Ok(())
}
