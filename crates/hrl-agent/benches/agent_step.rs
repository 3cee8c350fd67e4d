use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;

use hrl_agent::{
    AgentInputs, SmdpAgent, SmdpConfig, TerminationCondition, TerminationConfig,
    TerminationDetector,
};
use hrl_core::{ActionSet, Observe, RectifiedEncoder, Reward};

struct Point(Vec<f64>);

impl Observe for Point {
    fn state_dim(&self) -> usize {
        self.0.len()
    }

    fn state(&self) -> &[f64] {
        &self.0
    }

    fn reward(&self) -> Reward {
        Reward::default()
    }

    fn is_in(&self, _label: &str) -> bool {
        false
    }
}

fn bench_agent_step(c: &mut Criterion) {
    let config = SmdpConfig::default();
    let mut rng = StdRng::seed_from_u64(7);
    let encoder = RectifiedEncoder::new(500, 2, 1.0, config.state_threshold, &mut rng).unwrap();
    let mut agent = SmdpAgent::new(config, ActionSet::cardinal(), encoder).unwrap();
    let mut detector = TerminationDetector::new(
        &[TerminationCondition::Timer { min: 0.5, max: 1.0 }],
        TerminationConfig::default(),
        0.001,
        StdRng::seed_from_u64(8),
    )
    .unwrap();

    let mut t = 0.0;
    c.bench_function("agent_step_500_units", |b| {
        b.iter(|| {
            t += 0.001;
            let env = Point(vec![t.sin() * 0.5, t.cos() * 0.5]);
            let signals = detector.tick(t, &env);
            let inputs = AgentInputs::from_termination(env.state(), signals.reward, &signals);
            black_box(agent.step(&inputs).unwrap());
        });
    });
}

criterion_group!(benches, bench_agent_step);
criterion_main!(benches);
