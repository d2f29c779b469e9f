//! Интеграционные тесты сессии: сэмплирование гейтов и режим валидации.

use rand::rngs::StdRng;
use rand::SeedableRng;
use stochastic_depth::config::StochasticDepthConfig;
use stochastic_depth::data::SyntheticDataset;
use stochastic_depth::gating::{DeathMode, GateTable};
use stochastic_depth::models::StochasticResNet;
use stochastic_depth::training::{Phase, Session, TrainingHook};
use std::cell::Cell;
use std::rc::Rc;

fn tiny_config() -> StochasticDepthConfig {
    StochasticDepthConfig {
        blocks_per_stage: 1,
        batch_size: 2,
        num_classes: 3,
        image_size: 4,
        ..Default::default()
    }
}

fn session(config: &StochasticDepthConfig) -> (Session, SyntheticDataset) {
    let model = StochasticResNet::build(config).unwrap();
    let mut rng = StdRng::seed_from_u64(7);
    let params = model.init_parameters(&mut rng);
    let data = SyntheticDataset::generate(
        config.batch_size,
        config.image_channels,
        config.image_size,
        config.num_classes,
        &mut rng,
    );
    (Session::new(model, params), data)
}

#[test]
fn evaluate_runs_every_block_whatever_the_table_holds() {
    let (mut session, data) = session(&tiny_config());
    let handles: Vec<_> = session.gates().handles().collect();
    for h in handles {
        session.gates_mut().set_gate(h, false);
    }
    let bypassed = session.forward(data.images(), Phase::Eval).unwrap();

    let report = session.evaluate(data.images(), data.labels()).unwrap();
    assert_eq!(session.gates().closed_count(), 0);

    let full = session.forward(data.images(), Phase::Eval).unwrap();
    assert_eq!(report.probabilities, full);
    assert_ne!(bypassed, full);
}

#[test]
fn zero_death_rate_never_bypasses() {
    let config = StochasticDepthConfig { death_rate: 0.0, ..tiny_config() };
    let (mut session, data) = session(&config);
    for _ in 0..5 {
        let report = session.train_step(data.images(), data.labels()).unwrap();
        assert_eq!(report.closed, 0);
        assert!(report.loss.is_finite());
    }
    assert_eq!(session.steps(), 5);
}

#[test]
fn high_death_rate_bypasses_some_blocks() {
    let config = StochasticDepthConfig { death_mode: DeathMode::Uniform, death_rate: 0.9, ..tiny_config() };
    let (mut session, data) = session(&config);
    let closed: usize = (0..5)
        .map(|_| session.train_step(data.images(), data.labels()).unwrap().closed)
        .sum();
    assert!(closed > 0);
    session.end_epoch();
    assert_eq!(session.gates().closed_count(), 0);
    assert_eq!(session.epochs(), 1);
}

#[test]
fn same_seed_same_gate_patterns() {
    let config = StochasticDepthConfig { death_mode: DeathMode::Uniform, death_rate: 0.5, ..tiny_config() };
    let (mut a, data) = session(&config);
    let (mut b, _) = session(&config);
    for _ in 0..4 {
        let ra = a.train_step(data.images(), data.labels()).unwrap();
        let rb = b.train_step(data.images(), data.labels()).unwrap();
        assert_eq!(ra, rb);
        assert_eq!(a.gates().entries(), b.gates().entries());
    }
}

struct CountingHook {
    steps: Rc<Cell<usize>>,
    epochs: Rc<Cell<usize>>,
}

impl TrainingHook for CountingHook {
    fn on_step_begin(&mut self, _gates: &mut GateTable) {
        self.steps.set(self.steps.get() + 1);
    }

    fn on_epoch_end(&mut self, _gates: &mut GateTable) {
        self.epochs.set(self.epochs.get() + 1);
    }
}

#[test]
fn hooks_fire_at_step_and_epoch_boundaries() {
    let (mut session, data) = session(&tiny_config());
    let steps = Rc::new(Cell::new(0));
    let epochs = Rc::new(Cell::new(0));
    session.add_hook(Box::new(CountingHook { steps: steps.clone(), epochs: epochs.clone() }));

    session.train_step(data.images(), data.labels()).unwrap();
    session.train_step(data.images(), data.labels()).unwrap();
    session.end_epoch();
    session.evaluate(data.images(), data.labels()).unwrap();

    assert_eq!(steps.get(), 2);
    assert_eq!(epochs.get(), 1);
}
