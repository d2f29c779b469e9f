//! Интеграционные тесты построения сети: топология, гейты, расписание.

use stochastic_depth::asg::NodeType;
use stochastic_depth::config::StochasticDepthConfig;
use stochastic_depth::error::{BuildError, ConfigError};
use stochastic_depth::gating::DeathMode;
use stochastic_depth::models::stochastic_resnet::topology;
use stochastic_depth::models::StochasticResNet;

fn small_config() -> StochasticDepthConfig {
    StochasticDepthConfig { blocks_per_stage: 2, batch_size: 2, image_size: 8, ..Default::default() }
}

fn pad_nodes(model: &StochasticResNet) -> usize {
    model.graph().count_nodes(|t| matches!(t, NodeType::PadChannels { .. }))
}

fn avg_pool_nodes(model: &StochasticResNet) -> usize {
    model.graph().count_nodes(|t| matches!(t, NodeType::AvgPool2d { .. }))
}

#[test]
fn gate_table_has_one_entry_per_block() {
    let model = StochasticResNet::build(&small_config()).unwrap();
    assert_eq!(model.gates.len(), 6);
    assert_eq!(model.blocks().len(), 6);
    for (block, handle) in model.blocks().iter().zip(model.gates.handles()) {
        assert_eq!(block.handle, handle);
        assert_eq!(block.spec.ordinal, handle.index());
    }
    assert_eq!(model.gates.open_count(), 6);
}

#[test]
fn transitions_sit_at_n_and_2n() {
    let model = StochasticResNet::build(&small_config()).unwrap();
    let strided: Vec<usize> = model
        .blocks()
        .iter()
        .filter(|b| b.spec.downsamples())
        .map(|b| b.spec.ordinal)
        .collect();
    assert_eq!(strided, vec![2, 4]);
    assert_eq!(avg_pool_nodes(&model), 2);
    // Only the 16 -> 32 transition grows channels.
    assert_eq!(pad_nodes(&model), 1);
}

#[test]
fn default_network_has_54_blocks() {
    let config = StochasticDepthConfig::default();
    let model = StochasticResNet::build(&config).unwrap();
    assert_eq!(model.gates.len(), 54);
    assert_eq!(pad_nodes(&model), 1);
    assert_eq!(avg_pool_nodes(&model), 2);
}

#[test]
fn equal_stage_widths_need_no_padding() {
    let config = StochasticDepthConfig { stage_channels: [16, 16, 16], ..small_config() };
    let model = StochasticResNet::build(&config).unwrap();
    assert_eq!(pad_nodes(&model), 0);
    assert_eq!(avg_pool_nodes(&model), 2);
}

#[test]
fn linear_decay_rates_grow_with_depth() {
    let model = StochasticResNet::build(&small_config()).unwrap();
    let rates: Vec<f32> = model.gates.handles().map(|h| model.gates.death_rate(h)).collect();
    assert_eq!(rates[0], 0.0);
    assert!(rates.windows(2).all(|w| w[0] < w[1]));
    for (i, rate) in rates.iter().enumerate() {
        assert!((rate - 0.5 * i as f32 / 6.0).abs() < 1e-6);
        assert!(*rate < 0.5);
    }
}

#[test]
fn uniform_rates_are_constant() {
    let config = StochasticDepthConfig { death_mode: DeathMode::Uniform, death_rate: 0.2, ..small_config() };
    let model = StochasticResNet::build(&config).unwrap();
    assert!(model.gates.entries().iter().all(|e| e.death_rate == 0.2));
}

#[test]
fn topology_shapes_chain() {
    let specs = topology(&StochasticDepthConfig::default());
    for pair in specs.windows(2) {
        assert_eq!(pair[0].output, pair[1].input);
    }
    assert_eq!(specs[0].input, (16, 32, 32));
}

#[test]
fn invalid_config_is_rejected_before_building() {
    let config = StochasticDepthConfig { image_size: 6, ..small_config() };
    match StochasticResNet::build(&config) {
        Err(BuildError::Config(ConfigError::InvalidValue { field, .. })) => assert_eq!(field, "image_size"),
        other => panic!("expected config error, got {:?}", other.map(|_| ())),
    }
}
