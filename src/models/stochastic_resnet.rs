//! Глубокая residual-сеть со стохастической глубиной.
//!
//! Схема для `N` блоков на стадию и входа `S x S`:
//!
//! ```text
//! images ─ conv3x3 ─ bn ─ relu
//!        ─ N блоков          (c1, S,   S  )
//!        ─ 1 блок, шаг 2     (c2, S/2, S/2) ─ N-1 блоков
//!        ─ 1 блок, шаг 2     (c3, S/4, S/4) ─ N-1 блоков
//!        ─ global avg pool ─ flatten ─ dense ─ softmax
//! ```
//!
//! Каждый блок регистрирует гейт в собственной [`GateTable`] сети;
//! вероятности отключения назначаются, когда построены все `3N` блоков.

use crate::analysis::shape_inference::ShapeInference;
use crate::asg::{Asg, DType, NodeId, Shape, Value};
use crate::config::StochasticDepthConfig;
use crate::error::BuildResult;
use crate::gating::GateTable;
use crate::losses::categorical_cross_entropy;
use crate::nn::{
    AdaptiveAvgPool2d, BatchNorm2d, BlockSpec, Conv2d, Conv2dConfig, Linear, Module, ReLU, ResidualDrop, Softmax,
};
use crate::tensor::{GraphContext, Tensor};
use ndarray::{ArrayD, IxDyn};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Вход графа с изображениями `[batch, channels, size, size]`.
pub const IMAGES_INPUT: &str = "images";
/// Вход графа с one-hot метками `[batch, classes]`.
pub const LABELS_INPUT: &str = "labels";
/// Булев вход графа, истинен на шагах обучения.
pub const LEARNING_PHASE_INPUT: &str = "learning_phase";

/// Описания блоков всей сети в порядке глубины.
pub fn topology(config: &StochasticDepthConfig) -> Vec<BlockSpec> {
    let n = config.blocks_per_stage;
    let s = config.image_size;
    let [c1, c2, c3] = config.stage_channels;

    let mut specs = Vec::with_capacity(3 * n);
    let mut current = (config.stem_channels, s, s);
    let mut push = |output: (usize, usize, usize), stride: usize, specs: &mut Vec<BlockSpec>| {
        specs.push(BlockSpec { input: current, output, stride, ordinal: specs.len() });
        current = output;
    };

    for _ in 0..n {
        push((c1, s, s), 1, &mut specs);
    }
    push((c2, s / 2, s / 2), 2, &mut specs);
    for _ in 1..n {
        push((c2, s / 2, s / 2), 1, &mut specs);
    }
    push((c3, s / 4, s / 4), 2, &mut specs);
    for _ in 1..n {
        push((c3, s / 4, s / 4), 1, &mut specs);
    }
    specs
}

/// Построенный классификатор: граф, таблица гейтов и параметры.
pub struct StochasticResNet {
    pub config: StochasticDepthConfig,
    pub gates: GateTable,
    /// Выходы `[probabilities, loss]`; формы проставлены.
    graph: Asg,
    blocks: Vec<ResidualDrop>,
    parameters: Vec<Tensor>,
    probabilities: NodeId,
    loss: NodeId,
}

impl StochasticResNet {
    /// Строит сеть по `config`.
    ///
    /// Возвращает ошибку конфигурации для неверного `config` и ошибку форм,
    /// если объявленные формы блока не сходятся или вывод форм отвергает
    /// готовый граф.
    pub fn build(config: &StochasticDepthConfig) -> BuildResult<Self> {
        config.validate()?;
        let ctx = Rc::new(RefCell::new(GraphContext::new()));

        let images = Tensor::new_input(&ctx, IMAGES_INPUT);
        let labels = Tensor::new_input(&ctx, LABELS_INPUT);
        let learning_phase = Tensor::new_input(&ctx, LEARNING_PHASE_INPUT);

        let stem_conv = Conv2d::from_config(
            &ctx,
            "stem.conv",
            Conv2dConfig::same3x3(config.image_channels, config.stem_channels),
        );
        let stem_bn = BatchNorm2d::new(&ctx, "stem.bn", config.stem_channels);
        let mut parameters = stem_conv.parameters();
        parameters.extend(stem_bn.parameters());

        let mut net = ReLU.forward(&stem_bn.forward(&stem_conv.forward(&images)));

        let mut gates = GateTable::new();
        let mut blocks = Vec::with_capacity(config.total_blocks());
        for spec in topology(config) {
            let name = format!("block.{}", spec.ordinal);
            let block = ResidualDrop::new(&ctx, &name, spec, &learning_phase, &mut gates)?;
            net = block.forward(&net);
            parameters.extend(block.parameters());
            blocks.push(block);
        }

        let features = AdaptiveAvgPool2d::global().forward(&net).flatten();
        let head = Linear::new(&ctx, config.stage_channels[2], config.num_classes, "head.fc");
        parameters.extend(head.parameters());
        let probabilities = Softmax.forward(&head.forward(&features));
        let loss = categorical_cross_entropy(&probabilities, &labels, config.batch_size);

        config.schedule().apply(&mut gates);

        let mut graph = ctx.borrow().main_graph().clone();
        graph.set_outputs(vec![probabilities.node_id, loss.node_id]);
        ShapeInference::run(&mut graph, &Self::input_shapes(config, &gates))?;

        let model = Self {
            config: config.clone(),
            gates,
            graph,
            blocks,
            parameters,
            probabilities: probabilities.node_id,
            loss: loss.node_id,
        };
        tracing::info!(
            blocks = model.blocks.len(),
            parameters = model.parameter_count(),
            nodes = model.graph.nodes.len(),
            death_mode = %config.death_mode,
            "network built"
        );
        Ok(model)
    }

    /// Формы всех входов графа для размера батча из конфигурации.
    fn input_shapes(config: &StochasticDepthConfig, gates: &GateTable) -> HashMap<String, (Shape, DType)> {
        let s = config.image_size;
        let mut shapes = HashMap::from([
            (
                IMAGES_INPUT.to_string(),
                (vec![config.batch_size, config.image_channels, s, s], DType::F32),
            ),
            (LABELS_INPUT.to_string(), (vec![config.batch_size, config.num_classes], DType::F32)),
            (LEARNING_PHASE_INPUT.to_string(), (vec![], DType::Bool)),
        ]);
        for handle in gates.handles() {
            shapes.insert(handle.gate_input(), (vec![], DType::Bool));
            shapes.insert(handle.death_rate_input(), (vec![], DType::F32));
        }
        shapes
    }

    pub fn graph(&self) -> &Asg {
        &self.graph
    }

    /// Граф только с выходом вероятностей; исполняется без меток.
    pub fn inference_graph(&self) -> Asg {
        let mut graph = self.graph.clone();
        graph.set_outputs(vec![self.probabilities]);
        graph
    }

    pub fn blocks(&self) -> &[ResidualDrop] {
        &self.blocks
    }

    pub fn probabilities_node(&self) -> NodeId {
        self.probabilities
    }

    pub fn loss_node(&self) -> NodeId {
        self.loss
    }

    /// Имена параметров вместе с объявленными формами.
    pub fn parameter_shapes(&self) -> Vec<(String, Shape)> {
        self.parameters
            .iter()
            .filter_map(|p| {
                let node = self.graph.get_node(p.node_id).ok()?;
                Some((node.name.clone()?, node.shape.clone()?))
            })
            .collect()
    }

    /// Общее число обучаемых скаляров.
    pub fn parameter_count(&self) -> usize {
        self.parameter_shapes().iter().map(|(_, shape)| shape.iter().product::<usize>()).sum()
    }

    /// Начальные значения всех параметров.
    ///
    /// Веса свёрток и полносвязного слоя: равномерная инициализация He по
    /// fan-in; смещения и `beta` нулевые, `gamma` равна единице.
    pub fn init_parameters<R: Rng + ?Sized>(&self, rng: &mut R) -> HashMap<String, Value> {
        self.parameter_shapes()
            .into_iter()
            .map(|(name, shape)| {
                let value = if name.ends_with(".gamma") {
                    ArrayD::ones(IxDyn(&shape))
                } else if name.ends_with(".beta") || name.ends_with(".bias") {
                    ArrayD::zeros(IxDyn(&shape))
                } else {
                    // [C_out, C_in, kH, kW] у свёрток, [in, out] у полносвязного слоя.
                    let fan_in = match shape.len() {
                        4 => shape[1] * shape[2] * shape[3],
                        _ => shape.first().copied().unwrap_or(1),
                    };
                    let limit = (6.0 / fan_in.max(1) as f32).sqrt();
                    ArrayD::random_using(IxDyn(&shape), Uniform::new(-limit, limit), &mut *rng)
                };
                (name, Value::Tensor(value))
            })
            .collect()
    }
}
