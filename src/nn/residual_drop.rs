//! Residual-блок со стохастическим обходом (stochastic depth).
//!
//! ```text
//!            ┌─ conv3x3/s ─ bn ─ relu ─ conv3x3 ─ bn ─ × scale ─┐
//!  x ────────┤                                                  (+) ─ relu ─┐
//!            └─ [avgpool s] ─ [дополнение каналов единицами] ───┘            Switch(gate) ─ out
//!                          └─────────────────────────────────────────────────┘
//! ```
//!
//! `scale` равен `1 - death_rate` при обучении и `1` при валидации. Гейт и
//! вероятность отключения являются входами графа с именами по
//! [`GateHandle`] блока, так что сэмплер меняет их между шагами, не трогая
//! граф.

use crate::error::{BuildError, BuildResult};
use crate::gating::{GateEntry, GateHandle, GateTable};
use crate::nn::activations::ReLU;
use crate::nn::batchnorm::BatchNorm2d;
use crate::nn::conv::{Conv2d, Conv2dConfig};
use crate::nn::module::Module;
use crate::nn::padding::ChannelPad;
use crate::nn::pooling::AvgPool2d;
use crate::nn::switch::Switch;
use crate::tensor::{GraphContext, Tensor};
use std::cell::RefCell;
use std::rc::Rc;

/// Форма карты признаков одного образца `(channels, height, width)`.
pub type FeatureShape = (usize, usize, usize);

/// Статическое описание одного блока.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpec {
    pub input: FeatureShape,
    pub output: FeatureShape,
    /// 1, либо 2 для переходного блока с уменьшением разрешения.
    pub stride: usize,
    /// Позиция среди всех блоков сети.
    pub ordinal: usize,
}

impl BlockSpec {
    /// Проверяет, что skip-путь переводит `input` в `output`: размер делится
    /// на шаг, а число каналов не уменьшается.
    pub fn validate(&self, block: &str) -> BuildResult<()> {
        let (in_c, in_h, in_w) = self.input;
        let (out_c, out_h, out_w) = self.output;
        if self.stride == 0 {
            return Err(BuildError::shape_mismatch(block, "stride must be at least 1"));
        }
        if in_h % self.stride != 0 || in_w % self.stride != 0 {
            return Err(BuildError::shape_mismatch(
                block,
                format!("input {}x{} is not divisible by stride {}", in_h, in_w, self.stride),
            ));
        }
        if (in_h / self.stride, in_w / self.stride) != (out_h, out_w) {
            return Err(BuildError::shape_mismatch(
                block,
                format!(
                    "stride {} maps {}x{} to {}x{}, declared output is {}x{}",
                    self.stride,
                    in_h,
                    in_w,
                    in_h / self.stride,
                    in_w / self.stride,
                    out_h,
                    out_w
                ),
            ));
        }
        if out_c < in_c {
            return Err(BuildError::shape_mismatch(
                block,
                format!("output channels {} fewer than input channels {}", out_c, in_c),
            ));
        }
        Ok(())
    }

    pub fn downsamples(&self) -> bool {
        self.stride >= 2
    }

    /// Сколько каналов добавляется на skip-пути.
    pub fn channel_growth(&self) -> usize {
        self.output.0 - self.input.0
    }
}

/// Residual-блок, который гейт может обойти целиком.
pub struct ResidualDrop {
    pub spec: BlockSpec,
    pub handle: GateHandle,
    conv1: Conv2d,
    bn1: BatchNorm2d,
    conv2: Conv2d,
    bn2: BatchNorm2d,
    downsample: Option<AvgPool2d>,
    pad: Option<ChannelPad>,
    gate: Tensor,
    death_rate: Tensor,
    learning_phase: Tensor,
    context: Rc<RefCell<GraphContext>>,
}

impl ResidualDrop {
    /// Проверяет `spec`, регистрирует параметры блока и добавляет его запись
    /// в `gates`.
    ///
    /// `learning_phase`: общий для сети булев вход, истинный на шагах
    /// обучения.
    pub fn new(
        context: &Rc<RefCell<GraphContext>>,
        name: &str,
        spec: BlockSpec,
        learning_phase: &Tensor,
        gates: &mut GateTable,
    ) -> BuildResult<Self> {
        spec.validate(name)?;
        let (in_c, _, _) = spec.input;
        let (out_c, _, _) = spec.output;
        let stride = (spec.stride, spec.stride);

        let conv1 = Conv2d::from_config(
            context,
            &format!("{}.conv1", name),
            Conv2dConfig::same3x3(in_c, out_c).with_stride(stride),
        );
        let bn1 = BatchNorm2d::new(context, &format!("{}.bn1", name), out_c);
        let conv2 = Conv2d::from_config(context, &format!("{}.conv2", name), Conv2dConfig::same3x3(out_c, out_c));
        let bn2 = BatchNorm2d::new(context, &format!("{}.bn2", name), out_c);

        let downsample = spec.downsamples().then(|| AvgPool2d::square(spec.stride));
        let pad = if spec.channel_growth() > 0 {
            Some(ChannelPad::new(spec.channel_growth())?)
        } else {
            None
        };

        let handle = gates.append(GateEntry::open());
        let gate = Tensor::new_input(context, &handle.gate_input());
        let death_rate = Tensor::new_input(context, &handle.death_rate_input());

        Ok(Self {
            spec,
            handle,
            conv1,
            bn1,
            conv2,
            bn2,
            downsample,
            pad,
            gate,
            death_rate,
            learning_phase: learning_phase.clone(),
            context: Rc::clone(context),
        })
    }

    fn residual(&self, x: &Tensor) -> Tensor {
        let h = ReLU.forward(&self.bn1.forward(&self.conv1.forward(x)));
        self.bn2.forward(&self.conv2.forward(&h))
    }

    fn skip(&self, x: &Tensor) -> Tensor {
        let pooled = match &self.downsample {
            Some(pool) => pool.forward(x),
            None => x.clone(),
        };
        match &self.pad {
            Some(pad) => pad.forward(&pooled),
            None => pooled,
        }
    }

    /// `1 - death_rate` в фазе обучения, иначе `1`.
    fn scale(&self) -> Tensor {
        let one = Tensor::scalar(&self.context, 1.0);
        let keep = &one - &self.death_rate;
        Switch::new(&self.learning_phase).select(&keep, &one)
    }
}

impl Module for ResidualDrop {
    fn forward(&self, x: &Tensor) -> Tensor {
        let residual = &self.residual(x) * &self.scale();
        let skip = self.skip(x);
        let merged = ReLU.forward(&(&residual + &skip));
        Switch::new(&self.gate).select(&merged, &skip)
    }

    fn parameters(&self) -> Vec<Tensor> {
        let mut params = self.conv1.parameters();
        params.extend(self.bn1.parameters());
        params.extend(self.conv2.parameters());
        params.extend(self.bn2.parameters());
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asg::{NodeType, Value};
    use crate::runtime::backend::{memo_from_feeds, Backend};
    use crate::runtime::cpu_backend::CpuBackend;
    use ndarray::{arr0, Array, ArrayD, IxDyn};
    use std::collections::HashMap;

    fn spec(input: FeatureShape, output: FeatureShape, stride: usize) -> BlockSpec {
        BlockSpec { input, output, stride, ordinal: 0 }
    }

    /// Прогоняет один блок на CPU. Все параметры нулевые, кроме `gamma = 1`;
    /// `tweak` может переопределить любой из них по имени.
    fn run_block(
        spec: BlockSpec,
        x: ArrayD<f32>,
        gate_open: bool,
        death_rate: f32,
        training: bool,
        tweak: impl Fn(&str, &mut ArrayD<f32>),
    ) -> ArrayD<f32> {
        let ctx = Rc::new(RefCell::new(GraphContext::new()));
        let phase = Tensor::new_input(&ctx, "learning_phase");
        let input = Tensor::new_input(&ctx, "x");
        let mut gates = GateTable::new();
        let block = ResidualDrop::new(&ctx, "b0", spec, &phase, &mut gates).unwrap();
        let out = block.forward(&input);

        let mut graph = ctx.borrow().main_graph().clone();
        graph.set_outputs(vec![out.node_id]);

        let mut feeds = HashMap::from([
            ("x".to_string(), Value::Tensor(x)),
            ("learning_phase".to_string(), Value::ScalarBool(training)),
            (block.handle.gate_input(), Value::ScalarBool(gate_open)),
            (block.handle.death_rate_input(), Value::Tensor(arr0(death_rate).into_dyn())),
        ]);
        for node in graph.nodes.values() {
            if let (NodeType::Parameter { name }, Some(shape)) = (&node.node_type, &node.shape) {
                let mut value = if name.ends_with(".gamma") {
                    ArrayD::ones(IxDyn(shape))
                } else {
                    ArrayD::zeros(IxDyn(shape))
                };
                tweak(name.as_str(), &mut value);
                feeds.insert(name.clone(), Value::Tensor(value));
            }
        }

        let backend = CpuBackend::new();
        let memo = memo_from_feeds(&backend, &graph, &feeds).unwrap();
        let (outputs, _) = backend.run(&graph, memo).unwrap();
        match outputs.into_iter().next() {
            Some(Value::Tensor(t)) => t,
            other => panic!("expected a tensor output, got {:?}", other),
        }
    }

    #[test]
    fn residual_is_scaled_by_keep_rate_only_while_training() {
        // Нулевые свёртки и x = 0: остаточная ветка равна bn2.beta = 2.
        let beta = |name: &str, value: &mut ArrayD<f32>| {
            if name == "b0.bn2.beta" {
                value.fill(2.0);
            }
        };
        let x = || ArrayD::zeros(IxDyn(&[1, 1, 2, 2]));
        let block = spec((1, 2, 2), (1, 2, 2), 1);

        let train = run_block(block, x(), true, 0.5, true, beta);
        let eval = run_block(block, x(), true, 0.5, false, beta);
        assert!(train.iter().all(|&v| v == 1.0), "train output {:?}", train);
        assert!(eval.iter().all(|&v| v == 2.0), "eval output {:?}", eval);
    }

    #[test]
    fn closed_transition_block_emits_exact_skip_path() {
        let x = Array::from_iter((0..32).map(|v| v as f32 - 13.0)).into_shape(IxDyn(&[1, 2, 4, 4])).unwrap();
        // Ненулевые веса: при закрытом гейте они не должны влиять на выход.
        let noisy = |_: &str, value: &mut ArrayD<f32>| value.mapv_inplace(|v| v + 0.3);
        let out = run_block(spec((2, 4, 4), (4, 2, 2), 2), x.clone(), false, 0.5, true, noisy);

        assert_eq!(out.shape(), &[1, 4, 2, 2]);
        for c in 0..2 {
            for i in 0..2 {
                for j in 0..2 {
                    let window = x[[0, c, 2 * i, 2 * j]]
                        + x[[0, c, 2 * i, 2 * j + 1]]
                        + x[[0, c, 2 * i + 1, 2 * j]]
                        + x[[0, c, 2 * i + 1, 2 * j + 1]];
                    assert_eq!(out[[0, c, i, j]], window / 4.0);
                }
            }
        }
        assert!(out.slice(ndarray::s![.., 2.., .., ..]).iter().all(|&v| v == 1.0));
    }

    #[test]
    fn identity_block_has_no_pool_or_pad() {
        let ctx = Rc::new(RefCell::new(GraphContext::new()));
        let phase = Tensor::new_input(&ctx, "learning_phase");
        let x = Tensor::new_input(&ctx, "x");
        let mut gates = GateTable::new();
        let block = ResidualDrop::new(&ctx, "b0", spec((16, 8, 8), (16, 8, 8), 1), &phase, &mut gates).unwrap();
        block.forward(&x);

        let graph = ctx.borrow().main_graph().clone();
        assert_eq!(gates.len(), 1);
        assert_eq!(graph.count_nodes(|n| matches!(n, NodeType::PadChannels { .. })), 0);
        assert_eq!(graph.count_nodes(|n| matches!(n, NodeType::AvgPool2d { .. })), 0);
        // Один Switch для масштаба, один для гейта.
        assert_eq!(graph.count_nodes(|n| matches!(n, NodeType::Switch { .. })), 2);
        assert_eq!(block.parameters().len(), 8);
        assert!(graph.find_named("gate.0").is_some());
        assert!(graph.find_named("death_rate.0").is_some());
    }

    #[test]
    fn transition_block_pools_and_pads() {
        let ctx = Rc::new(RefCell::new(GraphContext::new()));
        let phase = Tensor::new_input(&ctx, "learning_phase");
        let x = Tensor::new_input(&ctx, "x");
        let mut gates = GateTable::new();
        let block = ResidualDrop::new(&ctx, "b0", spec((16, 8, 8), (32, 4, 4), 2), &phase, &mut gates).unwrap();
        block.forward(&x);

        let graph = ctx.borrow().main_graph().clone();
        assert_eq!(
            graph.count_nodes(|n| matches!(n, NodeType::PadChannels { amount: 16, value, .. } if *value == 1.0)),
            1
        );
        assert_eq!(
            graph.count_nodes(|n| matches!(n, NodeType::AvgPool2d { kernel_size: (2, 2), stride: (2, 2), .. })),
            1
        );
    }

    #[test]
    fn mismatched_shapes_fail_at_build() {
        let ctx = Rc::new(RefCell::new(GraphContext::new()));
        let phase = Tensor::new_input(&ctx, "learning_phase");
        let mut gates = GateTable::new();

        let shrink = ResidualDrop::new(&ctx, "b0", spec((32, 8, 8), (16, 8, 8), 1), &phase, &mut gates);
        assert!(matches!(shrink, Err(BuildError::ShapeMismatch { .. })));

        let wrong_size = ResidualDrop::new(&ctx, "b1", spec((16, 8, 8), (16, 8, 8), 2), &phase, &mut gates);
        assert!(matches!(wrong_size, Err(BuildError::ShapeMismatch { .. })));

        // Для отвергнутого блока ничего не регистрируется.
        assert!(gates.is_empty());
    }
}
