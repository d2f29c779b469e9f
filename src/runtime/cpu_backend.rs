//! Модуль, реализующий бэкенд для выполнения ASG на CPU.
//!
//! Этот бэкенд обходит граф вычислений (ASG) в топологическом порядке и для
//! каждого узла выполняет соответствующую операцию с помощью `ndarray`.

use super::backend::{Backend, Memo, RuntimeError};
use crate::analysis::shape_inference::{broadcast_shapes, ShapeInference};
use crate::asg::{Asg, NodeId, NodeType, Value};
use ndarray::{arr0, concatenate, s, Array2, Array4, ArrayD, Axis, Ix2, Ix4, IxDyn};
use std::collections::HashMap;

/// Контекст выполнения одного графа на CPU.
struct ExecutionContext<'a> {
    asg: &'a Asg,
    memo: Memo<Value>,
}

impl<'a> ExecutionContext<'a> {
    fn new(asg: &'a Asg, initial_memo: Memo<Value>) -> Self {
        Self { asg, memo: initial_memo }
    }

    fn value_of(&self, node_id: NodeId) -> Result<Value, RuntimeError> {
        self.memo
            .get(&(self.asg.id, node_id))
            .cloned()
            .ok_or(RuntimeError::NodeNotFound(node_id, self.asg.id))
    }

    /// Вычисляет один узел. Операнды уже в кэше, так как узлы приходят в
    /// топологическом порядке.
    fn evaluate_node(&mut self, node_id: NodeId) -> Result<(), RuntimeError> {
        let key = (self.asg.id, node_id);
        if self.memo.contains_key(&key) {
            return Ok(());
        }

        let node = self
            .asg
            .nodes
            .get(&node_id)
            .ok_or(RuntimeError::NodeNotFound(node_id, self.asg.id))?;

        let result = match &node.node_type {
            NodeType::Input { name } => {
                return Err(RuntimeError::MissingInput(name.clone(), node.id));
            }
            NodeType::Parameter { name } => {
                return Err(RuntimeError::MissingParameter(name.clone(), node.id));
            }
            NodeType::Literal(value) => Ok(value.clone()),

            NodeType::Add(l, r) | NodeType::Subtract(l, r) | NodeType::Multiply(l, r) |
            NodeType::Divide(l, r) | NodeType::MatrixMultiply(l, r) => {
                let lhs = tensor(self.value_of(*l)?)?;
                let rhs = tensor(self.value_of(*r)?)?;
                match &node.node_type {
                    NodeType::Add(_, _) => op_elementwise(lhs, rhs, "Add", |a, b| a + b),
                    NodeType::Subtract(_, _) => op_elementwise(lhs, rhs, "Subtract", |a, b| a - b),
                    NodeType::Multiply(_, _) => op_elementwise(lhs, rhs, "Multiply", |a, b| a * b),
                    NodeType::Divide(_, _) => op_elementwise(lhs, rhs, "Divide", |a, b| a / b),
                    NodeType::MatrixMultiply(_, _) => op_matmul(lhs, rhs),
                    _ => unreachable!(),
                }
            }

            NodeType::Negate(op) | NodeType::Log(op) | NodeType::ReLU(op) | NodeType::Softmax(op) |
            NodeType::Sum(op) | NodeType::Flatten(op) => {
                let operand = tensor(self.value_of(*op)?)?;
                match &node.node_type {
                    NodeType::Negate(_) => Ok(Value::Tensor(operand.mapv(|x| -x))),
                    NodeType::Log(_) => Ok(Value::Tensor(operand.mapv(|x| x.ln()))),
                    NodeType::ReLU(_) => Ok(Value::Tensor(operand.mapv(|x| x.max(0.0)))),
                    NodeType::Softmax(_) => op_softmax(operand),
                    NodeType::Sum(_) => Ok(Value::Tensor(arr0(operand.sum()).into_dyn())),
                    NodeType::Flatten(_) => op_flatten(operand),
                    _ => unreachable!(),
                }
            }

            NodeType::PadChannels { input, amount, value } => {
                op_pad_channels(tensor(self.value_of(*input)?)?, *amount, *value)
            }

            NodeType::Conv2d { input, weight, bias, stride, padding } => {
                let input_val = tensor(self.value_of(*input)?)?;
                let weight_val = tensor(self.value_of(*weight)?)?;
                let bias_val = match bias {
                    Some(b) => Some(tensor(self.value_of(*b)?)?),
                    None => None,
                };
                op_conv2d(input_val, weight_val, bias_val, *stride, *padding)
            }

            NodeType::BatchNorm2d { input, gamma, beta, eps } => {
                let input_val = tensor(self.value_of(*input)?)?;
                let gamma_val = tensor(self.value_of(*gamma)?)?;
                let beta_val = tensor(self.value_of(*beta)?)?;
                op_batch_norm2d(input_val, gamma_val, beta_val, *eps)
            }

            NodeType::AvgPool2d { input, kernel_size, stride } => {
                op_avg_pool2d(tensor(self.value_of(*input)?)?, *kernel_size, *stride)
            }

            NodeType::AdaptiveAvgPool2d { input, output_size } => {
                op_adaptive_avg_pool2d(tensor(self.value_of(*input)?)?, *output_size)
            }

            NodeType::Switch { condition, on_true, on_false } => {
                let cond = self.value_of(*condition)?;
                let take_first = cond.as_condition().ok_or_else(|| RuntimeError::TypeError {
                    expected: "scalar condition".to_string(),
                    actual: cond.kind().to_string(),
                })?;
                // Обе ветки уже вычислены; здесь происходит только выбор.
                if take_first {
                    self.value_of(*on_true)
                } else {
                    self.value_of(*on_false)
                }
            }
        }?;

        self.memo.insert(key, result);
        Ok(())
    }
}

pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for CpuBackend {
    type DeviceData = Value;

    fn load_data(
        &self,
        data: &HashMap<String, Value>,
    ) -> Result<HashMap<String, Self::DeviceData>, RuntimeError> {
        Ok(data.clone())
    }

    fn run(
        &self,
        main_asg: &Asg,
        initial_memo: Memo<Self::DeviceData>,
    ) -> Result<(Vec<Self::DeviceData>, Memo<Self::DeviceData>), RuntimeError> {
        let sorted_nodes = ShapeInference::topological_sort(main_asg)
            .map_err(|e| RuntimeError::ShapeError(format!("Topological sort failed: {:?}", e)))?;

        let mut context = ExecutionContext::new(main_asg, initial_memo);
        for node_id in sorted_nodes {
            context.evaluate_node(node_id)?;
        }

        let results = main_asg
            .outputs
            .iter()
            .map(|id| context.value_of(*id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((results, context.memo))
    }

    fn retrieve_data(&self, device_data: &[Self::DeviceData]) -> Result<Vec<Value>, RuntimeError> {
        Ok(device_data.to_vec())
    }
}

/// Достаёт n-мерный массив из числового значения; скаляры становятся 0-мерными.
fn tensor(value: Value) -> Result<ArrayD<f32>, RuntimeError> {
    match value {
        Value::Tensor(t) => Ok(t),
        Value::ScalarF32(v) => Ok(arr0(v).into_dyn()),
        other => Err(RuntimeError::TypeError {
            expected: "Tensor".to_string(),
            actual: other.kind().to_string(),
        }),
    }
}

fn to_4d(arr: ArrayD<f32>, what: &str) -> Result<Array4<f32>, RuntimeError> {
    arr.into_dimensionality::<Ix4>()
        .map_err(|e| RuntimeError::ShapeError(format!("{}: {}", what, e)))
}

fn op_elementwise(
    lhs: ArrayD<f32>,
    rhs: ArrayD<f32>,
    op: &str,
    f: impl Fn(&ArrayD<f32>, &ArrayD<f32>) -> ArrayD<f32>,
) -> Result<Value, RuntimeError> {
    if broadcast_shapes(lhs.shape(), rhs.shape()).is_none() {
        return Err(RuntimeError::ShapeError(format!(
            "{}: cannot broadcast {:?} with {:?}",
            op,
            lhs.shape(),
            rhs.shape()
        )));
    }
    Ok(Value::Tensor(f(&lhs, &rhs)))
}

fn op_matmul(a: ArrayD<f32>, b: ArrayD<f32>) -> Result<Value, RuntimeError> {
    let a_mat = a
        .into_dimensionality::<Ix2>()
        .map_err(|e| RuntimeError::ShapeError(format!("MatrixMultiply lhs: {}", e)))?;
    let b_mat = b
        .into_dimensionality::<Ix2>()
        .map_err(|e| RuntimeError::ShapeError(format!("MatrixMultiply rhs: {}", e)))?;
    if a_mat.ncols() != b_mat.nrows() {
        return Err(RuntimeError::ShapeError(format!(
            "Incompatible matmul shapes: {:?} and {:?}",
            a_mat.shape(),
            b_mat.shape()
        )));
    }
    Ok(Value::Tensor(a_mat.dot(&b_mat).into_dyn()))
}

fn op_softmax(a: ArrayD<f32>) -> Result<Value, RuntimeError> {
    if a.ndim() == 0 {
        return Ok(Value::Tensor(arr0(1.0f32).into_dyn()));
    }
    let mut result = a;
    let last_axis = Axis(result.ndim() - 1);
    for mut row in result.lanes_mut(last_axis) {
        let max_val = row.iter().fold(f32::NEG_INFINITY, |max, &val| max.max(val));
        row.mapv_inplace(|x| (x - max_val).exp());
        let sum = row.sum();
        row.mapv_inplace(|x| x / sum);
    }
    Ok(Value::Tensor(result))
}

fn op_flatten(a: ArrayD<f32>) -> Result<Value, RuntimeError> {
    let shape = a.shape().to_vec();
    let Some((&n, rest)) = shape.split_first() else {
        return Err(RuntimeError::ShapeError("Flatten of a 0-d tensor".to_string()));
    };
    let rest: usize = rest.iter().product();
    let data: Vec<f32> = a.iter().copied().collect();
    ArrayD::from_shape_vec(IxDyn(&[n, rest]), data)
        .map(Value::Tensor)
        .map_err(|e| RuntimeError::ShapeError(e.to_string()))
}

/// Приклеивает блок `value` формы `[N, amount, H, W]` по оси 1.
fn op_pad_channels(a: ArrayD<f32>, amount: usize, value: f32) -> Result<Value, RuntimeError> {
    let input = to_4d(a, "PadChannels input")?;
    let (n, _, h, w) = input.dim();
    let fill = Array4::<f32>::from_elem((n, amount, h, w), value);
    let padded = concatenate(Axis(1), &[input.view(), fill.view()])
        .map_err(|e| RuntimeError::ShapeError(e.to_string()))?;
    Ok(Value::Tensor(padded.into_dyn()))
}

/// 2D-свёртка через im2col и матричное произведение.
/// Вход: [N, C_in, H, W], веса: [C_out, C_in, kH, kW], смещение: [C_out]
fn op_conv2d(
    input: ArrayD<f32>,
    weight: ArrayD<f32>,
    bias: Option<ArrayD<f32>>,
    stride: (usize, usize),
    padding: (usize, usize),
) -> Result<Value, RuntimeError> {
    let input_arr = to_4d(input, "Conv2d input")?;
    let weight_arr = to_4d(weight, "Conv2d weight")?;

    let (batch_size, in_channels, in_h, in_w) = input_arr.dim();
    let (out_channels, weight_in_channels, kernel_h, kernel_w) = weight_arr.dim();

    if in_channels != weight_in_channels {
        return Err(RuntimeError::ShapeError(format!(
            "Conv2d: input channels {} != weight input channels {}",
            in_channels, weight_in_channels
        )));
    }

    let (stride_h, stride_w) = stride;
    let (pad_h, pad_w) = padding;
    if in_h + 2 * pad_h < kernel_h || in_w + 2 * pad_w < kernel_w {
        return Err(RuntimeError::ShapeError(format!(
            "Conv2d: kernel {}x{} larger than padded input {}x{}",
            kernel_h, kernel_w, in_h + 2 * pad_h, in_w + 2 * pad_w
        )));
    }
    let out_h = (in_h + 2 * pad_h - kernel_h) / stride_h + 1;
    let out_w = (in_w + 2 * pad_w - kernel_w) / stride_w + 1;

    let patch = in_channels * kernel_h * kernel_w;
    let w_mat = Array2::from_shape_vec((out_channels, patch), weight_arr.iter().copied().collect())
        .map_err(|e| RuntimeError::ShapeError(e.to_string()))?;

    let mut output = Array4::<f32>::zeros((batch_size, out_channels, out_h, out_w));
    let mut cols = Array2::<f32>::zeros((patch, out_h * out_w));

    for n in 0..batch_size {
        cols.fill(0.0);
        for ic in 0..in_channels {
            for kh in 0..kernel_h {
                for kw in 0..kernel_w {
                    let row = (ic * kernel_h + kh) * kernel_w + kw;
                    for oh in 0..out_h {
                        let ih = (oh * stride_h + kh) as isize - pad_h as isize;
                        if ih < 0 || ih >= in_h as isize {
                            continue;
                        }
                        for ow in 0..out_w {
                            let iw = (ow * stride_w + kw) as isize - pad_w as isize;
                            if iw >= 0 && iw < in_w as isize {
                                cols[[row, oh * out_w + ow]] = input_arr[[n, ic, ih as usize, iw as usize]];
                            }
                        }
                    }
                }
            }
        }

        let product = w_mat.dot(&cols);
        let product = product
            .into_shape((out_channels, out_h, out_w))
            .map_err(|e| RuntimeError::ShapeError(e.to_string()))?;
        output.slice_mut(s![n, .., .., ..]).assign(&product);
    }

    if let Some(bias_arr) = bias {
        if bias_arr.len() != out_channels {
            return Err(RuntimeError::ShapeError(format!(
                "Conv2d: bias of length {} for {} output channels",
                bias_arr.len(),
                out_channels
            )));
        }
        for (c, b) in bias_arr.iter().enumerate() {
            output.index_axis_mut(Axis(1), c).mapv_inplace(|v| v + b);
        }
    }

    Ok(Value::Tensor(output.into_dyn()))
}

/// Поканальная нормализация по статистикам текущего батча.
fn op_batch_norm2d(
    input: ArrayD<f32>,
    gamma: ArrayD<f32>,
    beta: ArrayD<f32>,
    eps: f32,
) -> Result<Value, RuntimeError> {
    let mut x = to_4d(input, "BatchNorm2d input")?;
    let channels = x.dim().1;
    if gamma.len() != channels || beta.len() != channels {
        return Err(RuntimeError::ShapeError(format!(
            "BatchNorm2d: gamma/beta of length {}/{} for {} channels",
            gamma.len(),
            beta.len(),
            channels
        )));
    }

    for (c, (g, b)) in gamma.iter().zip(beta.iter()).enumerate() {
        let mut lane = x.index_axis_mut(Axis(1), c);
        let mean = lane.mean().unwrap_or(0.0);
        let var = lane.mapv(|v| (v - mean) * (v - mean)).mean().unwrap_or(0.0);
        let inv_std = 1.0 / (var + eps).sqrt();
        lane.mapv_inplace(|v| (v - mean) * inv_std * g + b);
    }

    Ok(Value::Tensor(x.into_dyn()))
}

/// Average Pooling 2D без дополнения.
fn op_avg_pool2d(
    operand: ArrayD<f32>,
    kernel_size: (usize, usize),
    stride: (usize, usize),
) -> Result<Value, RuntimeError> {
    let input_arr = to_4d(operand, "AvgPool2d input")?;
    let (n, c, h, w) = input_arr.dim();
    let (kh, kw) = kernel_size;
    let (sh, sw) = stride;
    if h < kh || w < kw {
        return Err(RuntimeError::ShapeError(format!(
            "AvgPool2d: window {}x{} larger than input {}x{}",
            kh, kw, h, w
        )));
    }

    let out_h = (h - kh) / sh + 1;
    let out_w = (w - kw) / sw + 1;
    let kernel_area = (kh * kw) as f32;

    let mut output = Array4::<f32>::zeros((n, c, out_h, out_w));
    for n_idx in 0..n {
        for c_idx in 0..c {
            for oh in 0..out_h {
                for ow in 0..out_w {
                    let (h0, w0) = (oh * sh, ow * sw);
                    let window = input_arr.slice(s![n_idx, c_idx, h0..h0 + kh, w0..w0 + kw]);
                    output[[n_idx, c_idx, oh, ow]] = window.sum() / kernel_area;
                }
            }
        }
    }

    Ok(Value::Tensor(output.into_dyn()))
}

/// Adaptive Average Pooling 2D.
/// Размер окна и шаг подбираются под целевой размер выхода.
fn op_adaptive_avg_pool2d(operand: ArrayD<f32>, output_size: (usize, usize)) -> Result<Value, RuntimeError> {
    let input_arr = to_4d(operand, "AdaptiveAvgPool2d input")?;
    let (n, c, in_h, in_w) = input_arr.dim();
    let (out_h, out_w) = output_size;

    let mut output = Array4::<f32>::zeros((n, c, out_h, out_w));
    for n_idx in 0..n {
        for c_idx in 0..c {
            for oh in 0..out_h {
                for ow in 0..out_w {
                    let h_start = (oh * in_h) / out_h;
                    let h_end = ((oh + 1) * in_h) / out_h;
                    let w_start = (ow * in_w) / out_w;
                    let w_end = ((ow + 1) * in_w) / out_w;
                    let count = (h_end - h_start) * (w_end - w_start);
                    if count == 0 {
                        continue;
                    }
                    let window = input_arr.slice(s![n_idx, c_idx, h_start..h_end, w_start..w_end]);
                    output[[n_idx, c_idx, oh, ow]] = window.sum() / count as f32;
                }
            }
        }
    }

    Ok(Value::Tensor(output.into_dyn()))
}
