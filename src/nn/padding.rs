//! Дополнение по оси каналов для skip-пути.

use crate::error::{BuildError, BuildResult};
use crate::nn::module::Module;
use crate::tensor::Tensor;

/// Значение добавляемых каналов.
///
/// Каналы заполняются единицами, а не нулями: обойдённый блок передаёт
/// дальше постоянную 1 в каждом добавленном канале.
pub const PAD_VALUE: f32 = 1.0;

/// Добавляет `amount` постоянных каналов после существующих каналов входа
/// `[N, C, H, W]`, получая `[N, C + amount, H, W]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelPad {
    pub amount: usize,
    pub value: f32,
}

impl ChannelPad {
    /// Отвергает нулевой `amount`; дополнение нужно только при росте каналов.
    pub fn new(amount: usize) -> BuildResult<Self> {
        if amount == 0 {
            return Err(BuildError::EmptyPadding);
        }
        Ok(Self { amount, value: PAD_VALUE })
    }
}

impl Module for ChannelPad {
    fn forward(&self, inputs: &Tensor) -> Tensor {
        inputs.pad_channels(self.amount, self.value)
    }

    fn parameters(&self) -> Vec<Tensor> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asg::Value;
    use crate::runtime::backend::{memo_from_feeds, Backend};
    use crate::runtime::cpu_backend::CpuBackend;
    use crate::tensor::GraphContext;
    use ndarray::{s, ArrayD, IxDyn};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    #[test]
    fn zero_amount_is_rejected() {
        assert!(matches!(ChannelPad::new(0), Err(BuildError::EmptyPadding)));
    }

    #[test]
    fn appended_channels_are_ones() {
        let ctx = Rc::new(RefCell::new(GraphContext::new()));
        let x = Tensor::new_input(&ctx, "x");
        let out = ChannelPad::new(3).unwrap().forward(&x);
        let mut graph = ctx.borrow().main_graph().clone();
        graph.set_outputs(vec![out.node_id]);

        let x_val = ArrayD::from_elem(IxDyn(&[2, 2, 4, 4]), -0.5f32);
        let feeds = HashMap::from([("x".to_string(), Value::Tensor(x_val))]);
        let backend = CpuBackend::new();
        let memo = memo_from_feeds(&backend, &graph, &feeds).unwrap();
        let (outputs, _) = backend.run(&graph, memo).unwrap();
        let Value::Tensor(padded) = &outputs[0] else {
            panic!("expected a tensor");
        };

        assert_eq!(padded.shape(), &[2, 5, 4, 4]);
        assert!(padded.slice(s![.., 0..2, .., ..]).iter().all(|&v| v == -0.5));
        assert!(padded.slice(s![.., 2.., .., ..]).iter().all(|&v| v == 1.0));
    }
}
