//! Модуль, содержащий слои-активации, реализованные для графовой архитектуры.

use crate::nn::module::Module;
use crate::tensor::Tensor;

// --- Слой ReLU ---

/// Слой активации ReLU: поэлементно `max(0, x)`.
/// Не имеет обучаемых параметров.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReLU;

impl ReLU {
    pub fn new() -> Self {
        ReLU
    }
}

impl Module for ReLU {
    fn forward(&self, inputs: &Tensor) -> Tensor {
        inputs.relu()
    }

    fn parameters(&self) -> Vec<Tensor> {
        Vec::new()
    }
}

// --- Слой Softmax ---

/// Softmax по последней оси, превращает логиты в вероятности классов.
#[derive(Debug, Clone, Copy, Default)]
pub struct Softmax;

impl Softmax {
    pub fn new() -> Self {
        Softmax
    }
}

impl Module for Softmax {
    fn forward(&self, inputs: &Tensor) -> Tensor {
        inputs.softmax()
    }

    fn parameters(&self) -> Vec<Tensor> {
        Vec::new()
    }
}
