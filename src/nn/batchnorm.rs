//! BatchNormalization слой для сверточных карт признаков.
//!
//! Нормализует каждый канал входа `[N, C, H, W]` по осям batch и
//! пространственным осям, затем применяет обучаемые gamma/beta.

use crate::nn::Module;
use crate::tensor::{GraphContext, Tensor};
use std::cell::RefCell;
use std::rc::Rc;

/// Малая константа для численной стабильности.
pub const EPS: f32 = 1e-5;

/// Слой Batch Normalization для 4D входа.
///
/// y = gamma * (x - mean) / sqrt(var + eps) + beta
///
/// Статистики всегда берутся из текущего батча; накопленных running
/// statistics нет.
pub struct BatchNorm2d {
    /// Обучаемый масштаб, форма `[C]`.
    pub gamma: Tensor,
    /// Обучаемый сдвиг, форма `[C]`.
    pub beta: Tensor,
    pub eps: f32,
    pub name: String,
}

impl BatchNorm2d {
    /// Создаёт слой для `channels` каналов.
    ///
    /// # Аргументы
    /// * `ctx` - Контекст графа для регистрации параметров
    /// * `name` - Уникальное имя слоя
    /// * `channels` - Число каналов входа
    pub fn new(ctx: &Rc<RefCell<GraphContext>>, name: &str, channels: usize) -> Self {
        let gamma = Tensor::new_parameter(ctx, &format!("{}.gamma", name), vec![channels]);
        let beta = Tensor::new_parameter(ctx, &format!("{}.beta", name), vec![channels]);
        Self { gamma, beta, eps: EPS, name: name.to_string() }
    }
}

impl Module for BatchNorm2d {
    fn forward(&self, x: &Tensor) -> Tensor {
        x.batch_norm2d(&self.gamma, &self.beta, self.eps)
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![self.gamma.clone(), self.beta.clone()]
    }
}
