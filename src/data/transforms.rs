// --- Файл: src/data/transforms.rs ---

//! Предобработка и аугментация батчей изображений `[N, C, H, W]`.

use ndarray::{ArrayD, Axis};
use rand::Rng;

/// Поэлементная стандартизация по выборке: `(x - mean) / std`, где
/// `mean` и `std` считаются по оси образцов отдельно для каждого пикселя.
#[derive(Debug, Clone)]
pub struct Standardize {
    mean: ArrayD<f32>,
    std: ArrayD<f32>,
}

impl Standardize {
    /// Вычисляет параметры по данным `[N, ...]`.
    ///
    /// Возвращает `None` для пустого набора.
    pub fn fit(data: &ArrayD<f32>) -> Option<Self> {
        let mean = data.mean_axis(Axis(0))?;
        let std = data.std_axis(Axis(0), 0.0).mapv(|s| s.max(1e-8));
        Some(Self { mean, std })
    }

    pub fn apply(&self, data: &ArrayD<f32>) -> ArrayD<f32> {
        (data - &self.mean) / &self.std
    }
}

/// Случайное отражение изображений по горизонтали (последняя ось).
#[derive(Debug, Clone, Copy)]
pub struct RandomHorizontalFlip {
    probability: f64,
}

impl RandomHorizontalFlip {
    /// Вероятность приводится к `[0, 1]`; `NaN` означает «никогда».
    pub fn new(probability: f64) -> Self {
        let probability = if probability.is_nan() { 0.0 } else { probability.clamp(0.0, 1.0) };
        Self { probability }
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    /// Отражает каждый образец батча независимо.
    pub fn apply<R: Rng + ?Sized>(&self, images: &mut ArrayD<f32>, rng: &mut R) {
        if images.ndim() < 2 {
            return;
        }
        let width_axis = Axis(images.ndim() - 2);
        for mut sample in images.axis_iter_mut(Axis(0)) {
            if rng.gen_bool(self.probability) {
                let mut flipped = sample.to_owned();
                flipped.invert_axis(width_axis);
                sample.assign(&flipped);
            }
        }
    }
}

impl Default for RandomHorizontalFlip {
    fn default() -> Self {
        Self::new(0.5)
    }
}
