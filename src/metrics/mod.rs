// --- Файл: src/metrics/mod.rs ---

//! Метрики для оценки классификатора во время обучения и валидации.
//!
//! - [`Accuracy`]: доля верно предсказанных классов (argmax против one-hot меток)
//! - [`RunningMean`]: онлайн-среднее для потерь и числа закрытых гейтов за эпоху
//!
//! ```rust,ignore
//! use stochastic_depth::metrics::{Accuracy, Metric};
//!
//! let mut accuracy = Accuracy::new();
//! accuracy.update(&probabilities, &one_hot_labels);
//! println!("Accuracy: {:.4}", accuracy.compute());
//! ```

pub mod classification;
pub mod running;

pub use classification::Accuracy;
pub use running::RunningMean;

/// Базовый трейт для всех метрик.
pub trait Metric {
    /// Тип предсказания
    type Prediction;
    /// Тип целевого значения
    type Target;
    /// Тип результата метрики
    type Output;

    /// Обновляет состояние метрики новыми данными.
    fn update(&mut self, predictions: &Self::Prediction, targets: &Self::Target);

    /// Вычисляет текущее значение метрики.
    fn compute(&self) -> Self::Output;

    fn reset(&mut self);

    fn name(&self) -> &str;
}
