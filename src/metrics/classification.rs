// --- Файл: src/metrics/classification.rs ---

//! Метрики для задач классификации.

use super::Metric;
use ndarray::{ArrayD, ArrayView1, Axis, Ix1};

/// Индекс максимального элемента строки; NaN считается равным всему.
fn argmax(row: ArrayView1<'_, f32>) -> usize {
    row.iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Точность многоклассовой классификации.
///
/// Предсказания `[batch, classes]` (вероятности или логиты) сравниваются по
/// argmax с one-hot метками той же формы.
#[derive(Debug, Clone, Default)]
pub struct Accuracy {
    correct: usize,
    total: usize,
}

impl Accuracy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn correct(&self) -> usize {
        self.correct
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

impl Metric for Accuracy {
    type Prediction = ArrayD<f32>;
    type Target = ArrayD<f32>;
    type Output = f64;

    fn update(&mut self, predictions: &Self::Prediction, targets: &Self::Target) {
        if predictions.ndim() != 2 || predictions.shape() != targets.shape() {
            tracing::warn!(
                predictions = ?predictions.shape(),
                targets = ?targets.shape(),
                "accuracy update skipped: shapes differ"
            );
            return;
        }
        for (pred, target) in predictions.axis_iter(Axis(0)).zip(targets.axis_iter(Axis(0))) {
            let pred = pred.into_dimensionality::<Ix1>().ok();
            let target = target.into_dimensionality::<Ix1>().ok();
            if let (Some(pred), Some(target)) = (pred, target) {
                if argmax(pred) == argmax(target) {
                    self.correct += 1;
                }
                self.total += 1;
            }
        }
    }

    fn compute(&self) -> Self::Output {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }

    fn reset(&mut self) {
        self.correct = 0;
        self.total = 0;
    }

    fn name(&self) -> &str {
        "Accuracy"
    }
}
