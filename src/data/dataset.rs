// --- Файл: src/data/dataset.rs ---

//! Синтетический набор изображений с one-hot метками.

use ndarray::{ArrayD, Axis, IxDyn};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::seq::SliceRandom;
use rand::Rng;

/// Изображения `[N, C, S, S]` с one-hot метками `[N, classes]` в памяти.
///
/// Каждый класс сдвигает среднее одного канала, поэтому классификатор
/// различает классы заметно лучше случайного угадывания.
#[derive(Debug, Clone)]
pub struct SyntheticDataset {
    images: ArrayD<f32>,
    labels: ArrayD<f32>,
}

impl SyntheticDataset {
    /// Генерирует `samples` изображений `channels x size x size`, классы
    /// назначаются по кругу.
    pub fn generate<R: Rng + ?Sized>(
        samples: usize,
        channels: usize,
        size: usize,
        classes: usize,
        rng: &mut R,
    ) -> Self {
        let mut images = ArrayD::<f32>::random_using(IxDyn(&[samples, channels, size, size]), StandardNormal, rng);
        let mut labels = ArrayD::zeros(IxDyn(&[samples, classes]));

        for i in 0..samples {
            let class = i % classes.max(1);
            labels[[i, class]] = 1.0;
            let channel = class % channels.max(1);
            let shift = 1.0 + class as f32 / classes as f32;
            images
                .index_axis_mut(Axis(0), i)
                .index_axis_mut(Axis(0), channel)
                .mapv_inplace(|v| v + shift);
        }
        Self { images, labels }
    }

    /// Оборачивает готовые массивы; `None`, если число образцов различается.
    pub fn from_arrays(images: ArrayD<f32>, labels: ArrayD<f32>) -> Option<Self> {
        (images.shape().first() == labels.shape().first()).then_some(Self { images, labels })
    }

    pub fn len(&self) -> usize {
        self.images.shape()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn images(&self) -> &ArrayD<f32> {
        &self.images
    }

    pub fn labels(&self) -> &ArrayD<f32> {
        &self.labels
    }

    /// Заменяет изображения, например стандартизованной копией.
    pub fn map_images(self, f: impl FnOnce(ArrayD<f32>) -> ArrayD<f32>) -> Self {
        Self { images: f(self.images), labels: self.labels }
    }

    /// Перемешанные полные батчи. Неполный хвостовой батч отбрасывается.
    pub fn batches<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Vec<(ArrayD<f32>, ArrayD<f32>)> {
        if batch_size == 0 {
            return Vec::new();
        }
        let mut indices: Vec<usize> = (0..self.len()).collect();
        indices.shuffle(rng);
        indices
            .chunks_exact(batch_size)
            .map(|chunk| (self.images.select(Axis(0), chunk), self.labels.select(Axis(0), chunk)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn generate_has_one_hot_labels() {
        let ds = SyntheticDataset::generate(7, 3, 4, 10, &mut StdRng::seed_from_u64(0));
        assert_eq!(ds.len(), 7);
        assert_eq!(ds.images().shape(), &[7, 3, 4, 4]);
        for row in ds.labels().axis_iter(Axis(0)) {
            assert_eq!(row.sum(), 1.0);
        }
    }

    #[test]
    fn batches_are_full_and_shuffled() {
        let ds = SyntheticDataset::generate(10, 1, 2, 2, &mut StdRng::seed_from_u64(0));
        let batches = ds.batches(4, &mut StdRng::seed_from_u64(1));
        assert_eq!(batches.len(), 2);
        for (images, labels) in &batches {
            assert_eq!(images.shape(), &[4, 1, 2, 2]);
            assert_eq!(labels.shape(), &[4, 2]);
        }
    }

    #[test]
    fn mismatched_arrays_are_rejected() {
        let images = ArrayD::zeros(IxDyn(&[3, 1, 2, 2]));
        let labels = ArrayD::zeros(IxDyn(&[2, 2]));
        assert!(SyntheticDataset::from_arrays(images, labels).is_none());
    }
}
