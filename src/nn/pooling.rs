// --- File: src/nn/pooling.rs ---

//! Pooling layers for CNNs.

use crate::nn::module::Module;
use crate::tensor::Tensor;

/// Average Pooling 2D layer without padding.
///
/// Computes the mean of each window of an `[N, C, H, W]` input.
pub struct AvgPool2d {
    /// Window size (kH, kW).
    pub kernel_size: (usize, usize),
    /// Stride (stride_h, stride_w).
    pub stride: (usize, usize),
}

impl AvgPool2d {
    pub fn new(kernel_size: (usize, usize), stride: (usize, usize)) -> Self {
        Self { kernel_size, stride }
    }

    /// Creates AvgPool2d with equal kernel_size and stride.
    pub fn square(size: usize) -> Self {
        Self::new((size, size), (size, size))
    }
}

impl Module for AvgPool2d {
    fn forward(&self, inputs: &Tensor) -> Tensor {
        inputs.avg_pool2d(self.kernel_size, self.stride)
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![] // Pooling layers have no trainable parameters
    }
}

/// Adaptive Average Pooling 2D.
///
/// Computes the windows needed to reach the target output size regardless
/// of the input size.
///
/// ```rust,ignore
/// // Always outputs [N, C, 1, 1]
/// let gap = AdaptiveAvgPool2d::global();
/// let output = gap.forward(&input);
/// ```
pub struct AdaptiveAvgPool2d {
    /// Target output size (H_out, W_out).
    pub output_size: (usize, usize),
}

impl AdaptiveAvgPool2d {
    pub fn new(output_size: (usize, usize)) -> Self {
        Self { output_size }
    }

    /// Global Average Pooling: output size (1, 1).
    pub fn global() -> Self {
        Self { output_size: (1, 1) }
    }
}

impl Module for AdaptiveAvgPool2d {
    fn forward(&self, inputs: &Tensor) -> Tensor {
        inputs.adaptive_avg_pool2d(self.output_size)
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![]
    }
}
