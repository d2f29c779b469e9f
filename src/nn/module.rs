//! Base `Module` trait shared by all layers.

use crate::tensor::Tensor;

/// Common interface of every layer.
///
/// A module does not compute anything: `forward` appends its pattern of
/// nodes to the graph that `inputs` lives in and returns the resulting
/// symbolic tensor.
pub trait Module {
    /// Symbolic forward pass.
    fn forward(&self, inputs: &Tensor) -> Tensor;

    /// Trainable parameters owned by this module, as `Parameter` nodes.
    fn parameters(&self) -> Vec<Tensor>;
}
