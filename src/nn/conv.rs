//! Convolutional layer for images in `[N, C, H, W]` layout.

use crate::nn::module::Module;
use crate::tensor::{GraphContext, Tensor};
use std::cell::RefCell;
use std::rc::Rc;

/// Configuration for a [`Conv2d`] layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Conv2dConfig {
    pub in_channels: usize,
    /// Number of filters.
    pub out_channels: usize,
    pub kernel_size: (usize, usize),
    pub stride: (usize, usize),
    pub padding: (usize, usize),
    pub bias: bool,
}

impl Conv2dConfig {
    pub fn new(in_channels: usize, out_channels: usize, kernel_size: (usize, usize)) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size,
            stride: (1, 1),
            padding: (0, 0),
            bias: true,
        }
    }

    /// 3x3 kernel with "same" padding: spatial size is kept at stride 1 and
    /// divided by the stride otherwise.
    pub fn same3x3(in_channels: usize, out_channels: usize) -> Self {
        Self::new(in_channels, out_channels, (3, 3)).with_padding((1, 1))
    }

    pub fn with_stride(mut self, stride: (usize, usize)) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_padding(mut self, padding: (usize, usize)) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    /// Shape of the weight parameter: `[C_out, C_in, kH, kW]`.
    pub fn weight_shape(&self) -> Vec<usize> {
        vec![self.out_channels, self.in_channels, self.kernel_size.0, self.kernel_size.1]
    }

    /// Spatial output size for an input of `(h, w)`.
    pub fn output_hw(&self, (h, w): (usize, usize)) -> (usize, usize) {
        let out = |size: usize, k: usize, s: usize, p: usize| (size + 2 * p).saturating_sub(k) / s + 1;
        (
            out(h, self.kernel_size.0, self.stride.0, self.padding.0),
            out(w, self.kernel_size.1, self.stride.1, self.padding.1),
        )
    }
}

/// 2D convolution layer.
///
/// Applies a convolution to an input of shape `[N, C_in, H, W]` and produces
/// `[N, C_out, H_out, W_out]`.
///
/// ```rust,ignore
/// let conv = Conv2d::from_config(&ctx, "stem.conv", Conv2dConfig::same3x3(3, 16));
/// let y = conv.forward(&x);
/// ```
pub struct Conv2d {
    /// Weight of shape `[C_out, C_in, kH, kW]`.
    pub weight: Tensor,
    /// Optional bias of shape `[C_out]`.
    pub bias: Option<Tensor>,
    pub config: Conv2dConfig,
}

impl Conv2d {
    pub fn new(
        context: &Rc<RefCell<GraphContext>>,
        name: &str,
        in_channels: usize,
        out_channels: usize,
        kernel_size: (usize, usize),
    ) -> Self {
        Self::from_config(context, name, Conv2dConfig::new(in_channels, out_channels, kernel_size))
    }

    /// Registers the layer's parameters under `<name>.weight` / `<name>.bias`.
    pub fn from_config(context: &Rc<RefCell<GraphContext>>, name: &str, config: Conv2dConfig) -> Self {
        let weight = Tensor::new_parameter(context, &format!("{}.weight", name), config.weight_shape());
        let bias = config
            .bias
            .then(|| Tensor::new_parameter(context, &format!("{}.bias", name), vec![config.out_channels]));
        Self { weight, bias, config }
    }
}

impl Module for Conv2d {
    fn forward(&self, inputs: &Tensor) -> Tensor {
        inputs.conv2d(&self.weight, self.bias.as_ref(), self.config.stride, self.config.padding)
    }

    fn parameters(&self) -> Vec<Tensor> {
        let mut params = vec![self.weight.clone()];
        params.extend(self.bias.iter().cloned());
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asg::NodeType;

    #[test]
    fn test_conv2d_creation() {
        let context = Rc::new(RefCell::new(GraphContext::new()));
        let conv = Conv2d::from_config(&context, "conv1", Conv2dConfig::same3x3(3, 16).with_stride((2, 2)));

        assert_eq!(conv.config.padding, (1, 1));
        assert_eq!(conv.parameters().len(), 2);
        let graph = context.borrow().main_graph().clone();
        assert_eq!(graph.get_node(conv.weight.node_id).unwrap().shape, Some(vec![16, 3, 3, 3]));
    }

    #[test]
    fn test_conv2d_forward_adds_node() {
        let context = Rc::new(RefCell::new(GraphContext::new()));
        let input = Tensor::new_input(&context, "input");
        let conv = Conv2d::new(&context, "conv1", 3, 8, (3, 3));
        conv.forward(&input);

        let graph = context.borrow().main_graph().clone();
        assert_eq!(graph.count_nodes(|n| matches!(n, NodeType::Conv2d { .. })), 1);
    }

    #[test]
    fn test_conv2d_no_bias() {
        let context = Rc::new(RefCell::new(GraphContext::new()));
        let conv = Conv2d::from_config(&context, "conv1", Conv2dConfig::new(3, 64, (3, 3)).with_bias(false));
        assert!(conv.bias.is_none());
        assert_eq!(conv.parameters().len(), 1);
    }

    #[test]
    fn same_padding_output_size() {
        let cfg = Conv2dConfig::same3x3(16, 32);
        assert_eq!(cfg.output_hw((32, 32)), (32, 32));
        assert_eq!(cfg.with_stride((2, 2)).output_hw((32, 32)), (16, 16));
    }
}
