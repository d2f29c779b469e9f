//! # Neural Network Layers Module
//!
//! Building blocks for constructing the classifier. In the graph-based
//! architecture, each "layer" is a constructor that adds a specific pattern
//! of nodes (operations and parameters) to the ASG.
//!
//! ## Available Layers
//!
//! - [`Conv2d`]: 2D convolution with configurable stride and padding
//! - [`BatchNorm2d`]: per-channel batch normalization
//! - [`Linear`]: fully connected layer
//! - [`ReLU`], [`Softmax`]: activations
//! - [`AvgPool2d`], [`AdaptiveAvgPool2d`]: pooling
//! - [`ChannelPad`]: channel padding with ones for the skip path
//! - [`Switch`]: hard select between two branches
//! - [`ResidualDrop`]: residual block that can be bypassed at random
//!
//! ## Example
//!
//! ```ignore
//! use stochastic_depth::nn::{Conv2d, Conv2dConfig, Module, ReLU};
//! use stochastic_depth::tensor::{GraphContext, Tensor};
//!
//! let ctx = Rc::new(RefCell::new(GraphContext::new()));
//! let conv = Conv2d::from_config(&ctx, "stem.conv", Conv2dConfig::same3x3(3, 16));
//!
//! let x = Tensor::new_input(&ctx, "images");
//! let h = ReLU.forward(&conv.forward(&x));
//! ```

pub mod activations;
pub mod batchnorm;
pub mod conv;
pub mod linear;
pub mod module;
pub mod padding;
pub mod pooling;
pub mod residual_drop;
pub mod switch;

pub use activations::{ReLU, Softmax};
pub use batchnorm::BatchNorm2d;
pub use conv::{Conv2d, Conv2dConfig};
pub use linear::Linear;
pub use module::Module;
pub use padding::ChannelPad;
pub use pooling::{AdaptiveAvgPool2d, AvgPool2d};
pub use residual_drop::{BlockSpec, FeatureShape, ResidualDrop};
pub use switch::Switch;
