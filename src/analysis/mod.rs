//! # Graph Analysis Module
//!
//! Analysis passes that process the ASG before execution.
//!
//! - [`ShapeInference`](shape_inference::ShapeInference): propagates tensor
//!   shapes through the graph, detecting shape mismatches before runtime.
//!
//! ```text
//! ASG (untyped) -> Shape Inference -> ASG (with shapes/dtypes)
//! ```
//!
//! The stochastic-depth builder runs this pass over every finished network,
//! so a residual branch and skip path that disagree in shape fail at build
//! time instead of during a training step.

pub mod shape_inference;
