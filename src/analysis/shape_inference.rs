//! Module for shape and data type inference (Shape Inference).
//!
//! Traverses the computation graph and determines the shape
//! and data type of the output tensor for each node based on its input shapes and operation type.

use crate::asg::{Asg, AsgError, DType, Node, NodeId, NodeType, Shape, Value};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShapeInferenceError {
    #[error("Graph error: {0}")]
    AsgError(#[from] AsgError),

    #[error("Incompatible shapes for operation '{op}': left operand {shape1:?}, right operand {shape2:?}. \
             Ensure dimensions are compatible for broadcasting or matrix multiplication.")]
    IncompatibleShapes {
        op: String,
        shape1: Shape,
        shape2: Shape,
    },

    #[error("Shape information missing for node {0}. \
             This may mean the node has not been processed by shape inference yet or the graph contains a cyclic dependency.")]
    MissingShapeInfo(NodeId),

    #[error("Initial shape not specified for '{0}'. \
             Add the shape to the initial_shapes HashMap when calling ShapeInference::run().")]
    MissingInitialShape(String),

    #[error("Invalid tensor rank for node {node_id}: expected {expected}D, got {actual}D. \
             Check input data dimensions.")]
    InvalidRank {
        node_id: NodeId,
        expected: usize,
        actual: usize,
    },

    #[error("Switch condition of node {node_id} must be a scalar, got shape {shape:?}.")]
    NonScalarCondition { node_id: NodeId, shape: Shape },

    #[error("Window {window:?} does not fit spatial extent {extent:?} at node {node_id}.")]
    WindowTooLarge {
        node_id: NodeId,
        window: (usize, usize),
        extent: (usize, usize),
    },
}

type Result<T> = std::result::Result<T, ShapeInferenceError>;

/// Structure that performs shape inference for ASG.
pub struct ShapeInference;

impl ShapeInference {
    /// Runs the shape inference process for the graph.
    ///
    /// Modifies the graph in-place, filling in the `shape` and `dtype` fields for each node.
    ///
    /// # Arguments
    /// * `asg` - Mutable reference to the graph to analyze.
    /// * `initial_shapes` - Shapes and types for `Input` nodes, keyed by name.
    ///   `Parameter` nodes may carry their declared shape instead.
    pub fn run(asg: &mut Asg, initial_shapes: &HashMap<String, (Shape, DType)>) -> Result<()> {
        let sorted_nodes = Self::topological_sort(asg)?;

        for node_id in sorted_nodes {
            let mut node = asg.get_node(node_id)?.clone();

            let (shape, dtype) = Self::infer_node_shape(asg, &node, initial_shapes)?;

            node.shape = Some(shape);
            node.dtype = Some(dtype);
            asg.nodes.insert(node_id, node);
        }

        Ok(())
    }

    /// Main shape inference logic for a single node.
    fn infer_node_shape(
        asg: &Asg,
        node: &Node,
        initial_shapes: &HashMap<String, (Shape, DType)>,
    ) -> Result<(Shape, DType)> {
        match &node.node_type {
            NodeType::Input { name } => initial_shapes
                .get(name)
                .cloned()
                .ok_or_else(|| ShapeInferenceError::MissingInitialShape(name.clone())),

            NodeType::Parameter { name } => match (&node.shape, node.dtype) {
                (Some(shape), Some(dtype)) => Ok((shape.clone(), dtype)),
                _ => initial_shapes
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ShapeInferenceError::MissingInitialShape(name.clone())),
            },

            NodeType::Literal(value) => match value {
                Value::Tensor(arr) => Ok((arr.shape().to_vec(), DType::F32)),
                Value::ScalarBool(_) => Ok((vec![], DType::Bool)),
                Value::ScalarF32(_) => Ok((vec![], DType::F32)),
            },

            NodeType::Add(l, r)
            | NodeType::Subtract(l, r)
            | NodeType::Multiply(l, r)
            | NodeType::Divide(l, r) => {
                let (ls, ld) = Self::get_shape_dtype(asg, *l)?;
                let (rs, _) = Self::get_shape_dtype(asg, *r)?;
                let out = broadcast_shapes(&ls, &rs).ok_or_else(|| ShapeInferenceError::IncompatibleShapes {
                    op: op_name(&node.node_type).to_string(),
                    shape1: ls.clone(),
                    shape2: rs.clone(),
                })?;
                Ok((out, ld))
            }

            NodeType::MatrixMultiply(l, r) => {
                let (ls, ld) = Self::get_shape_dtype(asg, *l)?;
                let (rs, _) = Self::get_shape_dtype(asg, *r)?;

                if ls.len() != 2 || rs.len() != 2 {
                    return Err(ShapeInferenceError::InvalidRank {
                        node_id: node.id,
                        expected: 2,
                        actual: if ls.len() != 2 { ls.len() } else { rs.len() },
                    });
                }
                if ls[1] != rs[0] {
                    return Err(ShapeInferenceError::IncompatibleShapes {
                        op: "MatrixMultiply".to_string(),
                        shape1: ls,
                        shape2: rs,
                    });
                }
                Ok((vec![ls[0], rs[1]], ld))
            }

            // Element-wise operations - shape unchanged
            NodeType::Negate(id) | NodeType::Log(id) | NodeType::ReLU(id) | NodeType::Softmax(id) => {
                Self::get_shape_dtype(asg, *id)
            }

            NodeType::Sum(_) => Ok((vec![], DType::F32)),

            NodeType::Flatten(id) => {
                let (shape, dtype) = Self::get_shape_dtype(asg, *id)?;
                if shape.is_empty() {
                    return Err(ShapeInferenceError::InvalidRank { node_id: node.id, expected: 1, actual: 0 });
                }
                let rest: usize = shape[1..].iter().product();
                Ok((vec![shape[0], rest], dtype))
            }

            NodeType::PadChannels { input, amount, .. } => {
                let (mut shape, dtype) = Self::expect_4d(asg, node.id, *input)?;
                shape[1] += amount;
                Ok((shape, dtype))
            }

            // Conv2d: [N, C_in, H, W] -> [N, C_out, H_out, W_out]
            NodeType::Conv2d { input, weight, bias, stride, padding } => {
                let (input_shape, dtype) = Self::expect_4d(asg, node.id, *input)?;
                let (weight_shape, _) = Self::expect_4d(asg, node.id, *weight)?;

                if input_shape[1] != weight_shape[1] {
                    return Err(ShapeInferenceError::IncompatibleShapes {
                        op: "Conv2d".to_string(),
                        shape1: input_shape,
                        shape2: weight_shape,
                    });
                }
                if let Some(b) = bias {
                    let (bias_shape, _) = Self::get_shape_dtype(asg, *b)?;
                    if bias_shape != vec![weight_shape[0]] {
                        return Err(ShapeInferenceError::IncompatibleShapes {
                            op: "Conv2d bias".to_string(),
                            shape1: weight_shape,
                            shape2: bias_shape,
                        });
                    }
                }

                let (n, h, w) = (input_shape[0], input_shape[2], input_shape[3]);
                let (kh, kw) = (weight_shape[2], weight_shape[3]);
                if h + 2 * padding.0 < kh || w + 2 * padding.1 < kw {
                    return Err(ShapeInferenceError::WindowTooLarge {
                        node_id: node.id,
                        window: (kh, kw),
                        extent: (h, w),
                    });
                }

                let out_h = (h + 2 * padding.0 - kh) / stride.0 + 1;
                let out_w = (w + 2 * padding.1 - kw) / stride.1 + 1;
                Ok((vec![n, weight_shape[0], out_h, out_w], dtype))
            }

            NodeType::BatchNorm2d { input, gamma, beta, .. } => {
                let (input_shape, dtype) = Self::expect_4d(asg, node.id, *input)?;
                for param in [gamma, beta] {
                    let (param_shape, _) = Self::get_shape_dtype(asg, *param)?;
                    if param_shape != vec![input_shape[1]] {
                        return Err(ShapeInferenceError::IncompatibleShapes {
                            op: "BatchNorm2d".to_string(),
                            shape1: input_shape,
                            shape2: param_shape,
                        });
                    }
                }
                Ok((input_shape, dtype))
            }

            // AvgPool2d: [N, C, H, W] -> [N, C, H_out, W_out]
            NodeType::AvgPool2d { input, kernel_size, stride } => {
                let (input_shape, dtype) = Self::expect_4d(asg, node.id, *input)?;
                let (h, w) = (input_shape[2], input_shape[3]);
                if h < kernel_size.0 || w < kernel_size.1 {
                    return Err(ShapeInferenceError::WindowTooLarge {
                        node_id: node.id,
                        window: *kernel_size,
                        extent: (h, w),
                    });
                }
                let out_h = (h - kernel_size.0) / stride.0 + 1;
                let out_w = (w - kernel_size.1) / stride.1 + 1;
                Ok((vec![input_shape[0], input_shape[1], out_h, out_w], dtype))
            }

            NodeType::AdaptiveAvgPool2d { input, output_size } => {
                let (input_shape, dtype) = Self::expect_4d(asg, node.id, *input)?;
                Ok((vec![input_shape[0], input_shape[1], output_size.0, output_size.1], dtype))
            }

            NodeType::Switch { condition, on_true, on_false } => {
                let (cond_shape, _) = Self::get_shape_dtype(asg, *condition)?;
                if cond_shape.iter().product::<usize>() != 1 {
                    return Err(ShapeInferenceError::NonScalarCondition {
                        node_id: node.id,
                        shape: cond_shape,
                    });
                }
                let (ts, td) = Self::get_shape_dtype(asg, *on_true)?;
                let (fs, _) = Self::get_shape_dtype(asg, *on_false)?;
                if ts != fs {
                    return Err(ShapeInferenceError::IncompatibleShapes {
                        op: "Switch".to_string(),
                        shape1: ts,
                        shape2: fs,
                    });
                }
                Ok((ts, td))
            }
        }
    }

    /// Helper function to get already computed shape and type for a node.
    fn get_shape_dtype(asg: &Asg, node_id: NodeId) -> Result<(Shape, DType)> {
        let node = asg.get_node(node_id)?;
        match (&node.shape, &node.dtype) {
            (Some(s), Some(d)) => Ok((s.clone(), *d)),
            _ => Err(ShapeInferenceError::MissingShapeInfo(node_id)),
        }
    }

    fn expect_4d(asg: &Asg, consumer: NodeId, operand: NodeId) -> Result<(Shape, DType)> {
        let (shape, dtype) = Self::get_shape_dtype(asg, operand)?;
        if shape.len() != 4 {
            return Err(ShapeInferenceError::InvalidRank {
                node_id: consumer,
                expected: 4, // [N, C, H, W]
                actual: shape.len(),
            });
        }
        Ok((shape, dtype))
    }

    /// Performs topological sort of the graph.
    /// Returns a vector of node IDs in order suitable for computation.
    pub fn topological_sort(asg: &Asg) -> Result<Vec<NodeId>> {
        let mut sorted = Vec::new();
        let mut visited = HashSet::new();
        // IMPORTANT: need to traverse all outputs, not just one
        for output_id in &asg.outputs {
            Self::build_sorted_graph(*output_id, asg, &mut visited, &mut sorted)?;
        }
        Ok(sorted)
    }

    fn build_sorted_graph(
        node_id: NodeId,
        asg: &Asg,
        visited: &mut HashSet<NodeId>,
        sorted: &mut Vec<NodeId>,
    ) -> Result<()> {
        if visited.contains(&node_id) {
            return Ok(());
        }

        let node = asg.get_node(node_id)?;
        for input_id in node.node_type.operands() {
            Self::build_sorted_graph(input_id, asg, visited, sorted)?;
        }

        if visited.insert(node_id) {
            sorted.push(node_id);
        }
        Ok(())
    }
}

/// Numpy-style broadcast of two shapes, or `None` when they are incompatible.
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Option<Shape> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(out)
}

fn op_name(node_type: &NodeType) -> &'static str {
    match node_type {
        NodeType::Add(..) => "Add",
        NodeType::Subtract(..) => "Subtract",
        NodeType::Multiply(..) => "Multiply",
        NodeType::Divide(..) => "Divide",
        _ => "Elementwise",
    }
}
