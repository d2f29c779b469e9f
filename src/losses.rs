// --- File: src/losses.rs ---

//! Loss functions in graph paradigm.
//!
//! Loss functions here are regular Rust functions that take symbolic
//! `Tensor` descriptors and append the nodes needed to compute the error.

use crate::tensor::Tensor;

/// Added to probabilities before the logarithm so that a zero probability
/// yields a large finite loss instead of infinity.
pub const PROB_EPS: f32 = 1e-7;

/// Categorical cross-entropy over softmax outputs, averaged over the batch.
///
/// Formula: `CE = -sum(y_true * log(y_pred + eps)) / batch_size`.
///
/// # Arguments
///
/// * `y_pred` - Symbolic `[batch, classes]` probabilities.
/// * `y_true` - Symbolic one-hot labels of the same shape.
/// * `batch_size` - Number of rows in the batch.
pub fn categorical_cross_entropy(y_pred: &Tensor, y_true: &Tensor, batch_size: usize) -> Tensor {
    let ctx = &y_pred.context;
    let eps = Tensor::scalar(ctx, PROB_EPS);
    let inv_batch = Tensor::scalar(ctx, 1.0 / batch_size.max(1) as f32);

    let log_probs = (y_pred + &eps).log();
    let total = (y_true * &log_probs).sum().neg();
    &total * &inv_batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asg::Value;
    use crate::runtime::backend::{memo_from_feeds, Backend};
    use crate::runtime::cpu_backend::CpuBackend;
    use crate::tensor::GraphContext;
    use ndarray::array;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    #[test]
    fn cross_entropy_matches_hand_computation() {
        let ctx = Rc::new(RefCell::new(GraphContext::new()));
        let pred = Tensor::new_input(&ctx, "pred");
        let truth = Tensor::new_input(&ctx, "truth");
        let loss = categorical_cross_entropy(&pred, &truth, 2);
        let mut graph = ctx.borrow().main_graph().clone();
        graph.set_outputs(vec![loss.node_id]);

        let feeds = HashMap::from([
            ("pred".to_string(), Value::Tensor(array![[0.5f32, 0.5], [0.25, 0.75]].into_dyn())),
            ("truth".to_string(), Value::Tensor(array![[1.0f32, 0.0], [0.0, 1.0]].into_dyn())),
        ]);
        let backend = CpuBackend::new();
        let memo = memo_from_feeds(&backend, &graph, &feeds).unwrap();
        let (outputs, _) = backend.run(&graph, memo).unwrap();
        let Value::Tensor(value) = &outputs[0] else {
            panic!("expected a tensor");
        };

        let expected = -(0.5f32.ln() + 0.75f32.ln()) / 2.0;
        let got = value.first().copied().unwrap();
        assert!((got - expected).abs() < 1e-4, "{} vs {}", got, expected);
    }
}
