//! Модуль, реализующий полносвязный (линейный) слой в графовой парадигме.

use crate::nn::module::Module;
use crate::tensor::{GraphContext, Tensor};
use std::cell::RefCell;
use std::rc::Rc;

/// Полносвязный (линейный) слой.
///
/// В графовой архитектуре этот слой не хранит реальных данных. Вместо этого
/// он владеет символьными `Tensor`-дескрипторами, которые представляют его
/// веса (`weights`, форма `[in, out]`) и смещения (`bias`, форма `[out]`)
/// как узлы `Parameter` в ASG.
///
/// Метод `forward` добавляет в граф операции, соответствующие формуле `y = xW + b`.
pub struct Linear {
    pub weights: Tensor,
    pub bias: Tensor,
    pub in_features: usize,
    pub out_features: usize,
}

impl Linear {
    /// Создает новый полносвязный слой, регистрируя его параметры в графе
    /// под именами `<name>.weights` и `<name>.bias`.
    pub fn new(
        context: &Rc<RefCell<GraphContext>>,
        in_features: usize,
        out_features: usize,
        name: &str,
    ) -> Self {
        let weights = Tensor::new_parameter(context, &format!("{}.weights", name), vec![in_features, out_features]);
        let bias = Tensor::new_parameter(context, &format!("{}.bias", name), vec![out_features]);
        Self { weights, bias, in_features, out_features }
    }
}

impl Module for Linear {
    /// Конструирует подграф `inputs.dot(weights) + bias`.
    fn forward(&self, inputs: &Tensor) -> Tensor {
        let dot_product = inputs.dot(&self.weights);
        &dot_product + &self.bias
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![self.weights.clone(), self.bias.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_have_declared_shapes() {
        let ctx = Rc::new(RefCell::new(GraphContext::new()));
        let fc = Linear::new(&ctx, 32, 10, "head.fc");
        let graph = ctx.borrow().main_graph().clone();
        assert_eq!(graph.get_node(fc.weights.node_id).unwrap().shape, Some(vec![32, 10]));
        assert_eq!(graph.get_node(fc.bias.node_id).unwrap().shape, Some(vec![10]));
    }
}
