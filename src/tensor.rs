//! Модуль, определяющий `Tensor` и `GraphContext`.
//!
//! `Tensor` не хранит данные. Это лёгкий дескриптор узла в абстрактном
//! семантическом графе (ASG): любая операция над ним не вычисляет, а
//! добавляет узел в граф. `GraphContext` владеет строящимся графом.

use crate::asg::{Asg, DType, NodeId, NodeType, Shape, Value};
use ndarray::arr0;
use std::cell::RefCell;
use std::ops::{Add, Div, Mul, Sub};
use std::rc::Rc;

/// Контекст, который владеет и управляет построением ASG.
///
/// Оборачивается в `Rc<RefCell<_>>`, чтобы его разделяли многие `Tensor`.
#[derive(Debug, Clone)]
pub struct GraphContext {
    main_graph: Asg,
}

impl GraphContext {
    /// Создает новый, пустой контекст графа.
    pub fn new() -> Self {
        Self { main_graph: Asg::new(0) }
    }

    pub fn main_graph_mut(&mut self) -> &mut Asg {
        &mut self.main_graph
    }

    pub fn main_graph(&self) -> &Asg {
        &self.main_graph
    }
}

impl Default for GraphContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Символьный дескриптор узла в графе вычислений.
#[derive(Debug, Clone)]
pub struct Tensor {
    /// ID узла в ASG, который представляет этот тензор.
    pub node_id: NodeId,
    /// Разделяемая ссылка на контекст, в котором строится граф.
    pub context: Rc<RefCell<GraphContext>>,
}

impl Tensor {
    /// Создаёт узел `Input`. Значения входов подаются по имени при исполнении.
    pub fn new_input(context: &Rc<RefCell<GraphContext>>, name: &str) -> Self {
        let mut ctx = context.borrow_mut();
        let graph = ctx.main_graph_mut();
        let node_id = graph.add_node(Some(name.to_string()), NodeType::Input { name: name.to_string() });
        graph.inputs.push(node_id);
        Self { node_id, context: Rc::clone(context) }
    }

    /// Создаёт обучаемый узел `Parameter` с объявленной формой.
    ///
    /// Форма записывается в узел, откуда её читают инициализация и вывод
    /// форм.
    pub fn new_parameter(context: &Rc<RefCell<GraphContext>>, name: &str, shape: Shape) -> Self {
        let mut ctx = context.borrow_mut();
        let graph = ctx.main_graph_mut();
        let node_id = graph.add_node(Some(name.to_string()), NodeType::Parameter { name: name.to_string() });
        if let Ok(node) = graph.get_node_mut(node_id) {
            node.shape = Some(shape);
            node.dtype = Some(DType::F32);
        }
        Self { node_id, context: Rc::clone(context) }
    }

    /// 0-мерный литерал, транслируется на любой тензор в поэлементных операциях.
    pub fn scalar(context: &Rc<RefCell<GraphContext>>, value: f32) -> Self {
        let node_id = context
            .borrow_mut()
            .main_graph_mut()
            .add_node(None, NodeType::Literal(Value::Tensor(arr0(value).into_dyn())));
        Self { node_id, context: Rc::clone(context) }
    }

    /// Добавляет `node_type` в граф, которому принадлежит этот тензор.
    fn derive(&self, node_type: NodeType) -> Self {
        let node_id = self.context.borrow_mut().main_graph_mut().add_node(None, node_type);
        Self { node_id, context: Rc::clone(&self.context) }
    }

    // --- Математические операции ---

    pub fn dot(&self, other: &Tensor) -> Self {
        self.derive(NodeType::MatrixMultiply(self.node_id, other.node_id))
    }

    pub fn neg(&self) -> Self {
        self.derive(NodeType::Negate(self.node_id))
    }

    pub fn log(&self) -> Self {
        self.derive(NodeType::Log(self.node_id))
    }

    // --- Функции активации ---

    pub fn relu(&self) -> Self {
        self.derive(NodeType::ReLU(self.node_id))
    }

    /// Softmax по последней оси.
    pub fn softmax(&self) -> Self {
        self.derive(NodeType::Softmax(self.node_id))
    }

    // --- Операции редукции ---

    pub fn sum(&self) -> Self {
        self.derive(NodeType::Sum(self.node_id))
    }

    // --- Операции трансформации ---

    pub fn flatten(&self) -> Self {
        self.derive(NodeType::Flatten(self.node_id))
    }

    /// Дописывает `amount` каналов со значением `value` по оси 1.
    pub fn pad_channels(&self, amount: usize, value: f32) -> Self {
        self.derive(NodeType::PadChannels { input: self.node_id, amount, value })
    }

    // --- Свёртки, нормализация, пулинг ---

    pub fn conv2d(
        &self,
        weight: &Tensor,
        bias: Option<&Tensor>,
        stride: (usize, usize),
        padding: (usize, usize),
    ) -> Self {
        self.derive(NodeType::Conv2d {
            input: self.node_id,
            weight: weight.node_id,
            bias: bias.map(|b| b.node_id),
            stride,
            padding,
        })
    }

    pub fn batch_norm2d(&self, gamma: &Tensor, beta: &Tensor, eps: f32) -> Self {
        self.derive(NodeType::BatchNorm2d {
            input: self.node_id,
            gamma: gamma.node_id,
            beta: beta.node_id,
            eps,
        })
    }

    pub fn avg_pool2d(&self, kernel_size: (usize, usize), stride: (usize, usize)) -> Self {
        self.derive(NodeType::AvgPool2d { input: self.node_id, kernel_size, stride })
    }

    pub fn adaptive_avg_pool2d(&self, output_size: (usize, usize)) -> Self {
        self.derive(NodeType::AdaptiveAvgPool2d { input: self.node_id, output_size })
    }

    // --- Управляющие ---

    /// `self` служит условием: `on_true`, если оно истинно, иначе `on_false`.
    pub fn switch(&self, on_true: &Tensor, on_false: &Tensor) -> Self {
        self.derive(NodeType::Switch {
            condition: self.node_id,
            on_true: on_true.node_id,
            on_false: on_false.node_id,
        })
    }
}

// Реализация операторов для удобного синтаксиса `a + b`.

impl Add<&Tensor> for &Tensor {
    type Output = Tensor;
    fn add(self, rhs: &Tensor) -> Self::Output {
        self.derive(NodeType::Add(self.node_id, rhs.node_id))
    }
}

impl Sub<&Tensor> for &Tensor {
    type Output = Tensor;
    fn sub(self, rhs: &Tensor) -> Self::Output {
        self.derive(NodeType::Subtract(self.node_id, rhs.node_id))
    }
}

impl Mul<&Tensor> for &Tensor {
    type Output = Tensor;
    fn mul(self, rhs: &Tensor) -> Self::Output {
        self.derive(NodeType::Multiply(self.node_id, rhs.node_id))
    }
}

impl Div<&Tensor> for &Tensor {
    type Output = Tensor;
    fn div(self, rhs: &Tensor) -> Self::Output {
        self.derive(NodeType::Divide(self.node_id, rhs.node_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_append_nodes() {
        let ctx = Rc::new(RefCell::new(GraphContext::new()));
        let x = Tensor::new_input(&ctx, "x");
        let y = Tensor::new_input(&ctx, "y");
        let z = &x + &y;
        let graph = ctx.borrow().main_graph().clone();
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.inputs, vec![x.node_id, y.node_id]);
        assert_eq!(graph.get_node(z.node_id).unwrap().node_type, NodeType::Add(x.node_id, y.node_id));
    }

    #[test]
    fn parameters_carry_their_shape() {
        let ctx = Rc::new(RefCell::new(GraphContext::new()));
        let w = Tensor::new_parameter(&ctx, "w", vec![4, 2]);
        let graph = ctx.borrow().main_graph().clone();
        assert_eq!(graph.get_node(w.node_id).unwrap().shape, Some(vec![4, 2]));
        assert!(graph.inputs.is_empty());
    }
}
