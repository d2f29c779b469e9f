//! ASG: Абстрактный семантический граф
//!
//! Каждая операция над символьным [`Tensor`](crate::tensor::Tensor)
//! добавляет сюда один [`Node`]. Затем граф проверяется выводом форм и
//! исполняется [`Backend`](crate::runtime::backend::Backend).

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Идентификатор узла
pub type NodeId = usize;
/// Идентификатор графа
pub type AsgId = usize;
/// Форма тензора
pub type Shape = Vec<usize>;

pub type AsgResult<T> = std::result::Result<T, AsgError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AsgError {
    #[error("Node with ID {0} not found")]
    NodeNotFound(NodeId),
    #[error("Invalid shape on node {0}")]
    InvalidShape(NodeId),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    F32,
    Bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// ID узла (дублируем ключ HashMap для удобства вызовов в других модулях)
    pub id: NodeId,
    pub name: Option<String>,
    pub node_type: NodeType,
    pub shape: Option<Shape>,
    pub dtype: Option<DType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeType {
    // Данные
    Input { name: String },
    Parameter { name: String },
    Literal(Value),

    // Бинарные (elementwise, с трансляцией скаляров)
    Add(NodeId, NodeId),
    Subtract(NodeId, NodeId),
    Multiply(NodeId, NodeId),
    Divide(NodeId, NodeId),
    MatrixMultiply(NodeId, NodeId),

    // Унарные
    Negate(NodeId),
    Log(NodeId),
    ReLU(NodeId),
    Softmax(NodeId),

    // Редукции
    Sum(NodeId),

    // Трансформации
    /// Сворачивает в `[dim0, rest...]`, сохраняя ведущую (batch) ось.
    Flatten(NodeId),
    /// Дописывает `amount` каналов со значением `value` после существующих
    /// каналов входа `[N, C, H, W]`.
    PadChannels { input: NodeId, amount: usize, value: f32 },

    // Свёртка и нормализация, формат [N, C, H, W]
    Conv2d {
        input: NodeId,
        weight: NodeId,
        bias: Option<NodeId>,
        stride: (usize, usize),
        padding: (usize, usize),
    },
    /// Поканальная нормализация по batch и пространственным осям.
    BatchNorm2d { input: NodeId, gamma: NodeId, beta: NodeId, eps: f32 },

    // Пулинг
    AvgPool2d { input: NodeId, kernel_size: (usize, usize), stride: (usize, usize) },
    AdaptiveAvgPool2d { input: NodeId, output_size: (usize, usize) },

    // Управляющие
    /// Жёсткий тернарный выбор: `on_true`, если скалярное `condition`
    /// истинно или ненулевое, иначе `on_false`. Формы веток совпадают.
    ///
    /// Выбор не гладкий. Градиент идёт только в выбранную ветку; градиент по
    /// `condition` не определён и считается нулевым.
    Switch { condition: NodeId, on_true: NodeId, on_false: NodeId },
}

impl NodeType {
    /// ID операндов в порядке вычисления.
    pub fn operands(&self) -> Vec<NodeId> {
        match self {
            NodeType::Input { .. } | NodeType::Parameter { .. } | NodeType::Literal(_) => vec![],

            NodeType::Add(a, b)
            | NodeType::Subtract(a, b)
            | NodeType::Multiply(a, b)
            | NodeType::Divide(a, b)
            | NodeType::MatrixMultiply(a, b) => vec![*a, *b],

            NodeType::Negate(a)
            | NodeType::Log(a)
            | NodeType::ReLU(a)
            | NodeType::Softmax(a)
            | NodeType::Sum(a)
            | NodeType::Flatten(a) => vec![*a],

            NodeType::PadChannels { input, .. }
            | NodeType::AvgPool2d { input, .. }
            | NodeType::AdaptiveAvgPool2d { input, .. } => vec![*input],

            NodeType::Conv2d { input, weight, bias, .. } => {
                let mut deps = vec![*input, *weight];
                if let Some(b) = bias {
                    deps.push(*b);
                }
                deps
            }
            NodeType::BatchNorm2d { input, gamma, beta, .. } => vec![*input, *gamma, *beta],
            NodeType::Switch { condition, on_true, on_false } => {
                vec![*condition, *on_true, *on_false]
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Tensor(ArrayD<f32>),
    ScalarF32(f32),
    ScalarBool(bool),
}

impl Value {
    /// Истинность скалярного условия: `true` или любое ненулевое число.
    ///
    /// `None` для тензоров из более чем одного элемента.
    pub fn as_condition(&self) -> Option<bool> {
        match self {
            Value::ScalarBool(b) => Some(*b),
            Value::ScalarF32(v) => Some(*v != 0.0),
            Value::Tensor(t) if t.len() == 1 => t.first().map(|v| *v != 0.0),
            Value::Tensor(_) => None,
        }
    }

    /// Читаемое название вида значения для ошибок типов.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Tensor(_) => "Tensor",
            Value::ScalarF32(_) => "ScalarF32",
            Value::ScalarBool(_) => "ScalarBool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asg {
    pub id: AsgId,
    pub nodes: HashMap<NodeId, Node>,
    pub inputs: Vec<NodeId>,
    pub outputs: Vec<NodeId>,
}

impl Asg {
    pub fn new(id: AsgId) -> Self {
        Self { id, nodes: HashMap::new(), inputs: vec![], outputs: vec![] }
    }

    pub fn add_node(&mut self, name: Option<String>, node_type: NodeType) -> NodeId {
        let new_id = self.nodes.len();
        let mut node = Node { id: new_id, name, node_type, shape: None, dtype: None };

        // Автопроставление shape/dtype для литералов, чтобы инференс не падал на MissingShapeInfo
        match &node.node_type {
            NodeType::Literal(Value::Tensor(arr)) => {
                node.shape = Some(arr.shape().to_vec());
                node.dtype = Some(DType::F32);
            }
            NodeType::Literal(Value::ScalarF32(_)) => {
                node.shape = Some(vec![]);
                node.dtype = Some(DType::F32);
            }
            NodeType::Literal(Value::ScalarBool(_)) => {
                node.shape = Some(vec![]);
                node.dtype = Some(DType::Bool);
            }
            _ => {}
        }

        self.nodes.insert(new_id, node);
        new_id
    }

    pub fn set_outputs(&mut self, outputs: Vec<NodeId>) {
        self.outputs = outputs;
    }

    pub fn get_node(&self, id: NodeId) -> AsgResult<&Node> {
        self.nodes.get(&id).ok_or(AsgError::NodeNotFound(id))
    }

    pub fn get_node_mut(&mut self, id: NodeId) -> AsgResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(AsgError::NodeNotFound(id))
    }

    /// Находит узел `Input` или `Parameter`, зарегистрированный под `name`.
    pub fn find_named(&self, name: &str) -> Option<NodeId> {
        self.nodes.values().find_map(|n| match &n.node_type {
            NodeType::Input { name: n_name } | NodeType::Parameter { name: n_name }
                if n_name == name =>
            {
                Some(n.id)
            }
            _ => None,
        })
    }

    /// Считает узлы, удовлетворяющие `pred`. Удобно для проверок структуры.
    pub fn count_nodes(&self, pred: impl Fn(&NodeType) -> bool) -> usize {
        self.nodes.values().filter(|n| pred(&n.node_type)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_nodes_get_shape_and_dtype() {
        let mut asg = Asg::new(0);
        let id = asg.add_node(None, NodeType::Literal(Value::ScalarBool(true)));
        let node = asg.get_node(id).unwrap();
        assert_eq!(node.shape, Some(vec![]));
        assert_eq!(node.dtype, Some(DType::Bool));
    }

    #[test]
    fn find_named_locates_inputs() {
        let mut asg = Asg::new(0);
        asg.add_node(None, NodeType::Input { name: "x".into() });
        let gate = asg.add_node(None, NodeType::Input { name: "gate.0".into() });
        assert_eq!(asg.find_named("gate.0"), Some(gate));
        assert_eq!(asg.find_named("missing"), None);
    }

    #[test]
    fn condition_truthiness() {
        assert_eq!(Value::ScalarBool(false).as_condition(), Some(false));
        assert_eq!(Value::ScalarF32(2.0).as_condition(), Some(true));
        let t = Value::Tensor(ndarray::arr0(0.0f32).into_dyn());
        assert_eq!(t.as_condition(), Some(false));
        let wide = Value::Tensor(ndarray::ArrayD::zeros(ndarray::IxDyn(&[2])));
        assert_eq!(wide.as_condition(), None);
    }
}
