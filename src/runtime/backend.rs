//! Модуль, определяющий абстрактный интерфейс (трейт) для исполнительных бэкендов.

use crate::asg::{Asg, AsgId, NodeId, Value};
use std::collections::HashMap;
use thiserror::Error;

/// Ошибки, которые могут возникнуть во время выполнения графа.
/// Этот тип ошибок является общим для всех бэкендов.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("Node {0} not found in graph {1}. Check that the graph was built correctly.")]
    NodeNotFound(NodeId, AsgId),

    #[error("Type mismatch: operation expected {expected}, got {actual}.")]
    TypeError { expected: String, actual: String },

    #[error("Tensor shape error: {0}.")]
    ShapeError(String),

    #[error("No value for input '{0}' (node {1}). Add it to the feeds passed to backend.run().")]
    MissingInput(String, NodeId),

    #[error("No value for parameter '{0}' (node {1}). Initialise parameters before running the graph.")]
    MissingParameter(String, NodeId),
}

/// Кэш для хранения уже вычисленных значений узлов.
/// Ключ - это (AsgId, NodeId).
pub type Memo<T> = HashMap<(AsgId, NodeId), T>;

/// Трейт, определяющий общий интерфейс для исполнительной среды (бэкенда).
///
/// Любой бэкенд принимает ASG с именованными данными и исполняет его.
pub trait Backend {
    /// Представление значения на устройстве.
    type DeviceData: std::fmt::Debug;

    /// Переносит именованные значения на устройство.
    fn load_data(
        &self,
        data: &HashMap<String, Value>,
    ) -> Result<HashMap<String, Self::DeviceData>, RuntimeError>;

    /// Выполняет граф, используя и обновляя кэш вычислений.
    ///
    /// `initial_memo` содержит значения входов и параметров. Возвращает
    /// выходы в порядке `main_asg.outputs` вместе с итоговым кэшем.
    fn run(
        &self,
        main_asg: &Asg,
        initial_memo: Memo<Self::DeviceData>,
    ) -> Result<(Vec<Self::DeviceData>, Memo<Self::DeviceData>), RuntimeError>;

    /// Забирает результат с устройства обратно в виде CPU-значения (`Value`).
    fn retrieve_data(&self, device_data: &[Self::DeviceData]) -> Result<Vec<Value>, RuntimeError>;
}

/// Загружает `feeds` на устройство и привязывает их к именованным узлам графа.
///
/// Значения, имя которых не совпадает ни с одним узлом `Input`/`Parameter`,
/// пропускаются: один набор входов годится и для графа, который использует
/// только его часть.
pub fn memo_from_feeds<B: Backend>(
    backend: &B,
    asg: &Asg,
    feeds: &HashMap<String, Value>,
) -> Result<Memo<B::DeviceData>, RuntimeError> {
    let device_data = backend.load_data(feeds)?;
    let mut memo = HashMap::new();
    for (name, data) in device_data {
        if let Some(node_id) = asg.find_named(&name) {
            memo.insert((asg.id, node_id), data);
        }
    }
    Ok(memo)
}
