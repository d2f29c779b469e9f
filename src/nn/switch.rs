//! Жёсткий тернарный выбор между двумя подграфами.

use crate::tensor::Tensor;

/// Выбирает один из двух тензоров одной формы по скалярному условию,
/// которое подаётся при исполнении.
///
/// Истинное условие (`true` или ненулевое) даёт первый тензор без
/// изменений, иначе второй. Градиент получает только выбранная ветка; у
/// самого условия градиента нет.
#[derive(Debug, Clone)]
pub struct Switch {
    pub condition: Tensor,
}

impl Switch {
    pub fn new(condition: &Tensor) -> Self {
        Self { condition: condition.clone() }
    }

    pub fn select(&self, on_true: &Tensor, on_false: &Tensor) -> Tensor {
        self.condition.switch(on_true, on_false)
    }
}
