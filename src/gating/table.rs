//! Реестр состояния гейтов для всех residual-блоков сети.
//!
//! Каждый блок при построении добавляет одну [`GateEntry`] и хранит только
//! полученный [`GateHandle`]. Сэмплер меняет состояние только здесь, а граф
//! читает его через именованные входы из [`GateTable::feeds`].

use crate::asg::Value;
use ndarray::arr0;
use std::collections::HashMap;

/// Префикс булевого входа графа с гейтом блока.
pub const GATE_INPUT_PREFIX: &str = "gate";
/// Префикс скалярного входа графа с вероятностью отключения блока.
pub const DEATH_RATE_INPUT_PREFIX: &str = "death_rate";

/// Стабильный индекс записи блока, выдаётся при добавлении.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GateHandle(usize);

impl GateHandle {
    /// Позиция записи в порядке построения (по глубине).
    pub fn index(self) -> usize {
        self.0
    }

    /// Имя входа графа, через который читается гейт блока.
    pub fn gate_input(self) -> String {
        format!("{}.{}", GATE_INPUT_PREFIX, self.0)
    }

    /// Имя входа графа с вероятностью отключения блока.
    pub fn death_rate_input(self) -> String {
        format!("{}.{}", DEATH_RATE_INPUT_PREFIX, self.0)
    }
}

/// Состояние гейта одного residual-блока.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateEntry {
    /// Вероятность обхода блока на шаге обучения, в `[0, 1)`.
    pub death_rate: f32,
    /// `true`: блок активен, `false`: блок обходится.
    pub gate: bool,
}

impl GateEntry {
    /// Открытый гейт с нулевой вероятностью до назначения расписания.
    pub fn open() -> Self {
        Self { death_rate: 0.0, gate: true }
    }
}

impl Default for GateEntry {
    fn default() -> Self {
        Self::open()
    }
}

/// Упорядоченная коллекция записей гейтов, только с добавлением.
///
/// Порядок вставки совпадает с порядком построения, то есть с глубиной.
/// Хэндл индексирует только свою таблицу: чужой хэндл либо вызовет панику
/// при выходе за границы, либо адресует не тот блок.
#[derive(Debug, Clone, Default)]
pub struct GateTable {
    entries: Vec<GateEntry>,
}

impl GateTable {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn append(&mut self, entry: GateEntry) -> GateHandle {
        self.entries.push(entry);
        GateHandle(self.entries.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// # Паника
    /// Если `handle` получен не из этой таблицы.
    pub fn gate(&self, handle: GateHandle) -> bool {
        self.entries[handle.0].gate
    }

    /// # Паника
    /// Если `handle` получен не из этой таблицы.
    pub fn set_gate(&mut self, handle: GateHandle, open: bool) {
        self.entries[handle.0].gate = open;
    }

    /// # Паника
    /// Если `handle` получен не из этой таблицы.
    pub fn death_rate(&self, handle: GateHandle) -> f32 {
        self.entries[handle.0].death_rate
    }

    /// # Паника
    /// Если `handle` получен не из этой таблицы.
    pub fn set_death_rate(&mut self, handle: GateHandle, rate: f32) {
        self.entries[handle.0].death_rate = rate;
    }

    /// Хэндлы всех записей в порядке глубины.
    pub fn handles(&self) -> impl Iterator<Item = GateHandle> + '_ {
        (0..self.entries.len()).map(GateHandle)
    }

    pub fn entries(&self) -> &[GateEntry] {
        &self.entries
    }

    pub fn open_all(&mut self) {
        for entry in &mut self.entries {
            entry.gate = true;
        }
    }

    pub fn open_count(&self) -> usize {
        self.entries.iter().filter(|e| e.gate).count()
    }

    pub fn closed_count(&self) -> usize {
        self.len() - self.open_count()
    }

    /// Текущее состояние в виде именованных входов графа:
    /// `gate.<i>` как булев скаляр и `death_rate.<i>` как 0-мерный тензор.
    pub fn feeds(&self) -> HashMap<String, Value> {
        let mut feeds = HashMap::with_capacity(self.entries.len() * 2);
        for (handle, entry) in self.handles().zip(&self.entries) {
            feeds.insert(handle.gate_input(), Value::ScalarBool(entry.gate));
            feeds.insert(
                handle.death_rate_input(),
                Value::Tensor(arr0(entry.death_rate).into_dyn()),
            );
        }
        feeds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_assigns_sequential_handles() {
        let mut table = GateTable::new();
        let a = table.append(GateEntry::open());
        let b = table.append(GateEntry::open());
        assert_eq!((a.index(), b.index()), (0, 1));
        assert_eq!(table.handles().collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(b.gate_input(), "gate.1");
        assert_eq!(b.death_rate_input(), "death_rate.1");
    }

    #[test]
    fn open_all_restores_every_gate() {
        let mut table = GateTable::new();
        let handles: Vec<_> = (0..4).map(|_| table.append(GateEntry::open())).collect();
        table.set_gate(handles[1], false);
        table.set_gate(handles[3], false);
        assert_eq!(table.open_count(), 2);
        assert_eq!(table.closed_count(), 2);

        table.open_all();
        assert_eq!(table.open_count(), 4);
    }

    #[test]
    fn feeds_reflect_live_state() {
        let mut table = GateTable::new();
        let h = table.append(GateEntry::open());
        table.set_death_rate(h, 0.25);
        table.set_gate(h, false);

        let feeds = table.feeds();
        assert_eq!(feeds.len(), 2);
        assert_eq!(feeds["gate.0"], Value::ScalarBool(false));
        assert_eq!(feeds["death_rate.0"], Value::Tensor(arr0(0.25f32).into_dyn()));
    }

    #[test]
    #[should_panic]
    fn foreign_handle_panics() {
        let mut other = GateTable::new();
        other.append(GateEntry::open());
        let foreign = other.append(GateEntry::open());
        GateTable::new().gate(foreign);
    }
}
