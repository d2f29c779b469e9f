//! Назначение вероятностей отключения (death rates) блокам.

use super::table::GateTable;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Правило, сопоставляющее глубине блока его вероятность отключения.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeathMode {
    /// Все блоки получают одну и ту же вероятность `p`.
    Uniform,
    /// Блок `i` из `total` получает `p * i / total`: первый блок не
    /// отключается никогда, более глубокие отключаются чаще.
    LinearDecay,
}

impl DeathMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeathMode::Uniform => "uniform",
            DeathMode::LinearDecay => "linear-decay",
        }
    }
}

impl FromStr for DeathMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uniform" => Ok(DeathMode::Uniform),
            "linear-decay" | "lin_decay" => Ok(DeathMode::LinearDecay),
            other => Err(ConfigError::UnknownDeathMode(other.to_string())),
        }
    }
}

impl TryFrom<String> for DeathMode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeathMode> for String {
    fn from(mode: DeathMode) -> Self {
        mode.as_str().to_string()
    }
}

impl fmt::Display for DeathMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Назначает вероятности, когда известно общее число блоков.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeathRateSchedule {
    pub mode: DeathMode,
    pub max_rate: f32,
}

impl DeathRateSchedule {
    pub fn new(mode: DeathMode, max_rate: f32) -> Self {
        Self { mode, max_rate }
    }

    /// Вероятность для блока `index` в сети из `total` блоков.
    pub fn rate_for(&self, index: usize, total: usize) -> f32 {
        match self.mode {
            DeathMode::Uniform => self.max_rate,
            DeathMode::LinearDecay if total == 0 => 0.0,
            DeathMode::LinearDecay => self.max_rate * index as f32 / total as f32,
        }
    }

    /// Записывает вероятность в каждую запись `table`. Вызывается после
    /// добавления последнего блока.
    pub fn apply(&self, table: &mut GateTable) {
        let total = table.len();
        let handles: Vec<_> = table.handles().collect();
        for handle in handles {
            table.set_death_rate(handle, self.rate_for(handle.index(), total));
        }
        tracing::debug!(mode = %self.mode, max_rate = self.max_rate, blocks = total, "death rates assigned");
    }
}
