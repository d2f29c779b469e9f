//! Конфигурация сети и обучения.
//!
//! [`StochasticDepthConfig`] задаёт геометрию сети, режим отключения блоков
//! и размеры цикла обучения. Сериализуется через `serde` и хранится в JSON:
//!
//! ```json
//! { "blocks_per_stage": 18, "death_mode": "linear-decay", "death_rate": 0.5 }
//! ```
//!
//! Отсутствующие поля берутся из [`Default`].

use crate::error::ConfigError;
use crate::gating::{DeathMode, DeathRateSchedule};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StochasticDepthConfig {
    /// Блоков на стадию (N). Всего в сети `3 * N` блоков.
    pub blocks_per_stage: usize,
    pub batch_size: usize,
    pub num_epochs: usize,
    pub num_classes: usize,
    pub image_channels: usize,
    /// Сторона квадратного входного изображения, кратна 4.
    pub image_size: usize,
    /// Число фильтров входной свёртки.
    pub stem_channels: usize,
    /// Число фильтров каждой из трёх стадий.
    pub stage_channels: [usize; 3],
    pub death_mode: DeathMode,
    /// Максимальная вероятность отключения `p`, в `[0, 1)`.
    pub death_rate: f32,
    /// Seed для сэмплера гейтов и инициализации параметров.
    pub seed: u64,
}

impl Default for StochasticDepthConfig {
    fn default() -> Self {
        Self {
            blocks_per_stage: 18,
            batch_size: 16,
            num_epochs: 500,
            num_classes: 10,
            image_channels: 3,
            image_size: 32,
            stem_channels: 16,
            stage_channels: [16, 32, 32],
            death_mode: DeathMode::LinearDecay,
            death_rate: 0.5,
            seed: 1024,
        }
    }
}

impl StochasticDepthConfig {
    /// Загружает конфигурацию из JSON-файла и проверяет её.
    ///
    /// # Ошибки
    ///
    /// [`ConfigError::File`], если файл не читается, [`ConfigError::Json`]
    /// при неверном JSON или неизвестном режиме отключения, а также любая
    /// ошибка [`validate`](Self::validate).
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::File {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: StochasticDepthConfig = serde_json::from_str(&contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Сохраняет конфигурацию в форматированный JSON, создавая родительские
    /// каталоги при необходимости.
    pub fn to_json(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::File {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|source| ConfigError::File {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Проверяет все поля и возвращает первую найденную ошибку.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.blocks_per_stage == 0 {
            return Err(ConfigError::invalid_value("blocks_per_stage", "must be > 0"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid_value("batch_size", "must be > 0"));
        }
        if self.num_epochs == 0 {
            return Err(ConfigError::invalid_value("num_epochs", "must be > 0"));
        }
        if self.num_classes < 2 {
            return Err(ConfigError::invalid_value("num_classes", "must be >= 2"));
        }
        if self.image_channels == 0 {
            return Err(ConfigError::invalid_value("image_channels", "must be > 0"));
        }
        if self.image_size == 0 || self.image_size % 4 != 0 {
            return Err(ConfigError::invalid_value(
                "image_size",
                format!("must be a positive multiple of 4, got {}", self.image_size),
            ));
        }
        if self.stem_channels == 0 {
            return Err(ConfigError::invalid_value("stem_channels", "must be > 0"));
        }
        let [c1, c2, c3] = self.stage_channels;
        if c1 < self.stem_channels || c2 < c1 || c3 < c2 {
            return Err(ConfigError::invalid_value(
                "stage_channels",
                format!(
                    "must be non-decreasing from stem_channels {}, got {:?}",
                    self.stem_channels, self.stage_channels
                ),
            ));
        }
        if !(0.0..1.0).contains(&self.death_rate) {
            return Err(ConfigError::invalid_value(
                "death_rate",
                format!("must be in [0, 1), got {}", self.death_rate),
            ));
        }
        Ok(())
    }

    /// Общее число residual-блоков.
    pub fn total_blocks(&self) -> usize {
        3 * self.blocks_per_stage
    }

    pub fn schedule(&self) -> DeathRateSchedule {
        DeathRateSchedule::new(self.death_mode, self.death_rate)
    }
}
