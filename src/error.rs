//! Ошибки уровня модели и обучения.
//!
//! Движок графа держит свои ошибки рядом с кодом, который их порождает
//! (`AsgError`, `ShapeInferenceError`, `RuntimeError`). Здесь собраны
//! ошибки слоёв, построенных поверх него:
//!
//! ```text
//! Error (верхний уровень)
//! ├── ConfigError   (проверка конфигурации, чтение файла, режим отключения)
//! ├── BuildError    (построение сети, проверка форм)
//! └── SessionError  (исполнение графа при обучении и валидации)
//! ```

use crate::analysis::shape_inference::ShapeInferenceError;
use crate::runtime::backend::RuntimeError;
use std::path::PathBuf;
use thiserror::Error;

/// Псевдоним `Result` для ошибки верхнего уровня.
pub type Result<T> = std::result::Result<T, Error>;

pub type BuildResult<T> = std::result::Result<T, BuildError>;

pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Ошибка верхнего уровня: для бинарника и для кода, который связывает
/// конфигурацию, построение и обучение.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Ошибки загрузки и проверки конфигурации.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Имя режима отключения не входит в число поддерживаемых.
    #[error("Unknown death mode `{0}`; expected `uniform` or `linear-decay`")]
    UnknownDeathMode(String),

    /// Недопустимое значение поля.
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// Файл конфигурации не удалось прочитать или записать.
    #[error("Cannot access config file `{path}`: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigError {
    pub fn invalid_value<S: Into<String>>(field: &'static str, reason: S) -> Self {
        ConfigError::InvalidValue { field, reason: reason.into() }
    }
}

/// Ошибки построения графа сети. Все фатальны: сеть, которая не
/// построилась, не запускается.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Объявленные формы блока нельзя соединить через skip-путь.
    #[error("Shape mismatch in block {block}: {reason}")]
    ShapeMismatch { block: String, reason: String },

    #[error("Channel padding amount must be positive")]
    EmptyPadding,

    #[error("Shape inference failed on the finished network: {0}")]
    ShapeInference(#[from] ShapeInferenceError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BuildError {
    pub fn shape_mismatch<S: Into<String>>(block: &str, reason: S) -> Self {
        BuildError::ShapeMismatch { block: block.to_string(), reason: reason.into() }
    }
}

/// Ошибки исполнения сети.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Graph execution failed: {0}")]
    Runtime(#[from] RuntimeError),

    /// Граф вернул меньше выходов или выходы другого вида, чем ожидалось.
    #[error("Unexpected graph output: {0}")]
    UnexpectedOutput(String),

    #[error("Batch shape mismatch: expected {expected:?}, got {actual:?}")]
    BatchShape { expected: Vec<usize>, actual: Vec<usize> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_convert_into_top_level() {
        let err: Error = ConfigError::UnknownDeathMode("cosine".into()).into();
        assert!(err.to_string().contains("cosine"));

        let err: Error = BuildError::shape_mismatch("block.3", "channels shrink").into();
        assert!(matches!(err, Error::Build(BuildError::ShapeMismatch { .. })));
    }
}
