use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки загрузки и валидации конфигурации.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Источник конфигурации не читается или не разбирается.
    #[error("failed to load configuration: {reason}")]
    Load { reason: String },

    /// Значение поля вне допустимого диапазона.
    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

impl ErrorExt for ConfigError {
    fn status_code(&self) -> StatusCode {
        StatusCode::InvalidConfig
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
