use std::path::PathBuf;

use kometa_error::{ConfigError, KometaResult};
use serde::{Deserialize, Serialize};

/// Уровни, которые понимает `EnvFilter` без дополнительных директив.
const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Формат вывода в консоль.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Настройки консольного вывода.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_line_numbers: bool,
}

/// Настройки файлового вывода (ежедневная ротация).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FileConfig {
    pub enabled: bool,
    /// Префикс имени файла; к нему `tracing-appender` добавляет дату.
    pub filename: String,
}

/// Конфигурация подсистемы логирования (секция `logging` в настройках).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Базовый уровень: `trace`, `debug`, `info`, `warn`, `error`.
    pub level: String,
    /// Дополнительные директивы для отдельных модулей, например
    /// `kometa::hub=debug`.
    pub directives: Vec<String>,
    pub log_dir: PathBuf,
    pub console: ConsoleConfig,
    pub file: FileConfig,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl LoggingConfig {
    /// Применяет переопределения из окружения `KOMETA_LOG_LEVEL` и
    /// `KOMETA_LOG_FORMAT`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("KOMETA_LOG_LEVEL") {
            self.level = level.to_lowercase();
        }
        if let Ok(format) = std::env::var("KOMETA_LOG_FORMAT") {
            match format.to_lowercase().as_str() {
                "json" => self.console.format = LogFormat::Json,
                "compact" => self.console.format = LogFormat::Compact,
                "pretty" => self.console.format = LogFormat::Pretty,
                _ => {}
            }
        }
    }

    /// Проверяет корректность конфигурации.
    pub fn validate(&self) -> KometaResult<()> {
        if !LEVELS.contains(&self.level.as_str()) {
            return Err(ConfigError::Invalid {
                field: "logging.level".to_string(),
                reason: format!("unknown level '{}'", self.level),
            }
            .into());
        }
        if self.file.enabled && self.file.filename.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "logging.file.filename".to_string(),
                reason: "must not be empty".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Создаёт каталог для файлов логов, если файловый вывод включён.
    pub fn ensure_log_dir(&self) -> KometaResult<()> {
        if self.file.enabled {
            std::fs::create_dir_all(&self.log_dir)?;
        }
        Ok(())
    }

    /// Собирает директиву для `EnvFilter`: базовый уровень плюс
    /// пользовательские директивы через запятую.
    pub fn build_filter_directive(&self) -> String {
        let mut parts = Vec::with_capacity(self.directives.len() + 1);
        parts.push(self.level.clone());
        parts.extend(self.directives.iter().cloned());
        parts.join(",")
    }

    pub fn console_format(&self) -> LogFormat {
        self.console.format
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: LogFormat::Pretty,
            with_ansi: true,
            with_target: true,
            with_thread_ids: false,
            with_line_numbers: false,
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            filename: "kometa.log".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directives: Vec::new(),
            log_dir: PathBuf::from("logs"),
            console: ConsoleConfig::default(),
            file: FileConfig::default(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    /// Тест проверяет, что конфигурация по умолчанию валидна.
    #[test]
    fn test_default_is_valid() {
        let cfg = LoggingConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.build_filter_directive(), "info");
    }

    /// Тест проверяет, что неизвестный уровень отклоняется.
    #[test]
    fn test_unknown_level_rejected() {
        let cfg = LoggingConfig {
            level: "verbose".to_string(),
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("logging.level"));
    }

    #[test]
    fn test_filter_directive_with_modules() {
        let cfg = LoggingConfig {
            level: "warn".to_string(),
            directives: vec!["kometa::hub=debug".to_string()],
            ..Default::default()
        };
        assert_eq!(cfg.build_filter_directive(), "warn,kometa::hub=debug");
    }

    /// Тест проверяет переопределение уровня и формата из окружения.
    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("KOMETA_LOG_LEVEL", "DEBUG");
        std::env::set_var("KOMETA_LOG_FORMAT", "json");

        let mut cfg = LoggingConfig::default();
        cfg.apply_env_overrides();

        std::env::remove_var("KOMETA_LOG_LEVEL");
        std::env::remove_var("KOMETA_LOG_FORMAT");

        assert_eq!(cfg.level, "debug");
        assert_eq!(cfg.console_format(), LogFormat::Json);
    }

    #[test]
    fn test_ensure_log_dir_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = LoggingConfig {
            log_dir: tmp.path().join("nested").join("logs"),
            file: FileConfig {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        };
        cfg.ensure_log_dir().unwrap();
        assert!(cfg.log_dir.is_dir());
    }
}
