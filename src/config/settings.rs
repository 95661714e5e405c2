use std::{
    net::{SocketAddr, ToSocketAddrs},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use config::{Config, Environment, File};
use kometa_error::{bail, ensure, ConfigError, KometaResult};
use serde::{Deserialize, Serialize};

use super::cli::CliArgs;
use crate::{
    channel::{ChannelStore, PersistenceFailurePolicy, RegistryConfig},
    hub::HubConfig,
    logging::LoggingConfig,
};

/// Имя необязательного файла конфигурации в рабочем каталоге (без
/// расширения).
const DEFAULT_CONFIG_NAME: &str = "kometa";

/// Настройки хранения каналов (секция `persistence`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSettings {
    pub enabled: bool,
    /// Восстанавливать каналы при старте.
    pub restore: bool,
    pub data_dir: PathBuf,
    /// Сохранять ли `private_*` и `system`.
    pub persist_reserved_channels: bool,
    pub failure_policy: PersistenceFailurePolicy,
}

/// Настройки сервера.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub listen_address: String,
    /// Определяет ёмкость очередей hub, реестра и чтений каналов.
    pub max_subscribers: usize,
    pub subscriber_queue_size: usize,
    pub control_queue_size: usize,
    pub subscriber_ttl_secs: u64,
    pub cleanup_interval_secs: u64,
    pub long_poll_timeout_secs: u64,
    pub feed_timeout_secs: u64,
    pub heartbeat_secs: u64,
    /// Публиковать состояние брокера в канал `system`.
    pub status_channel: bool,
    /// Каталог статических файлов.
    pub web_root: Option<PathBuf>,
    pub persistence: PersistenceSettings,
    pub logging: LoggingConfig,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            restore: true,
            data_dir: PathBuf::from("data"),
            persist_reserved_channels: false,
            failure_policy: PersistenceFailurePolicy::Report,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8080".to_string(),
            max_subscribers: 20_000,
            subscriber_queue_size: 500,
            control_queue_size: 10,
            subscriber_ttl_secs: 120,
            cleanup_interval_secs: 30,
            long_poll_timeout_secs: 30,
            feed_timeout_secs: 30,
            heartbeat_secs: 30,
            status_channel: true,
            web_root: None,
            persistence: PersistenceSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Settings {
    /// Загружает настройки: значения по умолчанию → файл → переменные
    /// окружения `KOMETA_*`.
    ///
    /// Без явного `file` читается `kometa.{toml,yaml,json}` из рабочего
    /// каталога, если он есть.
    pub fn load(file: Option<&Path>) -> KometaResult<Self> {
        let file_source = match file {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let cfg = Config::builder()
            .set_default("listen_address", "0.0.0.0:8080")
            .map_err(load_error)?
            .add_source(file_source)
            // KOMETA_MAX_SUBSCRIBERS, KOMETA_PERSISTENCE__DATA_DIR, ...
            .add_source(
                Environment::with_prefix("KOMETA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(load_error)?;

        let mut settings: Settings = cfg.try_deserialize().map_err(load_error)?;
        settings.logging.apply_env_overrides();
        Ok(settings)
    }

    /// Загружает настройки с учётом аргументов командной строки и проверяет
    /// их.
    pub fn from_args(args: &CliArgs) -> KometaResult<Self> {
        let mut settings = Self::load(args.config.as_deref())?;
        settings.apply_cli(args);
        settings.validate()?;
        Ok(settings)
    }

    /// Переопределяет адрес и порт из командной строки.
    pub fn apply_cli(
        &mut self,
        args: &CliArgs,
    ) {
        if args.ip.is_none() && args.port.is_none() {
            return;
        }
        let (host, port) = match self.listen_address.rsplit_once(':') {
            Some((host, port)) => (host.to_string(), port.to_string()),
            None => (self.listen_address.clone(), "8080".to_string()),
        };
        let host = args.ip.clone().unwrap_or(host);
        let port = args.port.map(|p| p.to_string()).unwrap_or(port);
        self.listen_address = format!("{host}:{port}");
    }

    pub fn validate(&self) -> KometaResult<()> {
        self.socket_addr()?;

        let sizes = [
            ("max_subscribers", self.max_subscribers),
            ("subscriber_queue_size", self.subscriber_queue_size),
            ("control_queue_size", self.control_queue_size),
        ];
        for (field, value) in sizes {
            ensure!(value > 0, invalid(field, "must be greater than zero"));
        }

        let periods = [
            ("subscriber_ttl_secs", self.subscriber_ttl_secs),
            ("cleanup_interval_secs", self.cleanup_interval_secs),
            ("long_poll_timeout_secs", self.long_poll_timeout_secs),
            ("feed_timeout_secs", self.feed_timeout_secs),
            ("heartbeat_secs", self.heartbeat_secs),
        ];
        for (field, value) in periods {
            ensure!(value > 0, invalid(field, "must be at least one second"));
        }
        ensure!(
            self.subscriber_ttl_secs > self.long_poll_timeout_secs,
            invalid(
                "subscriber_ttl_secs",
                "must be greater than long_poll_timeout_secs"
            )
        );

        if self.persistence.enabled && self.persistence.data_dir.as_os_str().is_empty() {
            return Err(invalid("persistence.data_dir", "must not be empty"));
        }
        if let Some(root) = &self.web_root {
            if !root.is_dir() {
                bail!(invalid(
                    "web_root",
                    &format!("{} is not a directory", root.display()),
                ));
            }
        }

        self.logging.validate()
    }

    /// Адрес для привязки HTTP-сервера.
    pub fn socket_addr(&self) -> KometaResult<SocketAddr> {
        self.listen_address
            .to_socket_addrs()
            .map_err(|e| invalid("listen_address", &e.to_string()))?
            .next()
            .ok_or_else(|| invalid("listen_address", "no address resolved"))
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            queue_size: self.max_subscribers,
            subscriber_queue_size: self.subscriber_queue_size,
            control_queue_size: self.control_queue_size,
            subscriber_ttl: Duration::from_secs(self.subscriber_ttl_secs),
            cleanup_interval: self.cleanup_interval(),
            long_poll_timeout: Duration::from_secs(self.long_poll_timeout_secs),
            feed_timeout: Duration::from_secs(self.feed_timeout_secs),
            heartbeat: Duration::from_secs(self.heartbeat_secs),
        }
    }

    /// Параметры реестра каналов для уже открытого хранилища.
    pub fn registry_config(
        &self,
        store: Option<Arc<dyn ChannelStore>>,
    ) -> RegistryConfig {
        RegistryConfig {
            queue_size: self.max_subscribers,
            channel_mutation_queue: self.control_queue_size,
            store,
            restore: self.persistence.restore,
            persist_reserved_channels: self.persistence.persist_reserved_channels,
            failure_policy: self.persistence.failure_policy,
            abort: None,
        }
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

fn load_error(err: config::ConfigError) -> ConfigError {
    ConfigError::Load {
        reason: err.to_string(),
    }
}

fn invalid(
    field: &str,
    reason: &str,
) -> kometa_error::StackError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
