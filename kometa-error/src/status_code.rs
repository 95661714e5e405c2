use std::fmt;

use num_enum::TryFromPrimitive;
#[cfg(feature = "serde_repr")]
use serde_repr::{Deserialize_repr, Serialize_repr};
#[cfg(feature = "strum")]
use strum_macros::{AsRefStr, EnumIter};

/// Коды статуса для категоризации ошибок.
///
/// # Диапазоны:
/// - 0xxx: Успех
/// - 1xxx: Общие ошибки и конфигурация
/// - 2xxx: Ошибки данных (каналы, подписчики)
/// - 5xxx: Хранилище каналов
/// - 6xxx: Сеть / IO
/// - 8xxx: Протокольные ошибки транспорта
/// - 9xxx: Акторы (почтовые ящики)
///
/// # Реализация:
/// - `num_enum::TryFromPrimitive` даёт нативную реализацию `TryFrom<u32>`.
/// - опционально: `strum` для `AsRefStr`/`EnumIter` (feature = "strum").
/// - опционально: `serde_repr` для сериализации в виде числового значения
///   (feature = "serde_repr").
#[cfg_attr(feature = "strum", derive(AsRefStr, EnumIter))]
#[cfg_attr(feature = "serde_repr", derive(Serialize_repr, Deserialize_repr))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 0xxx: Успех ===
    Success = 0,

    // === 1xxx: Общие ошибки ===
    Unknown = 1000,
    Unexpected = 1002,
    Internal = 1003,
    InvalidArgs = 1004,
    InvalidConfig = 1005,

    // === 2xxx: Ошибки данных ===
    NotFound = 2000,
    SubscriberNotFound = 2003,

    // === 5xxx: Хранилище ===
    StorageUnavailable = 5000,
    DiskFull = 5001,
    CorruptedData = 5002,
    SerializationFailed = 5003,
    PersistenceFailed = 5005,

    // === 6xxx: Сеть/IO ===
    Io = 6000,
    ConnectionClosed = 6001,
    Timeout = 6002,
    ConnectionFailed = 6003,
    UnexpectedEof = 6004,
    BindFailed = 6005,

    // === 8xxx: Протокол ===
    InvalidCommand = 8000,
    InvalidUtf8 = 8001,
    MalformedEnvelope = 8002,

    // === 9xxx: Акторы ===
    ActorUnavailable = 9000,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Пытается получить вариант `StatusCode` из `u32`.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Требуется ли логировать как критическую ошибку.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::Internal
                | Self::CorruptedData
                | Self::DiskFull
                | Self::StorageUnavailable
                | Self::PersistenceFailed
        )
    }

    /// Рекомендуемый уровень логирования для данного кода.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Success => LogLevel::Trace,
            Self::NotFound | Self::SubscriberNotFound => LogLevel::Debug,
            Self::InvalidArgs
            | Self::InvalidCommand
            | Self::InvalidUtf8
            | Self::MalformedEnvelope => LogLevel::Info,
            code if code.is_critical() => LogLevel::Error,
            _ => LogLevel::Warn,
        }
    }

    /// HTTP-статус, соответствующий коду статуса.
    ///
    /// Используется HTTP-транспортом при ответе на ошибку команды.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Success => 200,
            Self::NotFound | Self::SubscriberNotFound => 404,
            Self::InvalidArgs
            | Self::InvalidCommand
            | Self::MalformedEnvelope
            | Self::InvalidUtf8 => 400,
            Self::Timeout => 408,
            Self::StorageUnavailable | Self::ActorUnavailable => 503,
            _ => 500,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        #[cfg(feature = "strum")]
        {
            write!(f, "{} ({})", self.as_ref(), self.code())
        }
        #[cfg(not(feature = "strum"))]
        {
            write!(f, "{:?} ({})", self, self.code())
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
