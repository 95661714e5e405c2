use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки актора состояния канала.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    /// Актор канала остановлен и не принимает запросы.
    #[error("channel actor '{channel}' is gone")]
    ActorGone { channel: String },

    /// Мутация применена, но запись в хранилище не удалась.
    #[error("failed to persist channel '{channel}': {reason}")]
    PersistenceFailed { channel: String, reason: String },
}

/// Ошибки хранилища каналов.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Ошибка файловой системы.
    #[error("store io error at {path}: {reason}")]
    Io { path: String, reason: String },

    /// Не удалось сериализовать запись канала.
    #[error("failed to serialize channel '{channel}': {reason}")]
    Serialize { channel: String, reason: String },

    /// Запись на диске повреждена.
    #[error("corrupted channel record {path}: {reason}")]
    Corrupted { path: String, reason: String },
}

impl ErrorExt for ChannelError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ActorGone { .. } => StatusCode::ActorUnavailable,
            Self::PersistenceFailed { .. } => StatusCode::PersistenceFailed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            Self::ActorGone { .. } => "Channel unavailable".to_string(),
            Self::PersistenceFailed { channel, .. } => {
                format!("Failed to persist channel {channel}")
            }
        }
    }
}

impl ErrorExt for StoreError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Io { .. } => StatusCode::StorageUnavailable,
            Self::Serialize { .. } => StatusCode::SerializationFailed,
            Self::Corrupted { .. } => StatusCode::CorruptedData,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        "Channel storage unavailable".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_error_codes() {
        let err = ChannelError::ActorGone {
            channel: "news".into(),
        };
        assert_eq!(err.status_code(), StatusCode::ActorUnavailable);
        assert_eq!(err.client_message(), "Channel unavailable");
    }

    /// Тест проверяет, что подробности ошибки хранилища (пути) не уходят
    /// клиенту.
    #[test]
    fn test_store_error_hidden_from_client() {
        let err = StoreError::Io {
            path: "/var/lib/kometa/news.json".into(),
            reason: "permission denied".into(),
        };
        assert_eq!(err.status_code(), StatusCode::StorageUnavailable);
        assert!(err.to_string().contains("/var/lib/kometa"));
        assert_eq!(err.client_message(), "Channel storage unavailable");

        let err = StoreError::Corrupted {
            path: "x.json".into(),
            reason: "eof".into(),
        };
        assert!(err.status_code().is_critical());
    }
}
