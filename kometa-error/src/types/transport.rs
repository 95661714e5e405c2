use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки транспортного слоя (HTTP и WebSocket).
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Сообщение WebSocket не разбирается как JSON-конверт.
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope { reason: String },

    /// Неизвестная команда.
    #[error("unknown command '{command}'")]
    UnknownCommand { command: String },

    /// Не удалось занять адрес для прослушивания.
    #[error("failed to bind {address}: {reason}")]
    Bind { address: String, reason: String },

    /// Соединение закрыто удалённой стороной.
    #[error("connection closed")]
    ConnectionClosed,
}

impl ErrorExt for TransportError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedEnvelope { .. } => StatusCode::MalformedEnvelope,
            Self::UnknownCommand { .. } => StatusCode::InvalidCommand,
            Self::Bind { .. } => StatusCode::BindFailed,
            Self::ConnectionClosed => StatusCode::ConnectionClosed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
