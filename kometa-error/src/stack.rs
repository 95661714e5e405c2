use std::{fmt, panic::Location, sync::Arc};

#[cfg(feature = "serde")]
use serde::Serialize;

use crate::{ErrorExt, LogLevel, StatusCode};

/// Основная структура ошибки с поддержкой контекста.
///
/// Контекст добавляется по мере того, как ошибка поднимается от актора к
/// транспорту, например: `"apply create on chatroom" → "persist channel"`.
/// Внутренности лежат в `Arc`, поэтому ошибку дёшево клонировать и
/// отправлять через `oneshot`-ответы.
#[derive(Clone)]
pub struct StackError {
    inner: Arc<dyn ErrorExt>,
    contexts: Arc<Vec<ErrorContext>>,
}

/// Контекст ошибки с location tracking.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub message: String,
    pub location: Option<&'static Location<'static>>,
}

/// Структура для сериализации ошибок в ответах транспорта.
#[cfg(feature = "serde")]
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u32,
    pub message: String,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StackError {
    /// Создаёт новую ошибку.
    #[track_caller]
    pub fn new<E: ErrorExt>(err: E) -> Self {
        Self {
            inner: Arc::new(err),
            contexts: Arc::new(Vec::new()),
        }
    }

    /// Добавляет контекст к ошибке.
    #[track_caller]
    pub fn context(
        mut self,
        msg: impl Into<String>,
    ) -> Self {
        let mut new_contexts = (*self.contexts).clone();
        new_contexts.push(ErrorContext {
            message: msg.into(),
            location: Some(Location::caller()),
        });
        self.contexts = Arc::new(new_contexts);
        self
    }

    /// Возвращает код статуса
    pub fn status_code(&self) -> StatusCode {
        self.inner.status_code()
    }

    /// Возвращает сообщение для клиента.
    pub fn client_message(&self) -> String {
        self.inner.client_message()
    }

    /// Возвращает все контексты
    pub fn contexts(&self) -> &[ErrorContext] {
        &self.contexts
    }

    /// Попытка downcast к конкретному типу ошибки
    pub fn downcast_ref<T: ErrorExt + 'static>(&self) -> Option<&T> {
        self.inner.as_any().downcast_ref::<T>()
    }

    /// Сериализация для ответов транспорта (требует feature = "serde")
    #[cfg(feature = "serde")]
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.status_code().code(),
            message: self.client_message(),
        }
    }

    fn format_contexts(&self) -> Vec<String> {
        self.contexts
            .iter()
            .map(|ctx| {
                if let Some(loc) = ctx.location {
                    format!("{} ({}:{})", ctx.message, loc.file(), loc.line())
                } else {
                    ctx.message.clone()
                }
            })
            .collect()
    }

    /// Возвращает уровень логирования.
    pub fn log_level(&self) -> LogLevel {
        self.status_code().log_level()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StackError
////////////////////////////////////////////////////////////////////////////////

impl fmt::Debug for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let mut debug = f.debug_struct("StackError");
        debug.field("inner", &self.inner.to_string());
        debug.field("status_code", &self.status_code());

        if !self.contexts.is_empty() {
            debug.field("contexts", &self.format_contexts());
        }

        debug.finish()
    }
}

impl fmt::Display for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        if !self.contexts.is_empty() {
            let contexts: Vec<&str> = self.contexts.iter().map(|c| c.message.as_str()).collect();
            write!(f, "{}: {}", contexts.join(" → "), self.inner)
        } else {
            write!(f, "{}", self.inner)
        }
    }
}

impl std::error::Error for StackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner.as_ref())
    }
}

impl<E: ErrorExt> From<E> for StackError {
    #[track_caller]
    fn from(e: E) -> Self {
        StackError::new(e)
    }
}

impl From<StackError> for std::io::Error {
    fn from(e: StackError) -> Self {
        std::io::Error::other(e.to_string())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChannelError, HubError};

    #[test]
    fn test_context_chain() {
        let err = ChannelError::PersistenceFailed {
            channel: "chatroom".to_string(),
            reason: "disk full".to_string(),
        };
        let stack = StackError::new(err)
            .context("apply update")
            .context("http update");

        assert_eq!(stack.contexts().len(), 2);
        assert_eq!(stack.contexts()[0].message, "apply update");
        assert!(stack.contexts()[0].location.is_some());
        assert_eq!(stack.status_code(), StatusCode::PersistenceFailed);
        assert_eq!(stack.log_level(), LogLevel::Error);
    }

    #[test]
    fn test_downcast() {
        let stack = StackError::new(HubError::Closed);

        assert!(stack.downcast_ref::<HubError>().is_some());
        assert!(stack.downcast_ref::<ChannelError>().is_none());
    }

    #[test]
    fn test_display() {
        let err = HubError::SubscriberNotFound {
            id: "deadbeef".to_string(),
        };
        let stack = StackError::new(err).context("addchannels");

        let display = stack.to_string();
        assert!(display.starts_with("addchannels: "));
        assert!(display.contains("deadbeef"));
    }

    #[test]
    fn test_clone_shares_inner() {
        let stack = StackError::new(HubError::Closed).context("subscribe");
        let copy = stack.clone();
        assert_eq!(copy.to_string(), stack.to_string());
        assert_eq!(copy.log_level(), LogLevel::Warn);
    }
}
