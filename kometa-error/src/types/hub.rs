use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки диспетчера подписчиков (hub).
#[derive(Debug, Clone, Error)]
pub enum HubError {
    /// Почтовый ящик hub закрыт: брокер останавливается.
    #[error("hub is not running")]
    Closed,

    /// Подписчик с таким идентификатором не зарегистрирован.
    #[error("subscriber {id} not found")]
    SubscriberNotFound { id: String },
}

impl ErrorExt for HubError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Closed => StatusCode::ActorUnavailable,
            Self::SubscriberNotFound { .. } => StatusCode::SubscriberNotFound,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            Self::Closed => "Service unavailable".to_string(),
            Self::SubscriberNotFound { .. } => "Subscriber not found".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_error_codes() {
        assert_eq!(HubError::Closed.status_code(), StatusCode::ActorUnavailable);
        assert_eq!(
            HubError::SubscriberNotFound { id: "x".into() }.status_code(),
            StatusCode::SubscriberNotFound
        );
    }

    /// Тест проверяет, что идентификатор подписчика не попадает в ответ
    /// клиенту, но остаётся в тексте ошибки для логов.
    #[test]
    fn test_client_message_hides_id() {
        let err = HubError::SubscriberNotFound {
            id: "6f1c".to_string(),
        };
        assert!(err.to_string().contains("6f1c"));
        assert!(!err.client_message().contains("6f1c"));
    }
}
