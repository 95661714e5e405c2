//! Транспорты: HTTP long-poll и WebSocket поверх общего маршрутизатора
//! команд.

pub mod files;
pub mod http;
pub mod router;
pub mod websocket;

use std::time::Duration;

use async_trait::async_trait;
use kometa_error::{KometaResult, LogLevel, StackError};
use serde::Serialize;
use tracing::{debug, error, warn};

pub use files::StaticFiles;
pub use http::app;
pub use router::{route, split_channels, Command};

use crate::hub::{HubHandle, SubscriberResponse};

/// Ответ на команду, независимый от транспорта.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Простой текст (`pong`, эхо идентификатора).
    Text(String),
    /// Подписчик создан.
    Subscribed { subscriber_id: String },
    /// Ответ на `data`.
    Data(SubscriberResponse),
    /// Статический файл.
    File { name: String, bytes: Vec<u8> },
    NotFound,
    /// Команда выполнена, отвечать нечего.
    Empty,
}

/// Запрос и ответ одной команды в терминах конкретного транспорта.
#[async_trait]
pub trait CommandContext: Send {
    /// Значение параметра запроса.
    fn param(
        &self,
        name: &str,
    ) -> Option<String>;

    /// Отправляет ответ клиенту.
    async fn respond(
        &mut self,
        reply: Reply,
    ) -> KometaResult<()>;
}

/// Ответ на `subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeReply {
    pub command: &'static str,
    pub subscriber_id: String,
}

/// Общее состояние обработчиков HTTP и WebSocket.
#[derive(Clone)]
pub struct TransportState {
    pub hub: HubHandle,
    pub files: Option<StaticFiles>,
    /// Период служебного лога живого WebSocket-соединения.
    pub heartbeat: Duration,
}

impl SubscribeReply {
    pub fn new(subscriber_id: String) -> Self {
        Self {
            command: "subscribe",
            subscriber_id,
        }
    }
}

impl Reply {
    /// JSON-представление для транспортов, отвечающих JSON-конвертом.
    ///
    /// `None`: клиенту ничего не отправляется.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            Self::Text(text) => Some(serde_json::Value::String(text.clone())),
            Self::Subscribed { subscriber_id } => {
                serde_json::to_value(SubscribeReply::new(subscriber_id.clone())).ok()
            }
            Self::Data(response) => serde_json::to_value(response).ok(),
            Self::File { bytes, .. } => Some(serde_json::Value::String(
                String::from_utf8_lossy(bytes).into_owned(),
            )),
            Self::NotFound | Self::Empty => None,
        }
    }
}

/// Пишет ошибку команды в лог с уровнем, который подсказывает её код.
pub(crate) fn log_command_error(
    command: &str,
    err: &StackError,
) {
    match err.log_level() {
        LogLevel::Error => error!(command = %command, error = %err, "Command failed"),
        LogLevel::Warn => warn!(command = %command, error = %err, "Command failed"),
        _ => debug!(command = %command, error = %err, "Command rejected"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_reply_json() {
        assert_eq!(Reply::Text("pong".into()).to_json(), Some(json!("pong")));
        assert_eq!(
            Reply::Subscribed {
                subscriber_id: "abc".into()
            }
            .to_json(),
            Some(json!({"command": "subscribe", "subscriberId": "abc"}))
        );
        assert_eq!(
            Reply::Data(SubscriberResponse::no_data()).to_json(),
            Some(json!({"status": 0, "commands": []}))
        );
        assert_eq!(Reply::Empty.to_json(), None);
        assert_eq!(Reply::NotFound.to_json(), None);
    }
}
