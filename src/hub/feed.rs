use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::channel::{ChangeEvent, Channel, Operation};

/// Одна команда, доставляемая клиенту.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedCommand {
    pub command: Operation,
    pub channel: String,
    pub data: String,
    pub version: i64,
}

/// Пакет команд, доставляемый за один раз.
pub type FeedBatch = Vec<FeedCommand>;

/// Статус ответа на `data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(i8)]
pub enum ResponseStatus {
    NotFound = -1,
    NoData = 0,
    Ok = 1,
}

/// Ответ подписчику.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberResponse {
    pub status: ResponseStatus,
    #[serde(default)]
    pub commands: Vec<FeedCommand>,
}

impl From<&ChangeEvent> for FeedCommand {
    fn from(event: &ChangeEvent) -> Self {
        Self {
            command: event.operation,
            channel: event.channel_name.clone(),
            data: event.data.clone(),
            version: event.version,
        }
    }
}

/// Пакет полной ресинхронизации канала: CREATE базового снимка, затем
/// все UPDATE журнала.
pub fn resync_batch(channel: &Channel) -> FeedBatch {
    let mut batch = Vec::with_capacity(channel.updates.len() + 1);
    batch.push(FeedCommand {
        command: Operation::Create,
        channel: channel.channel_name.clone(),
        data: channel.data.clone(),
        version: channel.data_version,
    });
    batch.extend(channel.updates.iter().map(|entry| FeedCommand {
        command: Operation::Update,
        channel: entry.channel_name.clone(),
        data: entry.data.clone(),
        version: entry.data_version,
    }));
    batch
}

impl SubscriberResponse {
    pub fn ok(commands: FeedBatch) -> Self {
        Self {
            status: ResponseStatus::Ok,
            commands,
        }
    }

    pub fn no_data() -> Self {
        Self {
            status: ResponseStatus::NoData,
            commands: Vec::new(),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: ResponseStatus::NotFound,
            commands: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    /// Тест проверяет, что пакет ресинхронизации содержит CREATE базы и все
    /// UPDATE журнала.
    #[test]
    fn test_resync_batch() {
        let mut ch = Channel::new("chatroom");
        ch.apply(Operation::Create, "hello".into(), Utc::now());
        ch.apply(Operation::Update, "world".into(), Utc::now());

        let batch = resync_batch(&ch);
        assert_eq!(
            batch,
            vec![
                FeedCommand {
                    command: Operation::Create,
                    channel: "chatroom".into(),
                    data: "hello".into(),
                    version: 1,
                },
                FeedCommand {
                    command: Operation::Update,
                    channel: "chatroom".into(),
                    data: "world".into(),
                    version: 2,
                },
            ]
        );
    }

    /// Для пустого канала пакет состоит из одного CREATE версии 0.
    #[test]
    fn test_resync_empty_channel() {
        let batch = resync_batch(&Channel::new("fresh"));
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].command, Operation::Create);
        assert_eq!(batch[0].version, 0);
        assert_eq!(batch[0].data, "");
    }

    #[test]
    fn test_response_json() {
        let resp = SubscriberResponse::ok(vec![FeedCommand {
            command: Operation::Update,
            channel: "news".into(),
            data: "x".into(),
            version: 7,
        }]);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "status": 1,
                "commands": [{"command": "update", "channel": "news", "data": "x", "version": 7}]
            })
        );

        let json = serde_json::to_value(SubscriberResponse::not_found()).unwrap();
        assert_eq!(json["status"], -1);
        assert_eq!(serde_json::to_value(SubscriberResponse::no_data()).unwrap()["status"], 0);
    }
}
