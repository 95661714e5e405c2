use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Префикс приватного канала подписчика.
pub const PRIVATE_PREFIX: &str = "private_";

/// Имя системного канала со статусом брокера.
pub const SYSTEM_CHANNEL: &str = "system";

/// Вид операции над каналом.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Clear,
}

/// Одна запись журнала обновлений канала.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelEntry {
    pub channel_name: String,
    pub data_version: i64,
    pub data: String,
    pub data_time: DateTime<Utc>,
}

/// Состояние канала: базовый снимок плюс журнал обновлений.
///
/// Этот же тип сериализуется в хранилище (`channelName`, `dataVersion`,
/// `data`, `dataTime`, `updates`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub channel_name: String,
    /// Версия базового снимка.
    pub data_version: i64,
    /// Базовые данные, установленные последним CREATE или CLEAR.
    pub data: String,
    pub data_time: DateTime<Utc>,
    /// Журнал UPDATE после базового снимка.
    #[serde(default)]
    pub updates: Vec<ChannelEntry>,
}

/// Событие изменения канала, единица рассылки подписчикам.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub operation: Operation,
    pub channel_name: String,
    pub data: String,
    pub version: i64,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Channel {
    /// Новый пустой канал версии 0.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            channel_name: name.into(),
            data_version: 0,
            data: String::new(),
            data_time: Utc::now(),
            updates: Vec::new(),
        }
    }

    /// Версия последней применённой операции.
    pub fn last_version(&self) -> i64 {
        self.updates
            .last()
            .map(|entry| entry.data_version)
            .unwrap_or(self.data_version)
    }

    /// Время последней применённой операции.
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.updates
            .last()
            .map(|entry| entry.data_time)
            .unwrap_or(self.data_time)
    }

    /// Применяет операцию и возвращает событие изменения.
    ///
    /// CREATE и UPDATE получают версию `last_version() + 1`, CLEAR
    /// сбрасывает канал в версию 0.
    pub fn apply(
        &mut self,
        operation: Operation,
        data: String,
        now: DateTime<Utc>,
    ) -> ChangeEvent {
        let (data, version) = match operation {
            Operation::Create => {
                self.data_version = self.last_version() + 1;
                self.data = data;
                self.data_time = now;
                self.updates.clear();
                (self.data.clone(), self.data_version)
            }
            Operation::Update => {
                let version = self.last_version() + 1;
                self.updates.push(ChannelEntry {
                    channel_name: self.channel_name.clone(),
                    data_version: version,
                    data: data.clone(),
                    data_time: now,
                });
                (data, version)
            }
            Operation::Clear => {
                self.data_version = 0;
                self.data.clear();
                self.data_time = now;
                self.updates.clear();
                (String::new(), 0)
            }
        };

        ChangeEvent {
            operation,
            channel_name: self.channel_name.clone(),
            data,
            version,
        }
    }
}

/// Зарезервированные каналы: приватные каналы подписчиков и `system`.
pub fn is_reserved(name: &str) -> bool {
    name.starts_with(PRIVATE_PREFIX) || name == SYSTEM_CHANNEL
}

/// Приватный канал подписчика.
pub fn private_channel_name(subscriber_id: &str) -> String {
    format!("{PRIVATE_PREFIX}{subscriber_id}")
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn apply(
        channel: &mut Channel,
        op: Operation,
        data: &str,
    ) -> ChangeEvent {
        channel.apply(op, data.to_string(), Utc::now())
    }

    /// Тест проверяет, что CREATE и N UPDATE дают версию create + N и журнал
    /// длины N.
    #[test]
    fn test_create_then_updates() {
        let mut ch = Channel::new("chatroom");
        let created = apply(&mut ch, Operation::Create, "hello");
        assert_eq!(created.version, 1);

        for n in 1..=5 {
            let ev = apply(&mut ch, Operation::Update, &format!("msg {n}"));
            assert_eq!(ev.version, created.version + n);
            assert_eq!(ev.operation, Operation::Update);
            assert_eq!(ev.data, format!("msg {n}"));
        }

        assert_eq!(ch.last_version(), created.version + 5);
        assert_eq!(ch.updates.len(), 5);
        assert_eq!(ch.data, "hello");
        assert_eq!(ch.data_version, 1);
    }

    /// Тест проверяет, что повторный CREATE продолжает нумерацию версий и
    /// очищает журнал.
    #[test]
    fn test_create_continues_versioning() {
        let mut ch = Channel::new("news");
        apply(&mut ch, Operation::Create, "a");
        apply(&mut ch, Operation::Update, "b");
        apply(&mut ch, Operation::Update, "c");

        let ev = apply(&mut ch, Operation::Create, "d");
        assert_eq!(ev.version, 4);
        assert_eq!(ev.data, "d");
        assert!(ch.updates.is_empty());
        assert_eq!(ch.last_version(), 4);
    }

    /// Тест проверяет, что CLEAR всегда сбрасывает канал в версию 0.
    #[test]
    fn test_clear_resets_everything() {
        let mut ch = Channel::new("news");
        apply(&mut ch, Operation::Create, "a");
        apply(&mut ch, Operation::Update, "b");

        let ev = apply(&mut ch, Operation::Clear, "ignored");
        assert_eq!(ev.version, 0);
        assert_eq!(ev.data, "");
        assert_eq!(ev.operation, Operation::Clear);
        assert_eq!(ch.last_version(), 0);
        assert!(ch.data.is_empty());
        assert!(ch.updates.is_empty());

        // CLEAR на пустом канале тоже даёт версию 0.
        let mut empty = Channel::new("empty");
        assert_eq!(apply(&mut empty, Operation::Clear, "").version, 0);
    }

    #[test]
    fn test_update_on_fresh_channel() {
        let mut ch = Channel::new("fresh");
        let ev = apply(&mut ch, Operation::Update, "first");
        assert_eq!(ev.version, 1);
        assert_eq!(ch.data_version, 0);
        assert_eq!(ch.updates.len(), 1);
    }

    #[test]
    fn test_last_modified_follows_log() {
        let mut ch = Channel::new("t");
        let t1 = Utc::now();
        ch.apply(Operation::Create, "a".into(), t1);
        assert_eq!(ch.last_modified(), t1);

        let t2 = t1 + chrono::Duration::seconds(5);
        ch.apply(Operation::Update, "b".into(), t2);
        assert_eq!(ch.last_modified(), t2);
    }

    #[test]
    fn test_reserved_names() {
        assert!(is_reserved("private_0b4f"));
        assert!(is_reserved("system"));
        assert!(!is_reserved("chatroom"));
        assert!(!is_reserved("private"));
        assert!(!is_reserved("systems"));
        assert_eq!(private_channel_name("42"), "private_42");
    }

    #[test]
    fn test_operation_names() {
        assert_eq!(Operation::Create.to_string(), "create");
        assert_eq!(Operation::from_str("update").unwrap(), Operation::Update);
        assert!(Operation::from_str("delete").is_err());
        assert_eq!(
            serde_json::to_string(&Operation::Clear).unwrap(),
            "\"clear\""
        );
    }

    /// Тест проверяет формат записи канала в JSON.
    #[test]
    fn test_channel_json_shape() {
        let mut ch = Channel::new("chatroom");
        apply(&mut ch, Operation::Create, "hello");
        apply(&mut ch, Operation::Update, "world");

        let value = serde_json::to_value(&ch).unwrap();
        assert_eq!(value["channelName"], "chatroom");
        assert_eq!(value["dataVersion"], 1);
        assert_eq!(value["data"], "hello");
        assert!(value["dataTime"].is_string());
        assert_eq!(value["updates"][0]["dataVersion"], 2);
        assert_eq!(value["updates"][0]["data"], "world");

        let back: Channel = serde_json::from_value(value).unwrap();
        assert_eq!(back, ch);
    }
}
