use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use dashmap::DashMap;
use kometa_error::{KometaResult, StackError, StoreError};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::model::Channel;

/// Что делать, если запись канала в хранилище не удалась.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceFailurePolicy {
    /// Вернуть ошибку производителю; состояние и рассылка сохраняются.
    #[default]
    Report,
    /// Залогировать, отключить запись для этого канала и продолжить.
    Degrade,
    /// Вернуть ошибку производителю и подать [`AbortSignal`] владельцу
    /// процесса, который останавливает брокер.
    Abort,
}

/// Сигнал об отказе записи при политике `Abort`. Запоминается только первая
/// ошибка.
#[derive(Clone)]
pub struct AbortSignal(Arc<watch::Sender<Option<StackError>>>);

/// Сторона владельца процесса: ждёт [`AbortSignal`].
#[derive(Clone)]
pub struct AbortWatch(watch::Receiver<Option<StackError>>);

/// Внешнее хранилище снимков каналов.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// Сохраняет полный снимок канала, заменяя предыдущий.
    async fn save(
        &self,
        channel: &Channel,
    ) -> KometaResult<()>;

    /// Загружает все сохранённые каналы.
    async fn load_all(&self) -> KometaResult<Vec<Channel>>;
}

/// Хранилище "один JSON-файл на канал".
#[derive(Debug, Clone)]
pub struct FileChannelStore {
    dir: PathBuf,
}

/// Хранилище в памяти процесса.
#[derive(Debug, Default)]
pub struct MemoryChannelStore {
    channels: DashMap<String, Channel>,
}

////////////////////////////////////////////////////////////////////////////////
// AbortSignal
////////////////////////////////////////////////////////////////////////////////

impl AbortSignal {
    pub fn new() -> (Self, AbortWatch) {
        let (tx, rx) = watch::channel(None);
        (Self(Arc::new(tx)), AbortWatch(rx))
    }

    pub fn raise(
        &self,
        err: StackError,
    ) {
        self.0.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(err);
            true
        });
    }
}

impl AbortWatch {
    /// Первая поданная ошибка, если была.
    pub fn error(&self) -> Option<StackError> {
        self.0.borrow().clone()
    }

    /// Ждёт сигнала. Если все отправители исчезли без сигнала, не
    /// завершается.
    pub async fn raised(&mut self) -> StackError {
        if let Ok(current) = self.0.wait_for(Option::is_some).await {
            if let Some(err) = (*current).clone() {
                return err;
            }
        }
        std::future::pending().await
    }
}

////////////////////////////////////////////////////////////////////////////////
// FileChannelStore
////////////////////////////////////////////////////////////////////////////////

impl FileChannelStore {
    /// Открывает хранилище, создавая каталог при необходимости.
    pub async fn open(dir: impl Into<PathBuf>) -> KometaResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Путь к файлу канала.
    pub fn path_for(
        &self,
        channel_name: &str,
    ) -> PathBuf {
        self.dir
            .join(format!("{}.json", encode_file_name(channel_name)))
    }
}

#[async_trait]
impl ChannelStore for FileChannelStore {
    async fn save(
        &self,
        channel: &Channel,
    ) -> KometaResult<()> {
        let json = serde_json::to_vec(channel).map_err(|e| StoreError::Serialize {
            channel: channel.channel_name.clone(),
            reason: e.to_string(),
        })?;

        let path = self.path_for(&channel.channel_name);
        let tmp = path.with_extension("json.tmp");

        // Запись через временный файл и rename: читатель видит либо старый,
        // либо новый снимок целиком.
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(&path, e))?;

        debug!(
            channel = %channel.channel_name,
            version = channel.last_version(),
            bytes = json.len(),
            "Channel persisted"
        );
        Ok(())
    }

    async fn load_all(&self) -> KometaResult<Vec<Channel>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.dir, e).into()),
        };

        let mut channels = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable channel record");
                    continue;
                }
            };

            match serde_json::from_slice::<Channel>(&bytes) {
                Ok(channel) if channel.channel_name.trim().is_empty() => {
                    warn!(path = %path.display(), "Skipping channel record without a name");
                }
                Ok(channel) => {
                    debug!(channel = %channel.channel_name, "Channel record loaded");
                    channels.push(channel);
                }
                Err(e) => {
                    let err = StoreError::Corrupted {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    };
                    warn!(error = %err, "Skipping malformed channel record");
                }
            }
        }

        info!(
            dir = %self.dir.display(),
            channels = channels.len(),
            "Channel records loaded"
        );
        Ok(channels)
    }
}

////////////////////////////////////////////////////////////////////////////////
// MemoryChannelStore
////////////////////////////////////////////////////////////////////////////////

impl MemoryChannelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Сохранённый снимок канала, если есть.
    pub fn get(
        &self,
        channel_name: &str,
    ) -> Option<Channel> {
        self.channels.get(channel_name).map(|c| c.value().clone())
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[async_trait]
impl ChannelStore for MemoryChannelStore {
    async fn save(
        &self,
        channel: &Channel,
    ) -> KometaResult<()> {
        self.channels
            .insert(channel.channel_name.clone(), channel.clone());
        Ok(())
    }

    async fn load_all(&self) -> KometaResult<Vec<Channel>> {
        Ok(self.channels.iter().map(|c| c.value().clone()).collect())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Вспомогательные функции
////////////////////////////////////////////////////////////////////////////////

/// Кодирует имя канала для файловой системы: всё, кроме ASCII букв, цифр,
/// `-` и `_`, заменяется на `%XX`.
pub fn encode_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn io_error(
    path: &Path,
    err: std::io::Error,
) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use kometa_error::StatusCode;

    use super::*;
    use crate::channel::model::Operation;

    fn sample(name: &str) -> Channel {
        let mut ch = Channel::new(name);
        ch.apply(Operation::Create, "hello".into(), Utc::now());
        ch.apply(Operation::Update, "world".into(), Utc::now());
        ch
    }

    #[test]
    fn test_encode_file_name() {
        assert_eq!(encode_file_name("chatroom"), "chatroom");
        assert_eq!(encode_file_name("a/b"), "a%2Fb");
        assert_eq!(encode_file_name(".."), "%2E%2E");
        assert_eq!(encode_file_name("чат"), "%D1%87%D0%B0%D1%82");
    }

    /// Тест проверяет сохранение и загрузку канала через файловое хранилище.
    #[tokio::test]
    async fn test_file_store_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileChannelStore::open(tmp.path()).await.unwrap();

        let ch = sample("chatroom");
        store.save(&ch).await.unwrap();
        assert!(store.path_for("chatroom").exists());

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded, vec![ch]);
    }

    /// Тест проверяет, что повторное сохранение заменяет снимок и не
    /// оставляет временных файлов.
    #[tokio::test]
    async fn test_file_store_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileChannelStore::open(tmp.path()).await.unwrap();

        let mut ch = sample("news");
        store.save(&ch).await.unwrap();
        ch.apply(Operation::Clear, String::new(), Utc::now());
        store.save(&ch).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].last_version(), 0);

        let names: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["news.json".to_string()]);
    }

    /// Тест проверяет, что имена с разделителями пути не выходят за пределы
    /// каталога хранилища.
    #[tokio::test]
    async fn test_file_store_hostile_names() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileChannelStore::open(tmp.path().join("data")).await.unwrap();

        let ch = sample("../escape");
        store.save(&ch).await.unwrap();

        assert!(!tmp.path().join("escape.json").exists());
        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded[0].channel_name, "../escape");
    }

    /// Тест проверяет, что повреждённые записи, записи без имени и файлы с
    /// другим расширением пропускаются.
    #[tokio::test]
    async fn test_file_store_skips_bad_records() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileChannelStore::open(tmp.path()).await.unwrap();
        store.save(&sample("good")).await.unwrap();

        std::fs::write(tmp.path().join("broken.json"), b"{not json").unwrap();
        std::fs::write(tmp.path().join("readme.txt"), b"hello").unwrap();
        let blank = serde_json::to_vec(&Channel::new("   ")).unwrap();
        std::fs::write(tmp.path().join("blank.json"), blank).unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].channel_name, "good");
    }

    #[tokio::test]
    async fn test_file_store_missing_dir_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileChannelStore {
            dir: tmp.path().join("absent"),
        };
        assert!(store.load_all().await.unwrap().is_empty());
    }

    /// Тест проверяет, что ошибка записи возвращается как ошибка хранилища.
    #[tokio::test]
    async fn test_file_store_write_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileChannelStore::open(tmp.path().join("data")).await.unwrap();
        std::fs::remove_dir_all(store.dir()).unwrap();

        let err = store.save(&sample("news")).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::StorageUnavailable);
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryChannelStore::new();
        assert!(store.is_empty());

        store.save(&sample("a")).await.unwrap();
        store.save(&sample("b")).await.unwrap();
        store.save(&sample("a")).await.unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("a").unwrap().last_version(), 2);
        assert_eq!(store.load_all().await.unwrap().len(), 2);
    }

    #[test]
    fn test_policy_deserialize() {
        let p: PersistenceFailurePolicy = serde_json::from_str("\"degrade\"").unwrap();
        assert_eq!(p, PersistenceFailurePolicy::Degrade);
        assert_eq!(
            PersistenceFailurePolicy::default(),
            PersistenceFailurePolicy::Report
        );
    }

    /// Тест проверяет, что сигнал остановки хранит первую ошибку и будит
    /// ожидающего.
    #[tokio::test]
    async fn test_abort_signal_keeps_first_error() {
        let (signal, mut watch) = AbortSignal::new();
        assert!(watch.error().is_none());

        let waiter = {
            let mut watch = watch.clone();
            tokio::spawn(async move { watch.raised().await })
        };
        signal.raise(
            StoreError::Io {
                path: "a.json".into(),
                reason: "first".into(),
            }
            .into(),
        );
        signal.raise(
            StoreError::Io {
                path: "b.json".into(),
                reason: "second".into(),
            }
            .into(),
        );

        let err = waiter.await.unwrap();
        assert!(err.to_string().contains("first"));
        assert!(watch.raised().await.to_string().contains("first"));
        assert_eq!(
            watch.error().map(|e| e.status_code()),
            Some(StatusCode::StorageUnavailable)
        );
    }
}
