use std::{collections::HashMap, sync::Arc};

use kometa_error::{GenericError, KometaResult, StatusCode};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::{
    actor::{ChannelActorConfig, ChannelHandle},
    model::{is_reserved, ChangeEvent, Channel},
    store::{AbortSignal, ChannelStore, PersistenceFailurePolicy},
};

/// Параметры реестра каналов.
#[derive(Clone)]
pub struct RegistryConfig {
    /// Ёмкость очереди реестра и очередей чтения каналов.
    pub queue_size: usize,
    /// Ёмкость очереди изменений каждого канала.
    pub channel_mutation_queue: usize,
    /// Хранилище; `None` отключает запись и восстановление.
    pub store: Option<Arc<dyn ChannelStore>>,
    /// Восстанавливать каналы из хранилища при старте.
    pub restore: bool,
    /// Сохранять ли `private_*` и `system`.
    pub persist_reserved_channels: bool,
    pub failure_policy: PersistenceFailurePolicy,
    /// Сигнал остановки для политики `Abort`.
    pub abort: Option<AbortSignal>,
}

enum RegistryRequest {
    GetOrCreate {
        name: String,
        reply: oneshot::Sender<ChannelHandle>,
    },
    List {
        reply: oneshot::Sender<Vec<String>>,
    },
}

/// Handle реестра каналов.
#[derive(Clone)]
pub struct RegistryHandle {
    requests: mpsc::Sender<RegistryRequest>,
}

/// Реестр: имя канала → актор канала. Единственный владелец карты.
struct ChannelRegistry {
    config: RegistryConfig,
    events: mpsc::Sender<ChangeEvent>,
    channels: HashMap<String, ChannelHandle>,
    requests: mpsc::Receiver<RegistryRequest>,
}

////////////////////////////////////////////////////////////////////////////////
// RegistryHandle
////////////////////////////////////////////////////////////////////////////////

impl RegistryHandle {
    /// Запускает реестр.
    ///
    /// Если восстановление включено, до начала обслуживания запросов для
    /// каждого сохранённого канала запускается свой актор.
    pub async fn start(
        config: RegistryConfig,
        events: mpsc::Sender<ChangeEvent>,
    ) -> KometaResult<Self> {
        let (tx, rx) = mpsc::channel(config.queue_size.max(1));
        let mut registry = ChannelRegistry {
            config,
            events,
            channels: HashMap::new(),
            requests: rx,
        };

        registry.restore().await?;
        tokio::spawn(registry.run());

        Ok(Self { requests: tx })
    }

    /// Возвращает актор канала, создавая его при первом обращении.
    pub async fn get_or_create(
        &self,
        name: &str,
    ) -> KometaResult<ChannelHandle> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(RegistryRequest::GetOrCreate {
                name: name.to_string(),
                reply,
            })
            .await
            .map_err(|_| registry_gone())?;
        rx.await.map_err(|_| registry_gone().into())
    }

    /// Имена всех известных каналов, по алфавиту.
    pub async fn list_channels(&self) -> KometaResult<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(RegistryRequest::List { reply })
            .await
            .map_err(|_| registry_gone())?;
        rx.await.map_err(|_| registry_gone().into())
    }
}

fn registry_gone() -> GenericError {
    GenericError::new(StatusCode::ActorUnavailable, "channel registry is not running")
}

////////////////////////////////////////////////////////////////////////////////
// ChannelRegistry
////////////////////////////////////////////////////////////////////////////////

impl ChannelRegistry {
    async fn restore(&mut self) -> KometaResult<()> {
        if !self.config.restore {
            return Ok(());
        }
        let Some(store) = self.config.store.clone() else {
            return Ok(());
        };

        info!("Restoring channels");
        for channel in store.load_all().await? {
            if self.channels.contains_key(&channel.channel_name) {
                continue;
            }
            debug!(
                channel = %channel.channel_name,
                version = channel.last_version(),
                "Channel restored"
            );
            self.register(channel);
        }
        info!(channels = self.channels.len(), "Channel restore completed");
        Ok(())
    }

    async fn run(mut self) {
        debug!("Channel registry started");

        while let Some(request) = self.requests.recv().await {
            match request {
                RegistryRequest::GetOrCreate { name, reply } => {
                    let handle = match self.channels.get(&name) {
                        Some(handle) => handle.clone(),
                        None => {
                            debug!(channel = %name, "Creating channel");
                            self.register(Channel::new(name))
                        }
                    };
                    let _ = reply.send(handle);
                }
                RegistryRequest::List { reply } => {
                    let mut names: Vec<String> = self.channels.keys().cloned().collect();
                    names.sort();
                    let _ = reply.send(names);
                }
            }
        }

        debug!("Channel registry stopped");
    }

    /// Запускает актор канала и регистрирует его.
    fn register(
        &mut self,
        channel: Channel,
    ) -> ChannelHandle {
        let name = channel.channel_name.clone();
        let persist = !is_reserved(&name) || self.config.persist_reserved_channels;

        let actor_config = ChannelActorConfig {
            mutation_queue: self.config.channel_mutation_queue,
            read_queue: self.config.queue_size,
            store: if persist {
                self.config.store.clone()
            } else {
                None
            },
            failure_policy: self.config.failure_policy,
            abort: self.config.abort.clone(),
        };

        let handle = ChannelHandle::spawn(channel, actor_config, self.events.clone());
        self.channels.insert(name, handle.clone());
        handle
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::channel::{model::Operation, store::MemoryChannelStore};

    fn config(store: Option<Arc<dyn ChannelStore>>) -> RegistryConfig {
        RegistryConfig {
            queue_size: 64,
            channel_mutation_queue: 10,
            store,
            restore: true,
            persist_reserved_channels: false,
            failure_policy: PersistenceFailurePolicy::Report,
            abort: None,
        }
    }

    /// Тест проверяет, что повторный запрос возвращает тот же актор.
    #[tokio::test]
    async fn test_get_or_create_is_stable() {
        let (events_tx, _events_rx) = mpsc::channel(16);
        let registry = RegistryHandle::start(config(None), events_tx)
            .await
            .unwrap();

        let a = registry.get_or_create("news").await.unwrap();
        a.apply(Operation::Create, "x".into()).await.unwrap();

        let b = registry.get_or_create("news").await.unwrap();
        assert_eq!(b.read(0).await.unwrap().last_version(), 1);

        let fresh = registry.get_or_create("other").await.unwrap();
        let snapshot = fresh.read(0).await.unwrap();
        assert_eq!(snapshot.last_version(), 0);
        assert!(snapshot.data.is_empty());

        assert_eq!(
            registry.list_channels().await.unwrap(),
            vec!["news".to_string(), "other".to_string()]
        );
    }

    /// Тест проверяет восстановление каналов из хранилища при старте.
    #[tokio::test]
    async fn test_restore_on_start() {
        let store = Arc::new(MemoryChannelStore::new());
        let mut saved = Channel::new("chatroom");
        saved.apply(Operation::Create, "hello".into(), Utc::now());
        saved.apply(Operation::Update, "world".into(), Utc::now());
        store.save(&saved).await.unwrap();

        let (events_tx, _events_rx) = mpsc::channel(16);
        let registry = RegistryHandle::start(config(Some(store.clone())), events_tx)
            .await
            .unwrap();

        assert_eq!(
            registry.list_channels().await.unwrap(),
            vec!["chatroom".to_string()]
        );
        let handle = registry.get_or_create("chatroom").await.unwrap();
        assert_eq!(handle.read(0).await.unwrap(), saved);

        let next = handle.apply(Operation::Update, "again".into()).await.unwrap();
        assert_eq!(next.version, 3);
    }

    #[tokio::test]
    async fn test_restore_disabled() {
        let store = Arc::new(MemoryChannelStore::new());
        store.save(&Channel::new("old")).await.unwrap();

        let mut cfg = config(Some(store));
        cfg.restore = false;
        let (events_tx, _events_rx) = mpsc::channel(16);
        let registry = RegistryHandle::start(cfg, events_tx).await.unwrap();

        assert!(registry.list_channels().await.unwrap().is_empty());
    }

    /// Тест проверяет, что зарезервированные каналы не сохраняются, пока это
    /// не включено явно.
    #[tokio::test]
    async fn test_reserved_channels_not_persisted() {
        let store = Arc::new(MemoryChannelStore::new());
        let (events_tx, _events_rx) = mpsc::channel(16);
        let registry = RegistryHandle::start(config(Some(store.clone())), events_tx)
            .await
            .unwrap();

        for name in ["system", "private_abc", "public"] {
            let handle = registry.get_or_create(name).await.unwrap();
            handle.apply(Operation::Create, "x".into()).await.unwrap();
        }

        assert!(store.get("system").is_none());
        assert!(store.get("private_abc").is_none());
        assert!(store.get("public").is_some());
    }

    #[tokio::test]
    async fn test_reserved_channels_persisted_when_enabled() {
        let store = Arc::new(MemoryChannelStore::new());
        let mut cfg = config(Some(store.clone()));
        cfg.persist_reserved_channels = true;
        let (events_tx, _events_rx) = mpsc::channel(16);
        let registry = RegistryHandle::start(cfg, events_tx).await.unwrap();

        let handle = registry.get_or_create("system").await.unwrap();
        handle.apply(Operation::Create, "{}".into()).await.unwrap();
        assert!(store.get("system").is_some());
    }
}
