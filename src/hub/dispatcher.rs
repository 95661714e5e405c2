use std::{collections::HashMap, time::Duration};

use kometa_error::{HubError, KometaResult, StackError, StatusCode};
use serde::Serialize;
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use super::{
    feed::{resync_batch, FeedBatch, FeedCommand, SubscriberResponse},
    id::new_subscriber_id,
    subscriber::{spawn_delivery, DeliveryConfig, FeedHandle, FeedPoll},
};
use crate::channel::{private_channel_name, ChangeEvent, Channel, Operation, RegistryHandle};

/// Параметры hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Ёмкость очереди запросов hub.
    pub queue_size: usize,
    /// Сколько пакетов может ждать одного клиента.
    pub subscriber_queue_size: usize,
    /// Ёмкость управляющей очереди каждого подписчика.
    pub control_queue_size: usize,
    /// Время бездействия, после которого подписчик удаляется. Должно быть
    /// больше `long_poll_timeout`, иначе подписчик, ждущий в `poll`, может
    /// быть удалён до конца ожидания.
    pub subscriber_ttl: Duration,
    pub cleanup_interval: Duration,
    pub long_poll_timeout: Duration,
    pub feed_timeout: Duration,
    pub heartbeat: Duration,
}

/// Результат успешной подписки.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: String,
    pub feed: FeedHandle,
}

/// Позиция подписчика в канале.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelCursor {
    pub channel_name: String,
    /// Версия последней отправленной клиенту команды; `-1`, пока ничего не
    /// отправлено.
    pub last_delivered_version: i64,
}

/// Снимок состояния подписчика.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberStatus {
    pub id: String,
    pub channels: Vec<ChannelCursor>,
}

pub(crate) enum HubRequest {
    Subscribe {
        channels: Vec<String>,
        reply: oneshot::Sender<Subscription>,
    },
    AddChannels {
        id: String,
        channels: Vec<String>,
        reply: oneshot::Sender<bool>,
    },
    RemoveChannels {
        id: String,
        channels: Vec<String>,
        reply: oneshot::Sender<bool>,
    },
    Unsubscribe {
        id: String,
    },
    Touch {
        id: String,
        reply: oneshot::Sender<Option<FeedHandle>>,
    },
    KeepAlive {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<Vec<SubscriberStatus>>,
    },
    Shutdown,
}

/// Handle hub. Дёшево клонируется; все методы безопасно вызывать из любого
/// числа задач.
#[derive(Clone)]
pub struct HubHandle {
    requests: mpsc::Sender<HubRequest>,
    registry: RegistryHandle,
    long_poll_timeout: Duration,
}

struct SubscriberEntry {
    /// Канал → версия последней отправленной команды.
    cursors: HashMap<String, i64>,
    last_activity: Instant,
    control: mpsc::Sender<FeedBatch>,
    stop: Option<oneshot::Sender<()>>,
    feed: FeedHandle,
}

/// Hub: единственный владелец таблицы подписчиков.
struct Hub {
    config: HubConfig,
    registry: RegistryHandle,
    subscribers: HashMap<String, SubscriberEntry>,
    requests: mpsc::Receiver<HubRequest>,
    /// Слабая ссылка на собственную очередь: её получают акторы доставки.
    self_tx: mpsc::WeakSender<HubRequest>,
    events: mpsc::Receiver<ChangeEvent>,
}

////////////////////////////////////////////////////////////////////////////////
// HubHandle
////////////////////////////////////////////////////////////////////////////////

impl HubHandle {
    /// Запускает hub. `events` принимает изменения от всех акторов каналов,
    /// созданных через `registry`.
    pub fn start(
        config: HubConfig,
        registry: RegistryHandle,
        events: mpsc::Receiver<ChangeEvent>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_size.max(1));
        let long_poll_timeout = config.long_poll_timeout;

        let hub = Hub {
            config,
            registry: registry.clone(),
            subscribers: HashMap::new(),
            requests: rx,
            self_tx: tx.downgrade(),
            events,
        };
        tokio::spawn(hub.run());

        Self {
            requests: tx,
            registry,
            long_poll_timeout,
        }
    }

    /// Регистрирует подписчика на `channels` и его приватный канал.
    ///
    /// К возврату полные снимки всех каналов уже поставлены в его очередь.
    pub async fn subscribe(
        &self,
        channels: Vec<String>,
    ) -> KometaResult<Subscription> {
        self.call(|reply| HubRequest::Subscribe { channels, reply })
            .await
    }

    /// Добавляет каналы подписчику. Каждый канал, даже уже подписанный,
    /// заново ресинхронизируется.
    pub async fn add_channels(
        &self,
        id: &str,
        channels: Vec<String>,
    ) -> KometaResult<()> {
        let found = self
            .call(|reply| HubRequest::AddChannels {
                id: id.to_string(),
                channels,
                reply,
            })
            .await?;
        found_or_err(found, id)
    }

    pub async fn remove_channels(
        &self,
        id: &str,
        channels: Vec<String>,
    ) -> KometaResult<()> {
        let found = self
            .call(|reply| HubRequest::RemoveChannels {
                id: id.to_string(),
                channels,
                reply,
            })
            .await?;
        found_or_err(found, id)
    }

    /// Удаляет подписчика. Неизвестный идентификатор игнорируется.
    pub async fn unsubscribe(
        &self,
        id: &str,
    ) -> KometaResult<()> {
        self.requests
            .send(HubRequest::Unsubscribe { id: id.to_string() })
            .await
            .map_err(|_| HubError::Closed.into())
    }

    /// Продлевает жизнь подписчика и возвращает handle его ленты.
    pub async fn touch(
        &self,
        id: &str,
    ) -> KometaResult<FeedHandle> {
        let feed = self
            .call(|reply| HubRequest::Touch {
                id: id.to_string(),
                reply,
            })
            .await?;
        feed.ok_or_else(|| not_found(id))
    }

    pub async fn keep_alive(
        &self,
        id: &str,
    ) -> KometaResult<()> {
        let found = self
            .call(|reply| HubRequest::KeepAlive {
                id: id.to_string(),
                reply,
            })
            .await?;
        found_or_err(found, id)
    }

    /// Снимок всех подписчиков с их курсорами.
    pub async fn status(&self) -> KometaResult<Vec<SubscriberStatus>> {
        self.call(|reply| HubRequest::Status { reply }).await
    }

    /// Применяет операцию к каналу от имени производителя.
    ///
    /// Пустое или состоящее из пробелов имя канала игнорируется: `Ok(None)`.
    /// Остальные имена используются как есть.
    pub async fn apply(
        &self,
        operation: Operation,
        channel: &str,
        data: String,
    ) -> KometaResult<Option<ChangeEvent>> {
        if channel.trim().is_empty() {
            return Ok(None);
        }
        let handle = self.registry.get_or_create(channel).await?;
        handle.apply(operation, data).await.map(Some)
    }

    /// Long-poll: ждёт следующий пакет подписчика не дольше
    /// `long_poll_timeout`.
    pub async fn poll(
        &self,
        id: &str,
    ) -> KometaResult<SubscriberResponse> {
        let feed = match self.touch(id).await {
            Ok(feed) => feed,
            Err(e) if e.status_code() == StatusCode::SubscriberNotFound => {
                return Ok(SubscriberResponse::not_found());
            }
            Err(e) => return Err(e),
        };

        let response = match feed.poll(self.long_poll_timeout).await {
            FeedPoll::Batch(batch) => SubscriberResponse::ok(batch),
            FeedPoll::Empty => SubscriberResponse::no_data(),
            FeedPoll::Gone => return Ok(SubscriberResponse::not_found()),
        };

        // Ожидание в poll тоже активность: отсчёт TTL начинается с его конца.
        // Уже полученный пакет отдаётся, даже если подписчик успел исчезнуть.
        match self.keep_alive(id).await {
            Ok(()) => Ok(response),
            Err(e) if e.status_code() == StatusCode::SubscriberNotFound => {
                if response.commands.is_empty() {
                    Ok(SubscriberResponse::not_found())
                } else {
                    Ok(response)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Список известных каналов.
    pub async fn channels(&self) -> KometaResult<Vec<String>> {
        self.registry.list_channels().await
    }

    /// Останавливает hub и акторы доставки всех подписчиков.
    pub async fn shutdown(&self) -> KometaResult<()> {
        self.requests
            .send(HubRequest::Shutdown)
            .await
            .map_err(|_| HubError::Closed.into())
    }

    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> HubRequest,
    ) -> KometaResult<T> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(make(reply))
            .await
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed.into())
    }
}

fn not_found(id: &str) -> StackError {
    HubError::SubscriberNotFound { id: id.to_string() }.into()
}

fn found_or_err(
    found: bool,
    id: &str,
) -> KometaResult<()> {
    if found {
        Ok(())
    } else {
        Err(not_found(id))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Hub
////////////////////////////////////////////////////////////////////////////////

impl Hub {
    async fn run(mut self) {
        info!("Hub started");

        let period = self.config.cleanup_interval;
        let mut cleanup = interval_at(Instant::now() + period, period);
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(HubRequest::Shutdown) | None => break,
                    Some(request) => self.handle(request).await,
                },
                Some(event) = self.events.recv() => self.fan_out(&event),
                _ = cleanup.tick() => self.cleanup(),
            }
        }

        let count = self.subscribers.len();
        for (_, mut entry) in self.subscribers.drain() {
            if let Some(stop) = entry.stop.take() {
                let _ = stop.send(());
            }
        }
        info!(subscribers = count, "Hub stopped");
    }

    async fn handle(
        &mut self,
        request: HubRequest,
    ) {
        match request {
            HubRequest::Subscribe { channels, reply } => {
                let subscription = self.subscribe(channels).await;
                let _ = reply.send(subscription);
            }
            HubRequest::AddChannels {
                id,
                channels,
                reply,
            } => {
                let Some(mut entry) = self.subscribers.remove(&id) else {
                    let _ = reply.send(false);
                    return;
                };
                entry.last_activity = Instant::now();
                self.resync(&id, &mut entry, &channels).await;
                self.subscribers.insert(id, entry);
                let _ = reply.send(true);
            }
            HubRequest::RemoveChannels {
                id,
                channels,
                reply,
            } => {
                let found = match self.subscribers.get_mut(&id) {
                    Some(entry) => {
                        entry.last_activity = Instant::now();
                        for name in channel_names(&channels) {
                            entry.cursors.remove(name);
                        }
                        debug!(subscriber = %id, ?channels, "Channels removed");
                        true
                    }
                    None => false,
                };
                let _ = reply.send(found);
            }
            HubRequest::Unsubscribe { id } => self.unsubscribe(&id),
            HubRequest::Touch { id, reply } => {
                let feed = self.subscribers.get_mut(&id).map(|entry| {
                    entry.last_activity = Instant::now();
                    entry.feed.clone()
                });
                let _ = reply.send(feed);
            }
            HubRequest::KeepAlive { id, reply } => {
                let found = match self.subscribers.get_mut(&id) {
                    Some(entry) => {
                        entry.last_activity = Instant::now();
                        true
                    }
                    None => false,
                };
                let _ = reply.send(found);
            }
            HubRequest::Status { reply } => {
                let _ = reply.send(self.status());
            }
            // Обрабатывается в цикле run.
            HubRequest::Shutdown => {}
        }
    }

    async fn subscribe(
        &mut self,
        mut channels: Vec<String>,
    ) -> Subscription {
        let id = new_subscriber_id();
        let delivery = DeliveryConfig {
            queue_size: self.config.subscriber_queue_size,
            control_queue_size: self.config.control_queue_size,
            feed_timeout: self.config.feed_timeout,
            heartbeat: self.config.heartbeat,
        };
        let parts = spawn_delivery(id.clone(), &delivery, self.self_tx.clone());

        let mut entry = SubscriberEntry {
            cursors: HashMap::new(),
            last_activity: Instant::now(),
            control: parts.control,
            stop: Some(parts.stop),
            feed: parts.feed.clone(),
        };

        channels.push(private_channel_name(&id));
        self.resync(&id, &mut entry, &channels).await;
        self.subscribers.insert(id.clone(), entry);

        info!(
            subscriber = %id,
            subscribers = self.subscribers.len(),
            "Subscriber registered"
        );
        Subscription {
            id,
            feed: parts.feed,
        }
    }

    /// Ставит в очередь подписчика полные снимки каналов и подписывает его
    /// на их дальнейшие изменения.
    ///
    /// Снимок читается здесь же, в цикле hub: события, пришедшие позже,
    /// будут отправлены после него. Повтор уже учтённой в снимке команды
    /// возможен, устаревшего состояния нет.
    async fn resync(
        &self,
        id: &str,
        entry: &mut SubscriberEntry,
        channels: &[String],
    ) {
        for name in channel_names(channels) {
            entry.cursors.entry(name.to_string()).or_insert(-1);

            let snapshot = match self.snapshot(name).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(subscriber = %id, channel = %name, error = %e, "Resync failed");
                    continue;
                }
            };

            let version = snapshot.last_version();
            push_resync(id, entry, resync_batch(&snapshot));
            entry.cursors.insert(name.to_string(), version);
            debug!(subscriber = %id, channel = %name, version, "Channel resynced");
        }
    }

    async fn snapshot(
        &self,
        name: &str,
    ) -> KometaResult<Channel> {
        let handle = self.registry.get_or_create(name).await?;
        handle.read(-1).await
    }

    /// Рассылает изменение всем подписчикам канала. Hub не ждёт ни одного
    /// из них: при полной очереди команда для этого подписчика теряется.
    fn fan_out(
        &mut self,
        event: &ChangeEvent,
    ) {
        let command = FeedCommand::from(event);
        for (id, entry) in self.subscribers.iter_mut() {
            let Some(cursor) = entry.cursors.get_mut(&event.channel_name) else {
                continue;
            };
            match entry.control.try_send(vec![command.clone()]) {
                Ok(()) => *cursor = event.version,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        subscriber = %id,
                        channel = %event.channel_name,
                        version = event.version,
                        "Subscriber queue full, command dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber = %id, "Delivery actor gone, command dropped");
                }
            }
        }
    }

    fn unsubscribe(
        &mut self,
        id: &str,
    ) {
        let Some(mut entry) = self.subscribers.remove(id) else {
            return;
        };
        if let Some(stop) = entry.stop.take() {
            let _ = stop.send(());
        }
        info!(
            subscriber = %id,
            subscribers = self.subscribers.len(),
            "Subscriber removed"
        );
    }

    fn cleanup(&mut self) {
        let now = Instant::now();
        let ttl = self.config.subscriber_ttl;
        let expired: Vec<String> = self
            .subscribers
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_activity) >= ttl)
            .map(|(id, _)| id.clone())
            .collect();

        if expired.is_empty() {
            return;
        }
        for id in &expired {
            debug!(subscriber = %id, "Subscriber expired");
            self.unsubscribe(id);
        }
        info!(removed = expired.len(), "Inactive subscribers removed");
    }

    fn status(&self) -> Vec<SubscriberStatus> {
        let mut list: Vec<SubscriberStatus> = self
            .subscribers
            .iter()
            .map(|(id, entry)| {
                let mut channels: Vec<ChannelCursor> = entry
                    .cursors
                    .iter()
                    .map(|(name, version)| ChannelCursor {
                        channel_name: name.clone(),
                        last_delivered_version: *version,
                    })
                    .collect();
                channels.sort_by(|a, b| a.channel_name.cmp(&b.channel_name));
                SubscriberStatus {
                    id: id.clone(),
                    channels,
                }
            })
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }
}

/// Кладёт пакет ресинхронизации в очередь подписчика, не блокируя hub.
///
/// Если очередь полна, отправка продолжается в отдельной задаче.
fn push_resync(
    id: &str,
    entry: &SubscriberEntry,
    batch: FeedBatch,
) {
    match entry.control.try_send(batch) {
        Ok(()) => {}
        Err(TrySendError::Full(batch)) => {
            warn!(subscriber = %id, "Subscriber queue full, resync deferred");
            let control = entry.control.clone();
            tokio::spawn(async move {
                let _ = control.send(batch).await;
            });
        }
        Err(TrySendError::Closed(_)) => {
            debug!(subscriber = %id, "Delivery actor gone, resync dropped");
        }
    }
}

/// Имена каналов как есть; пустые и состоящие из пробелов пропускаются.
fn channel_names(channels: &[String]) -> impl Iterator<Item = &str> {
    channels
        .iter()
        .map(String::as_str)
        .filter(|name| !name.trim().is_empty())
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
