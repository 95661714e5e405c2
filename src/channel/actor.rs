use std::sync::Arc;

use chrono::Utc;
use kometa_error::{ChannelError, KometaResult, StackError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::{
    model::{Channel, ChangeEvent, Operation},
    store::{AbortSignal, ChannelStore, PersistenceFailurePolicy},
};

/// Запрос на изменение канала.
struct Mutation {
    operation: Operation,
    data: String,
    reply: oneshot::Sender<KometaResult<ChangeEvent>>,
}

/// Запрос на чтение полного снимка канала.
struct Read {
    /// Курсор запрашивающего; снимок всегда отдаётся целиком.
    _cursor: i64,
    reply: oneshot::Sender<Channel>,
}

/// Параметры актора канала.
#[derive(Clone)]
pub struct ChannelActorConfig {
    /// Ёмкость очереди изменений.
    pub mutation_queue: usize,
    /// Ёмкость очереди чтений.
    pub read_queue: usize,
    /// Хранилище; `None` отключает запись.
    pub store: Option<Arc<dyn ChannelStore>>,
    pub failure_policy: PersistenceFailurePolicy,
    /// Куда сообщить об отказе записи при политике `Abort`.
    pub abort: Option<AbortSignal>,
}

/// Handle актора канала. Дёшево клонируется.
#[derive(Clone)]
pub struct ChannelHandle {
    name: Arc<str>,
    mutations: mpsc::Sender<Mutation>,
    reads: mpsc::Sender<Read>,
}

/// Актор состояния канала: единственный владелец данных канала.
struct ChannelActor {
    channel: Channel,
    store: Option<Arc<dyn ChannelStore>>,
    failure_policy: PersistenceFailurePolicy,
    abort: Option<AbortSignal>,
    events: mpsc::Sender<ChangeEvent>,
    mutations: mpsc::Receiver<Mutation>,
    reads: mpsc::Receiver<Read>,
}

////////////////////////////////////////////////////////////////////////////////
// ChannelHandle
////////////////////////////////////////////////////////////////////////////////

impl ChannelHandle {
    /// Запускает актор для канала и возвращает handle.
    ///
    /// События изменений актор отправляет в `events` (очередь hub) в порядке
    /// версий.
    pub fn spawn(
        channel: Channel,
        config: ChannelActorConfig,
        events: mpsc::Sender<ChangeEvent>,
    ) -> Self {
        let (mutations_tx, mutations_rx) = mpsc::channel(config.mutation_queue.max(1));
        let (reads_tx, reads_rx) = mpsc::channel(config.read_queue.max(1));
        let name: Arc<str> = Arc::from(channel.channel_name.as_str());

        let actor = ChannelActor {
            channel,
            store: config.store,
            failure_policy: config.failure_policy,
            abort: config.abort,
            events,
            mutations: mutations_rx,
            reads: reads_rx,
        };
        tokio::spawn(actor.run());

        Self {
            name,
            mutations: mutations_tx,
            reads: reads_tx,
        }
    }

    /// Применяет операцию и ждёт результата.
    ///
    /// # Возвращает
    /// - событие изменения; ошибка записи возвращается при политике `Report`,
    ///   при этом изменение уже применено и разослано.
    pub async fn apply(
        &self,
        operation: Operation,
        data: String,
    ) -> KometaResult<ChangeEvent> {
        let (reply, rx) = oneshot::channel();
        self.mutations
            .send(Mutation {
                operation,
                data,
                reply,
            })
            .await
            .map_err(|_| self.gone())?;
        rx.await.map_err(|_| self.gone())?
    }

    /// Возвращает глубокую копию состояния канала.
    pub async fn read(
        &self,
        cursor: i64,
    ) -> KometaResult<Channel> {
        let (reply, rx) = oneshot::channel();
        self.reads
            .send(Read {
                _cursor: cursor,
                reply,
            })
            .await
            .map_err(|_| self.gone())?;
        rx.await.map_err(|_| self.gone().into())
    }

    fn gone(&self) -> ChannelError {
        ChannelError::ActorGone {
            channel: self.name.to_string(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// ChannelActor
////////////////////////////////////////////////////////////////////////////////

impl ChannelActor {
    async fn run(mut self) {
        debug!(channel = %self.channel.channel_name, "Channel actor started");

        loop {
            tokio::select! {
                mutation = self.mutations.recv() => match mutation {
                    Some(mutation) => self.handle_mutation(mutation).await,
                    None => break,
                },
                Some(read) = self.reads.recv() => {
                    let _ = read.reply.send(self.channel.clone());
                }
            }
        }

        debug!(channel = %self.channel.channel_name, "Channel actor stopped");
    }

    async fn handle_mutation(
        &mut self,
        mutation: Mutation,
    ) {
        let Mutation {
            operation,
            data,
            reply,
        } = mutation;

        let event = self.channel.apply(operation, data, Utc::now());
        debug!(
            channel = %event.channel_name,
            operation = %event.operation,
            version = event.version,
            "Channel operation applied"
        );

        let persisted = self.persist().await;
        self.forward(event.clone()).await;

        let _ = reply.send(persisted.map(|_| event));
    }

    /// Сохраняет снимок и применяет политику отказа.
    async fn persist(&mut self) -> KometaResult<()> {
        let Some(store) = self.store.as_ref() else {
            return Ok(());
        };
        let Err(err) = store.save(&self.channel).await else {
            return Ok(());
        };

        let name = self.channel.channel_name.clone();
        let failure = || {
            StackError::from(ChannelError::PersistenceFailed {
                channel: name.clone(),
                reason: err.to_string(),
            })
        };
        match self.failure_policy {
            PersistenceFailurePolicy::Report => {
                error!(channel = %name, error = %err, "Failed to persist channel");
                Err(failure())
            }
            PersistenceFailurePolicy::Degrade => {
                warn!(
                    channel = %name,
                    error = %err,
                    "Failed to persist channel; persistence disabled for this channel"
                );
                self.store = None;
                Ok(())
            }
            PersistenceFailurePolicy::Abort => {
                let failure = failure();
                match &self.abort {
                    Some(signal) => {
                        error!(
                            channel = %name,
                            error = %err,
                            "Failed to persist channel; stopping broker"
                        );
                        signal.raise(failure.clone());
                    }
                    None => error!(
                        channel = %name,
                        error = %err,
                        "Failed to persist channel; no abort handler, error reported only"
                    ),
                }
                Err(failure)
            }
        }
    }

    /// Передаёт событие в очередь hub.
    ///
    /// Пока очередь hub заполнена, актор продолжает отвечать на чтения:
    /// hub читает снимки каналов, и ожидание без этого могло бы зациклиться.
    async fn forward(
        &mut self,
        event: ChangeEvent,
    ) {
        loop {
            tokio::select! {
                biased;
                permit = self.events.reserve() => {
                    match permit {
                        Ok(permit) => permit.send(event),
                        Err(_) => info!(
                            channel = %self.channel.channel_name,
                            "Hub is gone; change event dropped"
                        ),
                    }
                    return;
                }
                Some(read) = self.reads.recv() => {
                    let _ = read.reply.send(self.channel.clone());
                }
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
