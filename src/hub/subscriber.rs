use std::{collections::VecDeque, time::Duration};

use tokio::{
    sync::{mpsc, oneshot},
    time::{interval_at, sleep, sleep_until, Instant, MissedTickBehavior},
};
use tracing::{debug, warn};

use super::{dispatcher::HubRequest, feed::FeedBatch};

/// Ёмкость очереди запросов на выдачу пакетов.
const PULL_QUEUE: usize = 16;

/// Параметры актора доставки одного подписчика.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Сколько пакетов может ждать клиента.
    pub queue_size: usize,
    /// Ёмкость управляющей очереди (hub → актор).
    pub control_queue_size: usize,
    /// Сколько ждать освобождения места, прежде чем отписать клиента.
    pub feed_timeout: Duration,
    pub heartbeat: Duration,
}

/// Результат ожидания следующего пакета.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedPoll {
    /// Пакет получен.
    Batch(FeedBatch),
    /// За отведённое время данных не появилось.
    Empty,
    /// Актор доставки остановлен.
    Gone,
}

/// Handle для выборки пакетов подписчика. Дёшево клонируется.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    pulls: mpsc::Sender<oneshot::Sender<FeedBatch>>,
}

/// Части запущенного актора доставки, которые забирает hub.
pub(crate) struct DeliveryParts {
    pub control: mpsc::Sender<FeedBatch>,
    pub stop: oneshot::Sender<()>,
    pub feed: FeedHandle,
}

/// Актор доставки: буфер пакетов между hub и клиентом.
///
/// Hub кладёт пакеты в управляющую очередь без ожидания; клиент забирает их
/// через [`FeedHandle`]. Пока буфер полон, из управляющей очереди ничего не
/// читается. Если место не освободилось за `feed_timeout`, актор просит hub
/// отписать клиента и завершается.
struct DeliveryActor {
    id: String,
    capacity: usize,
    pending: VecDeque<FeedBatch>,
    held: Option<(FeedBatch, Instant)>,
    waiters: VecDeque<oneshot::Sender<FeedBatch>>,
    feed_timeout: Duration,
    heartbeat: Duration,
    control: mpsc::Receiver<FeedBatch>,
    pulls: mpsc::Receiver<oneshot::Sender<FeedBatch>>,
    stop: oneshot::Receiver<()>,
    hub: mpsc::WeakSender<HubRequest>,
}

////////////////////////////////////////////////////////////////////////////////
// FeedHandle
////////////////////////////////////////////////////////////////////////////////

impl FeedHandle {
    /// Ставит запрос в очередь актора. `None`, если актор уже остановлен.
    ///
    /// Возвращённый приёмник можно держать сколько угодно: пакет, отданный
    /// в него, из буфера уже удалён.
    pub async fn request(&self) -> Option<oneshot::Receiver<FeedBatch>> {
        let (tx, rx) = oneshot::channel();
        self.pulls.send(tx).await.ok()?;
        Some(rx)
    }

    /// Ждёт следующий пакет не дольше `timeout`.
    pub async fn poll(
        &self,
        timeout: Duration,
    ) -> FeedPoll {
        let Some(mut rx) = self.request().await else {
            return FeedPoll::Gone;
        };

        tokio::select! {
            res = &mut rx => match res {
                Ok(batch) => FeedPoll::Batch(batch),
                Err(_) => FeedPoll::Gone,
            },
            _ = sleep(timeout) => {
                // Пакет мог быть отдан в момент истечения таймаута.
                rx.close();
                match rx.try_recv() {
                    Ok(batch) => FeedPoll::Batch(batch),
                    Err(_) => FeedPoll::Empty,
                }
            }
        }
    }

    /// `true`, если актор доставки завершился.
    pub fn is_closed(&self) -> bool {
        self.pulls.is_closed()
    }
}

////////////////////////////////////////////////////////////////////////////////
// DeliveryActor
////////////////////////////////////////////////////////////////////////////////

/// Запускает актор доставки подписчика `id`.
pub(crate) fn spawn_delivery(
    id: String,
    config: &DeliveryConfig,
    hub: mpsc::WeakSender<HubRequest>,
) -> DeliveryParts {
    let (control_tx, control_rx) = mpsc::channel(config.control_queue_size.max(1));
    let (pulls_tx, pulls_rx) = mpsc::channel(PULL_QUEUE);
    let (stop_tx, stop_rx) = oneshot::channel();

    let actor = DeliveryActor {
        id,
        capacity: config.queue_size.max(1),
        pending: VecDeque::new(),
        held: None,
        waiters: VecDeque::new(),
        feed_timeout: config.feed_timeout,
        heartbeat: config.heartbeat,
        control: control_rx,
        pulls: pulls_rx,
        stop: stop_rx,
        hub,
    };
    tokio::spawn(actor.run());

    DeliveryParts {
        control: control_tx,
        stop: stop_tx,
        feed: FeedHandle { pulls: pulls_tx },
    }
}

impl DeliveryActor {
    async fn run(mut self) {
        debug!(subscriber = %self.id, "Delivery actor started");

        let mut heartbeat = interval_at(Instant::now() + self.heartbeat, self.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.drain();
            let deadline = self.held.as_ref().map(|(_, deadline)| *deadline);

            tokio::select! {
                _ = &mut self.stop => {
                    debug!(subscriber = %self.id, "Delivery actor stopped");
                    break;
                }
                batch = self.control.recv(), if self.held.is_none() => match batch {
                    Some(batch) => self.accept(batch),
                    None => {
                        debug!(subscriber = %self.id, "Control queue closed");
                        break;
                    }
                },
                Some(waiter) = self.pulls.recv() => self.waiters.push_back(waiter),
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    warn!(
                        subscriber = %self.id,
                        pending = self.pending.len(),
                        "Subscriber is not reading its feed, unsubscribing"
                    );
                    if let Some(hub) = self.hub.upgrade() {
                        let _ = hub.send(HubRequest::Unsubscribe { id: self.id.clone() }).await;
                    }
                    break;
                }
                _ = heartbeat.tick() => {
                    debug!(
                        subscriber = %self.id,
                        pending = self.pending.len(),
                        waiters = self.waiters.len(),
                        "Subscriber alive"
                    );
                }
            }
        }
    }

    /// Кладёт пакет в буфер; если буфер полон, придерживает его до
    /// освобождения места.
    fn accept(
        &mut self,
        batch: FeedBatch,
    ) {
        if self.pending.len() < self.capacity {
            self.pending.push_back(batch);
        } else {
            debug!(subscriber = %self.id, "Feed buffer full, holding batch");
            self.held = Some((batch, Instant::now() + self.feed_timeout));
        }
    }

    /// Раздаёт буфер ожидающим клиентам и переносит придержанный пакет.
    fn drain(&mut self) {
        self.serve_waiters();
        if self.pending.len() < self.capacity {
            if let Some((batch, _)) = self.held.take() {
                self.pending.push_back(batch);
                self.serve_waiters();
            }
        }
        self.waiters.retain(|waiter| !waiter.is_closed());
    }

    fn serve_waiters(&mut self) {
        while let Some(batch) = self.pending.pop_front() {
            let Some(waiter) = self.next_waiter() else {
                self.pending.push_front(batch);
                break;
            };
            // Клиент мог уйти между проверкой и отправкой.
            if let Err(batch) = waiter.send(batch) {
                self.pending.push_front(batch);
            }
        }
    }

    /// Самый старый из ещё ожидающих клиентов.
    fn next_waiter(&mut self) -> Option<oneshot::Sender<FeedBatch>> {
        while let Some(waiter) = self.waiters.pop_front() {
            if !waiter.is_closed() {
                return Some(waiter);
            }
        }
        None
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
