use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use kometa_error::{GenericError, KometaResult, StatusCode, TransportError};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{mpsc, oneshot},
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use super::{log_command_error, router, CommandContext, Reply, TransportState};
use crate::hub::{FeedBatch, FeedHandle, SubscriberResponse};

/// Ёмкость очереди исходящих ответов одного соединения.
const SEND_QUEUE: usize = 255;

/// Запрос клиента.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default)]
    pub request_id: i64,
    pub command: String,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
}

/// Ответ на запрос клиента.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeReply {
    pub request_id: i64,
    pub data: serde_json::Value,
}

struct WsContext<'a> {
    envelope: &'a Envelope,
    send: &'a mpsc::Sender<String>,
}

pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<TransportState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Обслуживает одно соединение.
///
/// Читатель выполняет команды клиента; писатель отправляет ответы из
/// очереди и, после `subscribe`, пакеты ленты подписчика. Когда читатель
/// завершается, очередь ответов закрывается и писатель закрывает сокет.
async fn handle_socket(
    socket: WebSocket,
    state: TransportState,
) {
    info!("WebSocket connection opened");
    let (sink, stream) = socket.split();
    let (send_tx, send_rx) = mpsc::channel(SEND_QUEUE);
    let (feed_tx, feed_rx) = mpsc::channel(1);

    let writer = tokio::spawn(write_loop(sink, send_rx, feed_rx, state.heartbeat));
    let subscriber = read_loop(stream, &state, send_tx, feed_tx).await;

    if let Err(e) = writer.await {
        warn!(error = %e, "WebSocket writer failed");
    }
    info!(
        subscriber = subscriber.as_deref().unwrap_or("anonymous"),
        "WebSocket connection closed"
    );
}

/// Возвращает идентификатор подписчика соединения, если он был создан.
async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    state: &TransportState,
    send: mpsc::Sender<String>,
    feeds: mpsc::Sender<FeedHandle>,
) -> Option<String> {
    let mut subscriber: Option<String> = None;

    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Binary frame is not UTF-8, closing");
                    break;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(error = %e, "WebSocket read failed");
                break;
            }
        };
        debug!(message = %text, "WebSocket message received");

        let envelope: Envelope = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                let err = TransportError::MalformedEnvelope {
                    reason: e.to_string(),
                };
                warn!(error = %err, "Closing WebSocket");
                break;
            }
        };

        let mut ctx = WsContext {
            envelope: &envelope,
            send: &send,
        };

        match envelope.command.as_str() {
            "keepAlive" => {
                let Some(id) = subscriber.as_deref() else {
                    warn!("keepAlive before subscribe, closing");
                    break;
                };
                if let Err(e) = state.hub.keep_alive(id).await {
                    info!(subscriber = %id, error = %e, "Subscriber is gone, closing");
                    break;
                }
            }
            "subscribe" => {
                let channels = router::split_channels(ctx.param("channels").as_deref());
                let subscription = match state.hub.subscribe(channels).await {
                    Ok(subscription) => subscription,
                    Err(e) => {
                        warn!(error = %e, "Subscribe failed, closing");
                        break;
                    }
                };
                subscriber = Some(subscription.id.clone());
                if feeds.send(subscription.feed).await.is_err() {
                    break;
                }
                let reply = Reply::Subscribed {
                    subscriber_id: subscription.id,
                };
                if ctx.respond(reply).await.is_err() {
                    break;
                }
            }
            command => {
                let result =
                    router::route(&state.hub, state.files.as_ref(), command, &mut ctx).await;
                if let Err(e) = result {
                    log_command_error(command, &e);
                    let data = serde_json::to_value(e.to_response()).unwrap_or_default();
                    if ctx.send_data(data).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    subscriber
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outgoing: mpsc::Receiver<String>,
    mut feeds: mpsc::Receiver<FeedHandle>,
    heartbeat: Duration,
) {
    let mut feed: Option<FeedHandle> = None;
    // Запрос к ленте живёт между итерациями: пакет, уже отданный актором
    // доставки, не теряется при срабатывании другой ветки.
    let mut pull: Option<oneshot::Receiver<FeedBatch>> = None;
    let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if pull.is_none() {
            if let Some(handle) = &feed {
                pull = handle.request().await;
                if pull.is_none() {
                    debug!("Subscriber feed closed");
                    feed = None;
                }
            }
        }

        tokio::select! {
            message = outgoing.recv() => match message {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        debug!(error = %e, "WebSocket write failed");
                        break;
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            Some(handle) = feeds.recv() => {
                feed = Some(handle);
                pull = None;
            }
            batch = async {
                match pull.as_mut() {
                    Some(rx) => rx.await,
                    None => std::future::pending().await,
                }
            }, if pull.is_some() => {
                pull = None;
                let Ok(batch) = batch else {
                    debug!("Subscriber feed closed");
                    feed = None;
                    continue;
                };
                let text = match serde_json::to_string(&SubscriberResponse::ok(batch)) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode feed batch");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    debug!(error = %e, "WebSocket write failed");
                    break;
                }
            }
            _ = ticker.tick() => debug!(subscribed = feed.is_some(), "WebSocket writer alive"),
        }
    }
}

impl<'a> WsContext<'a> {
    async fn send_data(
        &self,
        data: serde_json::Value,
    ) -> KometaResult<()> {
        let reply = EnvelopeReply {
            request_id: self.envelope.request_id,
            data,
        };
        let text = serde_json::to_string(&reply)
            .map_err(|e| GenericError::new(StatusCode::SerializationFailed, e.to_string()))?;
        self.send
            .send(text)
            .await
            .map_err(|_| TransportError::ConnectionClosed.into())
    }
}

#[async_trait]
impl<'a> CommandContext for WsContext<'a> {
    fn param(
        &self,
        name: &str,
    ) -> Option<String> {
        match self.envelope.parameters.get(name)? {
            serde_json::Value::Null => None,
            serde_json::Value::String(value) => Some(value.clone()),
            other => Some(other.to_string()),
        }
    }

    async fn respond(
        &mut self,
        reply: Reply,
    ) -> KometaResult<()> {
        match reply.to_json() {
            Some(data) => self.send_data(data).await,
            None => Ok(()),
        }
    }
}
