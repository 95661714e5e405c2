use std::{collections::BTreeMap, time::Duration};

use kometa_error::{GenericError, KometaResult, StatusCode};
use serde::Serialize;
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, warn};

use super::dispatcher::HubHandle;
use crate::channel::Operation;

/// Состояние брокера, публикуемое в служебный канал.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStatus {
    pub subscribers: Vec<StatusSubscriber>,
    pub channels: Vec<StatusChannel>,
    pub statistics: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSubscriber {
    pub id: String,
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChannel {
    pub channel_name: String,
}

/// Собирает текущее состояние hub и реестра.
pub async fn collect_status(hub: &HubHandle) -> KometaResult<HubStatus> {
    let subscribers: Vec<StatusSubscriber> = hub
        .status()
        .await?
        .into_iter()
        .map(|s| StatusSubscriber {
            id: s.id,
            channels: s.channels.into_iter().map(|c| c.channel_name).collect(),
        })
        .collect();
    let channels: Vec<StatusChannel> = hub
        .channels()
        .await?
        .into_iter()
        .map(|channel_name| StatusChannel { channel_name })
        .collect();

    let mut statistics = BTreeMap::new();
    statistics.insert(
        "tasks".to_string(),
        tokio::runtime::Handle::current()
            .metrics()
            .num_alive_tasks()
            .to_string(),
    );
    statistics.insert("subscribers".to_string(), subscribers.len().to_string());
    statistics.insert("channels".to_string(), channels.len().to_string());

    Ok(HubStatus {
        subscribers,
        channels,
        statistics,
    })
}

/// Публикует состояние как CREATE в канал `channel`.
pub async fn publish_status(
    hub: &HubHandle,
    channel: &str,
) -> KometaResult<()> {
    let status = collect_status(hub).await?;
    let json = serde_json::to_string(&status)
        .map_err(|e| GenericError::new(StatusCode::SerializationFailed, e.to_string()))?;
    hub.apply(Operation::Create, channel, json).await?;
    Ok(())
}

/// Запускает периодическую публикацию состояния.
///
/// Задача завершается сама, когда hub останавливается.
pub fn spawn_status_task(
    hub: HubHandle,
    channel: String,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if hub.is_closed() {
                break;
            }
            match publish_status(&hub, &channel).await {
                Ok(()) => debug!(channel = %channel, "Status published"),
                Err(e) if e.status_code() == StatusCode::ActorUnavailable => break,
                Err(e) => warn!(error = %e, "Failed to publish status"),
            }
        }
        debug!("Status task stopped");
    })
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
