use std::sync::Arc;

use kometa_error::{KometaResult, ResultExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::info;

use crate::{
    channel::{
        AbortSignal, AbortWatch, ChannelStore, FileChannelStore, RegistryHandle, SYSTEM_CHANNEL,
    },
    config::{PersistenceSettings, Settings},
    hub::{spawn_status_task, HubHandle},
    transport::{StaticFiles, TransportState},
};

/// Запущенный брокер: реестр каналов, hub и задача публикации состояния.
pub struct Broker {
    hub: HubHandle,
    status_task: Option<JoinHandle<()>>,
    abort: AbortWatch,
}

impl Broker {
    /// Запускает брокер с хранилищем `store`.
    ///
    /// Каналы из хранилища восстанавливаются до того, как hub начнёт
    /// принимать запросы.
    pub async fn start(
        settings: &Settings,
        store: Option<Arc<dyn ChannelStore>>,
    ) -> KometaResult<Self> {
        let (events_tx, events_rx) = mpsc::channel(settings.max_subscribers);
        let (abort_signal, abort) = AbortSignal::new();
        let mut registry_config = settings.registry_config(store);
        registry_config.abort = Some(abort_signal);
        let registry = RegistryHandle::start(registry_config, events_tx)
            .await
            .context("restore channels")?;
        let hub = HubHandle::start(settings.hub_config(), registry, events_rx);

        let status_task = settings.status_channel.then(|| {
            spawn_status_task(
                hub.clone(),
                SYSTEM_CHANNEL.to_string(),
                settings.cleanup_interval(),
            )
        });

        info!(
            max_subscribers = settings.max_subscribers,
            status_channel = settings.status_channel,
            "Broker started"
        );
        Ok(Self {
            hub,
            status_task,
            abort,
        })
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Ожидание аварийной остановки (политика записи `Abort`).
    pub fn abort_watch(&self) -> AbortWatch {
        self.abort.clone()
    }

    /// Состояние для HTTP и WebSocket обработчиков.
    pub fn transport_state(
        &self,
        settings: &Settings,
    ) -> TransportState {
        TransportState {
            hub: self.hub.clone(),
            files: settings.web_root.as_ref().map(StaticFiles::new),
            heartbeat: std::time::Duration::from_secs(settings.heartbeat_secs),
        }
    }

    /// Останавливает hub и публикацию состояния.
    pub async fn shutdown(self) -> KometaResult<()> {
        if let Some(task) = self.status_task {
            task.abort();
        }
        self.hub.shutdown().await?;
        info!("Broker stopped");
        Ok(())
    }
}

/// Открывает файловое хранилище, если хранение включено.
pub async fn open_store(
    persistence: &PersistenceSettings,
) -> KometaResult<Option<Arc<dyn ChannelStore>>> {
    if !persistence.enabled {
        info!("Channel persistence disabled");
        return Ok(None);
    }
    let store = FileChannelStore::open(&persistence.data_dir).await?;
    info!(dir = %store.dir().display(), "Channel store opened");
    Ok(Some(Arc::new(store)))
}
