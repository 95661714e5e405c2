use std::{sync::Arc, time::Duration};

use anyhow::Result;
use kometa::{
    Broker, ChannelStore, FileChannelStore, Operation, PersistenceFailurePolicy, ResponseStatus,
    Settings, SubscriberResponse,
};

fn settings() -> Settings {
    Settings {
        max_subscribers: 128,
        status_channel: false,
        ..Settings::default()
    }
}

fn commands(resp: &SubscriberResponse) -> Vec<(Operation, String, String, i64)> {
    resp.commands
        .iter()
        .map(|c| (c.command, c.channel.clone(), c.data.clone(), c.version))
        .collect()
}

/// Тест проверяет сценарий чата: состояние, созданное до подписки,
/// приходит одним пакетом ресинхронизации.
#[tokio::test]
async fn chatroom_resync_after_updates() -> Result<()> {
    let broker = Broker::start(&settings(), None).await?;
    let hub = broker.hub();

    hub.apply(Operation::Create, "chatroom", "hello".into()).await?;
    hub.apply(Operation::Update, "chatroom", "world".into()).await?;

    let sub = hub.subscribe(vec!["chatroom".into()]).await?;
    let resp = hub.poll(&sub.id).await?;

    assert_eq!(resp.status, ResponseStatus::Ok);
    assert_eq!(
        commands(&resp),
        vec![
            (Operation::Create, "chatroom".into(), "hello".into(), 1),
            (Operation::Update, "chatroom".into(), "world".into(), 2),
        ]
    );

    broker.shutdown().await?;
    Ok(())
}

/// Тест проверяет, что несколько подписчиков одного канала получают все
/// изменения в порядке версий, а подписчик другого канала их не видит.
#[tokio::test]
async fn fan_out_to_many_subscribers() -> Result<()> {
    let broker = Broker::start(&settings(), None).await?;
    let hub = broker.hub().clone();

    let mut readers = Vec::new();
    for _ in 0..5 {
        let sub = hub.subscribe(vec!["news".into()]).await?;
        // Снимок news и приватного канала.
        hub.poll(&sub.id).await?;
        hub.poll(&sub.id).await?;
        readers.push(sub);
    }
    let other = hub.subscribe(vec!["sport".into()]).await?;
    hub.poll(&other.id).await?;
    hub.poll(&other.id).await?;

    for i in 1..=3 {
        hub.apply(Operation::Update, "news", format!("n{i}")).await?;
    }

    for sub in &readers {
        let mut versions = Vec::new();
        while versions.len() < 3 {
            let resp = hub.poll(&sub.id).await?;
            assert_eq!(resp.status, ResponseStatus::Ok);
            versions.extend(resp.commands.iter().map(|c| c.version));
        }
        assert_eq!(versions, vec![1, 2, 3]);
    }

    let status = hub.status().await?;
    assert_eq!(status.len(), 6);

    broker.shutdown().await?;
    Ok(())
}

/// Тест проверяет, что продюсеры разных каналов работают параллельно и
/// версии каждого канала идут без пропусков.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_keep_versions_dense() -> Result<()> {
    let broker = Broker::start(&settings(), None).await?;

    let mut tasks = Vec::new();
    for ch in 0..4 {
        let hub = broker.hub().clone();
        tasks.push(tokio::spawn(async move {
            let name = format!("channel-{ch}");
            let mut versions = Vec::new();
            for i in 0..50 {
                let event = hub
                    .apply(Operation::Update, &name, format!("{i}"))
                    .await?
                    .expect("non-blank channel");
                versions.push(event.version);
            }
            Ok::<_, kometa_error::StackError>(versions)
        }));
    }

    for task in tasks {
        let versions = task.await??;
        assert_eq!(versions, (1..=50).collect::<Vec<i64>>());
    }

    broker.shutdown().await?;
    Ok(())
}

/// Тест проверяет перезапуск с файловым хранилищем: каналы восстанавливаются
/// целиком, приватные каналы не сохраняются.
#[tokio::test]
async fn file_store_survives_restart() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let store: Arc<dyn ChannelStore> = Arc::new(FileChannelStore::open(tmp.path()).await?);

    let broker = Broker::start(&settings(), Some(store.clone())).await?;
    let sub = broker.hub().subscribe(vec!["chatroom".into()]).await?;
    broker
        .hub()
        .apply(Operation::Create, "chatroom", "hello".into())
        .await?;
    broker
        .hub()
        .apply(Operation::Update, "chatroom", "world".into())
        .await?;
    broker.shutdown().await?;

    let restored = store.load_all().await?;
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].channel_name, "chatroom");
    assert!(!restored
        .iter()
        .any(|c| c.channel_name == format!("private_{}", sub.id)));

    let broker = Broker::start(&settings(), Some(store)).await?;
    let next = broker
        .hub()
        .apply(Operation::Update, "chatroom", "again".into())
        .await?
        .expect("event");
    assert_eq!(next.version, 3);
    broker.shutdown().await?;
    Ok(())
}

/// Тест проверяет политику `degrade`: при недоступном хранилище запись
/// продолжается в памяти.
#[tokio::test]
async fn degrade_policy_keeps_serving() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let dir = tmp.path().join("data");
    let store: Arc<dyn ChannelStore> = Arc::new(FileChannelStore::open(&dir).await?);
    std::fs::remove_dir_all(&dir)?;

    let mut settings = settings();
    settings.persistence.failure_policy = PersistenceFailurePolicy::Degrade;
    let broker = Broker::start(&settings, Some(store)).await?;

    broker
        .hub()
        .apply(Operation::Create, "news", "a".into())
        .await?;
    let event = broker
        .hub()
        .apply(Operation::Update, "news", "b".into())
        .await?
        .expect("event");
    assert_eq!(event.version, 2);

    broker.shutdown().await?;
    Ok(())
}

/// Тест проверяет политику `report`: ошибка записи возвращается
/// продюсеру, но изменение применяется.
#[tokio::test]
async fn report_policy_returns_error() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let dir = tmp.path().join("data");
    let store: Arc<dyn ChannelStore> = Arc::new(FileChannelStore::open(&dir).await?);
    std::fs::remove_dir_all(&dir)?;

    let broker = Broker::start(&settings(), Some(store)).await?;
    let sub = broker.hub().subscribe(vec!["news".into()]).await?;
    broker.hub().poll(&sub.id).await?;
    broker.hub().poll(&sub.id).await?;

    let err = broker
        .hub()
        .apply(Operation::Create, "news", "a".into())
        .await
        .unwrap_err();
    assert_eq!(
        err.status_code(),
        kometa_error::StatusCode::PersistenceFailed
    );

    let resp = broker.hub().poll(&sub.id).await?;
    assert_eq!(
        commands(&resp),
        vec![(Operation::Create, "news".into(), "a".into(), 1)]
    );

    broker.shutdown().await?;
    Ok(())
}

/// Тест проверяет полный жизненный цикл подписчика с TTL на
/// приостановленных часах.
#[tokio::test(start_paused = true)]
async fn idle_subscriber_expires() -> Result<()> {
    let settings = Settings {
        subscriber_ttl_secs: 60,
        cleanup_interval_secs: 10,
        ..settings()
    };
    let broker = Broker::start(&settings, None).await?;
    let sub = broker.hub().subscribe(Vec::new()).await?;

    tokio::time::sleep(Duration::from_secs(55)).await;
    assert_eq!(broker.hub().status().await?.len(), 1);

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(broker.hub().status().await?.is_empty());
    assert_eq!(
        broker.hub().poll(&sub.id).await?,
        SubscriberResponse::not_found()
    );

    broker.shutdown().await?;
    Ok(())
}
