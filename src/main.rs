use clap::Parser;
use kometa::{
    banner::print_banner, channel::AbortWatch, init_logging, open_store, transport, Broker,
    CliArgs, Settings,
};
use kometa_error::{KometaResult, ResultExt, TransportError};
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("kometa: {e}");
        std::process::exit(1);
    }
}

async fn run() -> KometaResult<()> {
    let args = CliArgs::parse();
    let settings = Settings::from_args(&args)?;
    let logging = init_logging(settings.logging.clone())?;

    let addr = settings.socket_addr()?;
    let store = open_store(&settings.persistence)
        .await
        .context("open channel store")?;
    let storage = if store.is_some() {
        format!("file ({})", settings.persistence.data_dir.display())
    } else {
        "memory".to_string()
    };

    let broker = Broker::start(&settings, store)
        .await
        .context("start broker")?;
    let app = transport::app(broker.transport_state(&settings));

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| TransportError::Bind {
            address: addr.to_string(),
            reason: e.to_string(),
        })?;
    print_banner(addr, &storage, settings.status_channel);
    info!(address = %addr, "Listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(broker.abort_watch()))
        .await;
    if let Err(e) = &served {
        error!(error = %e, "HTTP server failed");
    }

    let aborted = broker.abort_watch().error();
    broker.shutdown().await?;
    // Сброс логов до выхода, чтобы причина остановки попала в файл.
    logging.shutdown().await;

    if let Some(err) = aborted {
        return Err(err.context("persistence failure"));
    }
    served.map_err(Into::into)
}

/// Завершается по Ctrl-C или по сигналу `Abort` от актора канала.
async fn shutdown_signal(mut abort: AbortWatch) {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => {
                error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        err = abort.raised() => error!(error = %err, "Persistence failed, shutting down"),
    }
}
