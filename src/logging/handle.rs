use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tracing_appender::non_blocking::WorkerGuard;

/// Handle для управления lifecycle логирования.
///
/// Держит `WorkerGuard` файлового writer-а: пока handle жив, фоновый поток
/// `tracing-appender` принимает записи; при `shutdown` буфер сбрасывается.
pub struct LoggingHandle {
    file_guard: Option<WorkerGuard>,
    shutdown_in_progress: Arc<AtomicBool>,
    flush_timeout: Duration,
}

impl LoggingHandle {
    pub fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self {
            file_guard,
            shutdown_in_progress: Arc::new(AtomicBool::new(false)),
            flush_timeout: Duration::from_secs(5),
        }
    }

    /// Устанавливает custom flush timeout.
    pub fn with_flush_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Есть ли активный файловый writer.
    pub fn has_file_sink(&self) -> bool {
        self.file_guard.is_some()
    }

    pub fn is_shutdown_in_progress(&self) -> bool {
        self.shutdown_in_progress.load(Ordering::Acquire)
    }

    /// Graceful shutdown: сбрасывает буферы файлового writer-а.
    ///
    /// Сброс выполняется в блокирующем потоке и ограничен `flush_timeout`.
    pub async fn shutdown(mut self) {
        self.shutdown_in_progress.store(true, Ordering::Release);

        tracing::info!(
            timeout_ms = self.flush_timeout.as_millis() as u64,
            "Logging shutdown initiated"
        );

        let Some(guard) = self.file_guard.take() else {
            return;
        };

        match tokio::time::timeout(
            self.flush_timeout,
            tokio::task::spawn_blocking(move || drop(guard)),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => eprintln!("Logging shutdown task panicked: {e}"),
            Err(_) => eprintln!(
                "WARNING: Logging shutdown exceeded timeout of {}ms",
                self.flush_timeout.as_millis()
            ),
        }
    }
}

impl Drop for LoggingHandle {
    fn drop(&mut self) {
        if self.file_guard.is_some() && !self.is_shutdown_in_progress() {
            eprintln!(
                "WARNING: LoggingHandle dropped without explicit shutdown(). \
                 Some logs may be lost."
            )
        }
    }
}
