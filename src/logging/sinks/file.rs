use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling::daily};
use tracing_subscriber::{fmt, registry::LookupSpan, Layer};

use crate::logging::config::LoggingConfig;

/// Файловый layer с ежедневной ротацией и неблокирующей записью.
///
/// Возвращённый `WorkerGuard` нужно держать до завершения процесса, иначе
/// хвост буфера не попадёт на диск.
pub fn layer_with_config<S>(config: &LoggingConfig) -> (impl Layer<S>, WorkerGuard)
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let file_appender = daily(&config.log_dir, &config.file.filename);
    let (non_blocking_writer, guard) = non_blocking(file_appender);

    let layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(non_blocking_writer);

    (layer, guard)
}
