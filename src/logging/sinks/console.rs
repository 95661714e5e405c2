use std::io;

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    registry::LookupSpan,
    Layer,
};

use crate::logging::config::{LogFormat, LoggingConfig};

/// Консольный layer в формате из конфигурации.
///
/// Формат стирается через `Box<dyn Layer>`, чтобы json, pretty и compact
/// давали один тип.
pub fn layer_with_config<S>(config: &LoggingConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let console = &config.console;
    let base = fmt::layer()
        .with_writer(io::stdout)
        .with_target(console.with_target)
        .with_thread_ids(console.with_thread_ids)
        .with_line_number(console.with_line_numbers);

    match config.console_format() {
        // ANSI-коды ломают JSON.
        LogFormat::Json => base
            .json()
            .with_current_span(true)
            .with_ansi(false)
            .boxed(),
        LogFormat::Pretty => base
            .pretty()
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(console.with_ansi)
            .boxed(),
        LogFormat::Compact => base.compact().with_ansi(console.with_ansi).boxed(),
    }
}
