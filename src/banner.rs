use std::{env, net::SocketAddr};

use chrono::{DateTime, Local};

/// Полный баннер с информацией о брокере.
pub const BANNER_FULL: &str = r#"
    Kometa {version}
    ----------------------------------------------
    Mode:             {mode}
    Listening:        {listen}
    Storage:          {storage}
    Status channel:   {status}
    PID:              {pid}
    OS/Arch:          {os}/{arch}
    Build:            {git} ({build_time})
"#;

/// Компактный баннер.
pub const BANNER_COMPACT: &str = "Kometa {version} - {mode} - {listen} - PID {pid}";

/// Собирает текст баннера.
///
/// Режим выбирается переменной `KOMETA_BANNER` (`full` / `compact`); по
/// умолчанию полный в debug-сборке и компактный в release.
pub fn render_banner(
    listen: SocketAddr,
    storage: &str,
    status_channel: bool,
) -> String {
    let full = match env::var("KOMETA_BANNER").ok().as_deref() {
        Some("full") => true,
        Some("compact") => false,
        _ => cfg!(debug_assertions),
    };

    let mode = if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    };
    let git = option_env!("GIT_COMMIT").unwrap_or("unknown");
    let build_time_raw = option_env!("BUILD_TIME").unwrap_or("unknown");
    let build_time = match DateTime::parse_from_rfc3339(build_time_raw) {
        Ok(dt) => dt
            .with_timezone(&Local)
            .format("%d.%m.%Y %H:%M:%S")
            .to_string(),
        Err(_) => build_time_raw.to_string(),
    };

    let template = if full { BANNER_FULL } else { BANNER_COMPACT };
    template
        .replace("{version}", env!("CARGO_PKG_VERSION"))
        .replace("{mode}", mode)
        .replace("{listen}", &listen.to_string())
        .replace("{storage}", storage)
        .replace("{status}", if status_channel { "on" } else { "off" })
        .replace("{pid}", &std::process::id().to_string())
        .replace("{os}", env::consts::OS)
        .replace("{arch}", env::consts::ARCH)
        .replace("{git}", git)
        .replace("{build_time}", &build_time)
}

/// Печатает баннер в stdout.
pub fn print_banner(
    listen: SocketAddr,
    storage: &str,
    status_channel: bool,
) {
    println!("{}", render_banner(listen, storage, status_channel));
}
