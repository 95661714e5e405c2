use std::path::PathBuf;

use clap::Parser;

/// Аргументы командной строки сервера.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "kometa")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Kometa - real-time publish/subscribe broker", long_about = None)]
pub struct CliArgs {
    /// Файл конфигурации (toml, yaml или json)
    #[arg(short, long, env = "KOMETA_CONFIG", help = "Путь к файлу конфигурации")]
    pub config: Option<PathBuf>,
    /// Адрес, на котором слушает HTTP-сервер
    #[arg(long, help = "IP-адрес для входящих соединений")]
    pub ip: Option<String>,
    /// Порт HTTP-сервера
    #[arg(short, long, help = "Порт для входящих соединений")]
    pub port: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let args = CliArgs::parse_from(["kometa", "--ip", "127.0.0.1", "--port", "9000"]);
        assert_eq!(args.ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(args.port, Some(9000));
        assert!(args.config.is_none());

        let args = CliArgs::parse_from(["kometa", "-c", "/etc/kometa.toml"]);
        assert_eq!(args.config, Some(PathBuf::from("/etc/kometa.toml")));
    }

    #[test]
    fn test_reject_bad_port() {
        assert!(CliArgs::try_parse_from(["kometa", "--port", "70000"]).is_err());
    }
}
