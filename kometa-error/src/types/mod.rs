pub mod channel;
pub mod config;
pub mod hub;
pub mod transport;

// Публичный экспорт всех типов ошибок из вложенных модулей, чтобы упростить
// доступ к ним из внешнего кода.
pub use channel::*;
pub use config::*;
pub use hub::*;
pub use transport::*;

use crate::{ErrorExt, StatusCode};

/// Универсальная ошибка с кодом и сообщением.
#[derive(Debug, Clone)]
pub struct GenericError {
    code: StatusCode,
    message: String,
}

impl GenericError {
    pub fn new(
        code: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for GenericError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for GenericError {}

impl ErrorExt for GenericError {
    fn status_code(&self) -> StatusCode {
        self.code
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Конвертация из std::io::Error
impl From<std::io::Error> for crate::StackError {
    fn from(err: std::io::Error) -> Self {
        let code = match err.kind() {
            std::io::ErrorKind::NotFound => StatusCode::NotFound,
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => StatusCode::ConnectionFailed,
            std::io::ErrorKind::AddrInUse | std::io::ErrorKind::AddrNotAvailable => {
                StatusCode::BindFailed
            }
            std::io::ErrorKind::TimedOut => StatusCode::Timeout,
            std::io::ErrorKind::UnexpectedEof => StatusCode::UnexpectedEof,
            _ => StatusCode::Io,
        };

        crate::StackError::new(GenericError::new(code, err.to_string()))
    }
}

/// Конвертация из std::string::FromUtf8Error
impl From<std::string::FromUtf8Error> for crate::StackError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        crate::StackError::new(GenericError::new(
            StatusCode::InvalidUtf8,
            format!("UTF-8 conversion failed: {err}"),
        ))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn test_generic_error() {
        let err = GenericError::new(StatusCode::InvalidArgs, "test message");
        assert_eq!(err.status_code(), StatusCode::InvalidArgs);
        assert_eq!(err.to_string(), "test message");
    }

    /// Тест проверяет маппинг std::io::ErrorKind -> StatusCode.
    #[test]
    fn test_io_error_kind_mapping() {
        let cases = vec![
            (io::ErrorKind::NotFound, StatusCode::NotFound, "no such file"),
            (io::ErrorKind::AddrInUse, StatusCode::BindFailed, "in use"),
            (
                io::ErrorKind::ConnectionReset,
                StatusCode::ConnectionFailed,
                "reset",
            ),
            (io::ErrorKind::TimedOut, StatusCode::Timeout, "timeout"),
            (io::ErrorKind::Other, StatusCode::Io, "other"),
        ];

        for (kind, expected_code, msg) in cases {
            let stack: crate::StackError = io::Error::new(kind, msg).into();
            assert_eq!(stack.status_code(), expected_code, "kind={:?}", kind);
            assert!(stack.to_string().contains(msg));
        }
    }

    #[test]
    fn test_from_utf8_error_conversion() {
        let err = String::from_utf8(vec![0xff]).unwrap_err();
        let stack: crate::StackError = err.into();
        assert_eq!(stack.status_code(), StatusCode::InvalidUtf8);
        assert!(stack.to_string().contains("UTF-8 conversion failed"));
    }
}
