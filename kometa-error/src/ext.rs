use std::{any::Any, error::Error};

use crate::StatusCode;

/// Расширение для ошибок брокера (object-safe).
///
/// Предоставляет вспомогательные методы для работы с ошибками:
/// - извлечение статус-кода,
/// - безопасное сообщение для клиента,
/// - детализированное сообщение для логов.
pub trait ErrorExt: Error + Send + Sync + 'static {
    /// Протокольный статус (для клиента или транспортного уровня).
    ///
    /// По умолчанию возвращает [`StatusCode::Internal`].
    fn status_code(&self) -> StatusCode {
        StatusCode::Internal
    }

    /// Возвращает ошибку как [`Any`](std::any::Any), чтобы можно было
    /// выполнить downcast к конкретному типу.
    fn as_any(&self) -> &dyn Any;

    /// Безопасное сообщение для клиента.
    ///
    /// Для внутренних ошибок возвращает `"Internal server error"`, чтобы не
    /// раскрывать пути к файлам и прочие детали.
    fn client_message(&self) -> String {
        match self.status_code() {
            StatusCode::Unknown | StatusCode::Internal | StatusCode::Unexpected => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Детализированное сообщение для логов.
    fn log_message(&self) -> String {
        format!("{self:?}")
    }

    /// Имя типа ошибки (для логирования).
    fn type_name(&self) -> String {
        std::any::type_name::<Self>()
            .split("::")
            .last()
            .unwrap_or("Unknown")
            .to_string()
    }
}
