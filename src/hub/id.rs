use uuid::Uuid;

/// Новый идентификатор подписчика.
///
/// UUID v4 из криптографического генератора ОС: идентификатор служит
/// токеном сессии и не должен угадываться.
pub fn new_subscriber_id() -> String {
    Uuid::new_v4().to_string()
}
