//! Ошибки клиента панели x-ui.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum XuiError {
    /// Панель отвергла учётные данные или ни один login-адрес не ответил.
    #[error("Не удалось авторизоваться в панели x-ui: {0}")]
    Auth(String),

    /// Ни одна из известных форм API не приняла запрос.
    #[error("Панель не ответила на операцию `{operation}` (испробовано: {attempted:?})")]
    EndpointsExhausted {
        operation: &'static str,
        attempted: Vec<String>,
    },

    /// Эндпоинт существует и понял запрос, но явно ответил `success: false`.
    #[error("Панель отвергла операцию `{operation}`: {message}")]
    Rejected {
        operation: &'static str,
        message: String,
    },

    /// Все попытки создать клиента столкнулись с занятыми именами или ошибками.
    #[error("Не удалось создать клиента: все имена заняты или панель отвергает запись (испробовано: {tried:?})")]
    ProvisioningExhausted { tried: Vec<String> },

    #[error("Inbound {0} не найден в панели")]
    InboundNotFound(i64),

    #[error(transparent)]
    Link(#[from] crate::link::LinkError),

    #[error("Некорректный адрес панели: {0}")]
    BadBaseUrl(#[from] url::ParseError),

    #[error("Ошибка HTTP-транспорта: {0}")]
    Transport(#[from] reqwest::Error),
}
