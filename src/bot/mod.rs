//! Telegram-слой: диспетчеризация, клавиатуры, обработчики.

pub mod handlers;
pub mod keyboards;
