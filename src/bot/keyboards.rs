//! Клавиатуры бота: inline и постоянные reply-кнопки.

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup};

use crate::xui::model::{Client, Inbound};

pub const BTN_CREATE: &str = "✨ Создать конфиг";
pub const BTN_DOWNLOAD: &str = "📥 Мои конфиги";
pub const BTN_INFO: &str = "📊 Информация";
pub const BTN_HELP: &str = "❓ Помощь";

const BUTTONS_PER_ROW: usize = 2;

pub fn user_menu() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![
            KeyboardButton::new(BTN_CREATE),
            KeyboardButton::new(BTN_DOWNLOAD),
        ],
        vec![
            KeyboardButton::new(BTN_INFO),
            KeyboardButton::new(BTN_HELP),
        ],
    ])
    .resize_keyboard()
    .persistent()
}

fn short_label(prefix: &str, remark: &str, id: i64) -> String {
    let title = if remark.is_empty() {
        format!("Inbound {}", id)
    } else {
        remark.chars().take(15).collect()
    };
    format!("{} {}", prefix, title)
}

/// Кнопки выбора inbound'а, по две в ряд. `action` уходит в callback data:
/// `create:{id}` или `clients:{id}`.
pub fn inbound_buttons(inbounds: &[Inbound], action: &str, icon: &str) -> InlineKeyboardMarkup {
    let mut keyboard = InlineKeyboardMarkup::default();
    for chunk in inbounds.chunks(BUTTONS_PER_ROW) {
        let row: Vec<InlineKeyboardButton> = chunk
            .iter()
            .map(|inbound| {
                InlineKeyboardButton::callback(
                    short_label(icon, &inbound.remark, inbound.id),
                    format!("{}:{}", action, inbound.id),
                )
            })
            .collect();
        keyboard = keyboard.append_row(row);
    }
    keyboard
}

/// Кнопки получения конфига для клиентов одного inbound'а.
pub fn client_config_buttons(inbound_id: i64, clients: &[Client]) -> InlineKeyboardMarkup {
    let mut keyboard = InlineKeyboardMarkup::default();
    for chunk in clients.chunks(BUTTONS_PER_ROW) {
        let row: Vec<InlineKeyboardButton> = chunk
            .iter()
            .map(|client| {
                let label: String = client.email.chars().take(15).collect();
                InlineKeyboardButton::callback(
                    format!("📥 {}", label),
                    format!("get:{}:{}", inbound_id, client.email),
                )
            })
            .collect();
        keyboard = keyboard.append_row(row);
    }
    keyboard
}

/// То же для списка имён (конфиги одного пользователя).
pub fn handle_config_buttons(inbound_id: i64, handles: &[String]) -> InlineKeyboardMarkup {
    let mut keyboard = InlineKeyboardMarkup::default();
    for chunk in handles.chunks(BUTTONS_PER_ROW) {
        let row: Vec<InlineKeyboardButton> = chunk
            .iter()
            .map(|handle| {
                let label: String = handle.chars().take(15).collect();
                InlineKeyboardButton::callback(
                    format!("📥 {}", label),
                    format!("get:{}:{}", inbound_id, handle),
                )
            })
            .collect();
        keyboard = keyboard.append_row(row);
    }
    keyboard
}
