use chrono::{DateTime, Local, Utc};

use crate::db::User;
use crate::xui::model::{Client, Inbound};

const GIB: f64 = (1024u64 * 1024 * 1024) as f64;

/// Метка времени из миллисекунд эпохи.
pub fn format_expiry_ms(expire_time: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(expire_time)
        .map(|dt| dt.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| format!("Некорректный timestamp: {}", expire_time))
}

/// Дата из секунд эпохи.
pub fn format_date(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.with_timezone(&Local).format("%d.%m.%Y").to_string())
        .unwrap_or_else(|| "—".to_string())
}

pub fn format_gib(bytes: i64) -> String {
    format!("{:.2} GB", bytes as f64 / GIB)
}

pub fn days_until_ms(expire_time: i64, now_ms: i64) -> i64 {
    (expire_time - now_ms) / (24 * 60 * 60 * 1000)
}

pub fn render_inbound_block(inbound: &Inbound) -> String {
    format!(
        "🆔 ID: {}\n📝 Название: {}\n🔌 Протокол: {}\n🚪 Порт: {}\n📊 Трафик: {}\n{}\n",
        inbound.id,
        if inbound.remark.is_empty() {
            "—".to_string()
        } else {
            inbound.remark.clone()
        },
        inbound.protocol.as_str().to_uppercase(),
        inbound.port,
        format_gib(inbound.up + inbound.down),
        "─".repeat(20),
    )
}

pub fn render_client_block(client: &Client) -> String {
    let mut text = format!(
        "📧 Имя: {}\n📊 Трафик: {}\n",
        client.email,
        format_gib(client.up + client.down),
    );
    if client.expiry_time > 0 {
        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        text.push_str(&format!(
            "⏰ Истекает: {} (через {} дн.)\n",
            format_expiry_ms(client.expiry_time),
            days_until_ms(client.expiry_time, now_ms).max(0),
        ));
    } else {
        text.push_str("⏰ Без ограничения срока\n");
    }
    text.push_str(&"─".repeat(20));
    text.push('\n');
    text
}

pub fn render_user_line(user: &User) -> String {
    let admin_mark = if user.is_admin { "🔧 " } else { "" };
    format!(
        "{}@{} ({})\n   ID: {}\n   Лимит: {} | Использовано: {}\n   Зарегистрирован: {}\n{}\n",
        admin_mark,
        user.username.as_deref().unwrap_or("—"),
        user.full_name.as_deref().unwrap_or("—"),
        user.user_id,
        user.config_limit,
        user.configs_created,
        format_date(user.created_at),
        "─".repeat(30),
    )
}

pub fn myinfo_text(user: &User) -> String {
    let remaining = (user.config_limit - user.configs_created).max(0);
    format!(
        "📊 Ваш аккаунт:\n\n\
         🆔 ID: {}\n\
         👤 Имя: {}\n\
         📝 Username: @{}\n\n\
         📦 Лимит конфигов: {}\n\
         ✅ Использовано: {}\n\
         ⏳ Осталось: {}\n\n\
         💡 За увеличением лимита обратитесь к администратору.",
        user.user_id,
        user.full_name.as_deref().unwrap_or("—"),
        user.username.as_deref().unwrap_or("—"),
        user.config_limit,
        user.configs_created,
        remaining,
    )
}

pub fn welcome_text() -> &'static str {
    "🤖 Привет! Я бот для выдачи VPN-конфигураций.\n\n\
     Кнопки ниже:\n\
     • создать новый конфиг\n\
     • получить уже выданные\n\
     • посмотреть трафик и срок действия\n\n\
     Полный список команд — /help."
}

pub fn help_text() -> &'static str {
    "📖 Команды:\n\n\
     /create [inbound_id] — создать новый конфиг\n\
     /list — список серверов с их ID\n\
     /clients <inbound_id> — клиенты сервера\n\
     /get <имя> — получить конфиг по имени\n\
     /myinfo — ваш лимит и счётчик\n\n\
     💡 Конфиг приходит ссылкой для импорта в VPN-клиент и QR-кодом."
}

pub fn admin_help_text() -> &'static str {
    "🔧 Команды администратора:\n\n\
     /adduser <@username> <limit> — назначить лимит пользователю\n\
     /setlimit <@username> <limit> — изменить лимит\n\
     /users — список пользователей\n\
     /extend <имя> <дней> — продлить срок конфига\n\
     /syncreminders — пересобрать напоминания из панели\n\n\
     💡 Username можно указывать с @ или без."
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gib_conversion() {
        assert_eq!(format_gib(0), "0.00 GB");
        assert_eq!(format_gib(1024 * 1024 * 1024), "1.00 GB");
        assert_eq!(format_gib(3 * 1024 * 1024 * 1024 / 2), "1.50 GB");
    }

    #[test]
    fn days_until() {
        let day = 24 * 60 * 60 * 1000;
        assert_eq!(days_until_ms(10 * day, 0), 10);
        assert_eq!(days_until_ms(day / 2, 0), 0);
    }
}
