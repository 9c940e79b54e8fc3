use super::state::BotState;
use crate::db::QuotaCheck;
use crate::xui::XuiError;
use anyhow::anyhow;
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::QrCode;
use std::io::Cursor;
use teloxide::prelude::*;
use teloxide::types::InputFile;

pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Срок действия нового конфига от текущего момента, в миллисекундах эпохи.
pub fn expiry_after_days(days: i64) -> i64 {
    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64;
    now_ms + days * DAY_MS
}

/// Проверка allowlist'а; при отказе сам отвечает пользователю.
pub async fn ensure_allowed(
    bot: &Bot,
    chat_id: ChatId,
    state: &BotState,
    username: Option<&str>,
) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    if state.config.is_allowed(username) {
        return Ok(true);
    }
    bot.send_message(
        chat_id,
        "❌ У вас нет доступа к этому боту.\n\
         💡 Проверьте, что в настройках Telegram задан username.",
    )
    .await?;
    Ok(false)
}

pub fn quota_denied_message(check: &QuotaCheck) -> Option<String> {
    match check {
        QuotaCheck::UnknownUser => {
            Some("Вы не зарегистрированы. Отправьте /start.".to_string())
        }
        QuotaCheck::NoLimit => {
            Some("Лимит конфигов не назначен. Обратитесь к администратору.".to_string())
        }
        QuotaCheck::Exhausted { limit, used } => Some(format!(
            "Вы достигли лимита конфигов. Использовано: {}/{}.",
            used, limit
        )),
        QuotaCheck::Allowed { .. } => None,
    }
}

/// Пользователю — короткое человеческое сообщение; подробности (какие адреса
/// перебирались, какое имя не прошло) остаются в логах.
pub fn user_facing_xui_error(error: &XuiError) -> String {
    match error {
        XuiError::Auth(_) => {
            "Не удалось подключиться к панели. Сообщите администратору.".to_string()
        }
        XuiError::ProvisioningExhausted { .. } => {
            "Не удалось создать конфиг: все попытки заняты. Попробуйте чуть позже.".to_string()
        }
        XuiError::InboundNotFound(id) => format!("Сервер {} не найден.", id),
        _ => "Сервис временно недоступен. Попробуйте позже.".to_string(),
    }
}

pub fn build_link_qr_png(payload: &str) -> Result<Vec<u8>, anyhow::Error> {
    let qr = QrCode::new(payload.as_bytes())?;
    let image = qr
        .render::<Luma<u8>>()
        .quiet_zone(true)
        .min_dimensions(512, 512)
        .build();
    let mut bytes = Vec::new();
    {
        let mut cursor = Cursor::new(&mut bytes);
        DynamicImage::ImageLuma8(image).write_to(&mut cursor, ImageFormat::Png)?;
    }
    Ok(bytes)
}

/// Отправляет ссылку подключения и QR. Ссылка уходит отдельным сообщением
/// без разметки — в ней спецсимволы.
pub async fn send_config(bot: &Bot, chat_id: ChatId, email: &str, link: &str) -> HandlerResult {
    bot.send_message(chat_id, format!("✅ Конфигурация для {}:", email))
        .await?;
    bot.send_message(chat_id, link.to_string()).await?;

    match build_link_qr_png(link) {
        Ok(png) => {
            bot.send_photo(
                chat_id,
                InputFile::memory(png).file_name(format!("vpn-{}.png", email)),
            )
            .caption(format!("QR для импорта конфига {}", email))
            .await?;
        }
        Err(error) => {
            tracing::warn!(email, error = %error, "Не удалось построить QR для ссылки");
        }
    }
    Ok(())
}

pub async fn send_quota_status(
    bot: &Bot,
    chat_id: ChatId,
    state: &BotState,
    user_id: i64,
) -> HandlerResult {
    if let Some(user) = state.db.get_user(user_id).await? {
        let remaining = (user.config_limit - user.configs_created).max(0);
        bot.send_message(
            chat_id,
            format!("📊 Осталось конфигов: {}/{}", remaining, user.config_limit),
        )
        .await?;
    }
    Ok(())
}

/// Общий путь создания конфига для команды, кнопки меню и inline-callback'а.
pub async fn create_config_for_inbound(
    bot: &Bot,
    chat_id: ChatId,
    state: &BotState,
    user_id: i64,
    base_username: &str,
    inbound_id: i64,
) -> HandlerResult {
    let check = state.db.quota_check(user_id).await?;
    if let Some(denied) = quota_denied_message(&check) {
        bot.send_message(chat_id, format!("❌ {}", denied)).await?;
        return Ok(());
    }

    let status = bot.send_message(chat_id, "⏳ Создаю конфиг...").await?;
    let expiry_time = expiry_after_days(state.config.limits.config_expiry_days);

    match state
        .xui
        .create_client(inbound_id, base_username, expiry_time)
        .await
    {
        Ok((handle, link)) => {
            state
                .db
                .record_issued_config(user_id, &handle, inbound_id)
                .await?;
            state
                .db
                .upsert_reminder(user_id, &handle, inbound_id, expiry_time)
                .await?;

            bot.edit_message_text(
                chat_id,
                status.id,
                format!(
                    "✅ Клиент создан!\n\n📧 Имя: {}\n🆔 Сервер: {}",
                    handle, inbound_id
                ),
            )
            .await?;
            send_config(bot, chat_id, &handle, &link).await?;
            send_quota_status(bot, chat_id, state, user_id).await?;
        }
        Err(error) => {
            tracing::error!(
                user_id,
                inbound_id,
                error = %error,
                "Создание клиента не удалось"
            );
            bot.edit_message_text(
                chat_id,
                status.id,
                format!("❌ {}", user_facing_xui_error(&error)),
            )
            .await?;
        }
    }
    Ok(())
}

/// Выдаёт уже существующий конфиг по имени: проверяет лимит, журналирует
/// выдачу и обновляет напоминание по сроку из панели.
pub async fn send_existing_config(
    bot: &Bot,
    chat_id: ChatId,
    state: &BotState,
    user_id: i64,
    inbound_id: i64,
    email: &str,
) -> HandlerResult {
    let check = state.db.quota_check(user_id).await?;
    if let Some(denied) = quota_denied_message(&check) {
        bot.send_message(chat_id, format!("❌ {}", denied)).await?;
        return Ok(());
    }

    let link = match state.xui.client_link(inbound_id, email).await {
        Ok(Some(link)) => link,
        Ok(None) => {
            bot.send_message(
                chat_id,
                format!(
                    "❌ Конфиг {} не найден.\n💡 Создайте новый кнопкой «{}».",
                    email,
                    crate::bot::keyboards::BTN_CREATE
                ),
            )
            .await?;
            return Ok(());
        }
        Err(error) => {
            tracing::error!(inbound_id, email, error = %error, "Не удалось получить конфиг");
            bot.send_message(chat_id, format!("❌ {}", user_facing_xui_error(&error)))
                .await?;
            return Ok(());
        }
    };

    state
        .db
        .record_issued_config(user_id, email, inbound_id)
        .await?;

    // срок действия для напоминания читаем отдельным запросом
    let expiry_time = state
        .xui
        .get_clients(inbound_id)
        .await
        .ok()
        .and_then(|clients| clients.into_iter().find(|c| c.email == email))
        .map(|client| client.expiry_time)
        .unwrap_or(0);
    if expiry_time > 0 {
        state
            .db
            .upsert_reminder(user_id, email, inbound_id, expiry_time)
            .await?;
    }

    send_config(bot, chat_id, email, &link).await?;
    send_quota_status(bot, chat_id, state, user_id).await?;
    Ok(())
}

pub fn callback_prefix_filter(
    prefix: &'static str,
) -> impl Fn(CallbackQuery) -> Option<CallbackQuery> {
    move |q: CallbackQuery| {
        if q.data
            .as_deref()
            .is_some_and(|payload| payload.starts_with(prefix))
        {
            Some(q)
        } else {
            None
        }
    }
}

pub fn parse_callback_id(data: &str, prefix: &str) -> Result<i64, anyhow::Error> {
    data.strip_prefix(prefix)
        .ok_or_else(|| anyhow!("Некорректный callback payload"))?
        .parse::<i64>()
        .map_err(|_| anyhow!("Некорректный id в callback"))
}

/// Разбирает `get:{inbound_id}:{email}`.
pub fn parse_callback_get(data: &str) -> Result<(i64, String), anyhow::Error> {
    let payload = data
        .strip_prefix("get:")
        .ok_or_else(|| anyhow!("Некорректный callback payload"))?;
    let (inbound_id, email) = payload
        .split_once(':')
        .ok_or_else(|| anyhow!("Не указано имя клиента"))?;
    let inbound_id = inbound_id
        .parse::<i64>()
        .map_err(|_| anyhow!("Некорректный id в callback"))?;
    if email.is_empty() {
        return Err(anyhow!("Не указано имя клиента"));
    }
    Ok((inbound_id, email.to_string()))
}

pub fn callback_message_target(q: &CallbackQuery) -> Option<(ChatId, teloxide::types::MessageId)> {
    q.message.as_ref().map(|msg| (msg.chat().id, msg.id()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_get_callback() {
        let (inbound_id, email) = parse_callback_get("get:7:alice_1").unwrap();
        assert_eq!(inbound_id, 7);
        assert_eq!(email, "alice_1");
        assert!(parse_callback_get("get:x:alice").is_err());
        assert!(parse_callback_get("get:7").is_err());
        assert!(parse_callback_get("other:7:alice").is_err());
    }

    #[test]
    fn quota_messages() {
        assert!(quota_denied_message(&QuotaCheck::Allowed { limit: 3, used: 1 }).is_none());
        assert!(quota_denied_message(&QuotaCheck::UnknownUser).is_some());
        let text = quota_denied_message(&QuotaCheck::Exhausted { limit: 2, used: 2 }).unwrap();
        assert!(text.contains("2/2"));
    }
}
