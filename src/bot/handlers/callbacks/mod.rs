use super::format::render_client_block;
use super::shared::{
    callback_message_target, callback_prefix_filter, create_config_for_inbound, parse_callback_get,
    parse_callback_id, send_existing_config, user_facing_xui_error, HandlerResult,
};
use super::state::BotState;
use teloxide::dptree;
use teloxide::prelude::*;

pub fn handler() -> teloxide::dispatching::UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>>
{
    Update::filter_callback_query()
        .branch(dptree::filter_map(callback_prefix_filter("create:")).endpoint(callback_create))
        .branch(dptree::filter_map(callback_prefix_filter("clients:")).endpoint(callback_clients))
        .branch(dptree::filter_map(callback_prefix_filter("get:")).endpoint(callback_get))
}

/// Доступ и личность нажавшего; при отказе сам отвечает alert'ом.
async fn require_access(
    bot: &Bot,
    q: &CallbackQuery,
    state: &BotState,
) -> Result<Option<(i64, Option<String>)>, Box<dyn std::error::Error + Send + Sync>> {
    let user_id = q.from.id.0 as i64;
    let username = q.from.username.clone();
    if !state.config.is_allowed(username.as_deref()) {
        bot.answer_callback_query(q.id.clone())
            .text("У вас нет доступа к этому боту")
            .show_alert(true)
            .await?;
        return Ok(None);
    }
    Ok(Some((user_id, username)))
}

async fn callback_create(bot: Bot, q: CallbackQuery, state: BotState) -> HandlerResult {
    let Some((user_id, username)) = require_access(&bot, &q, &state).await? else {
        return Ok(());
    };
    let Some(username) = username else {
        bot.answer_callback_query(q.id.clone())
            .text("Задайте username в настройках Telegram")
            .show_alert(true)
            .await?;
        return Ok(());
    };

    let data = q.data.as_deref().unwrap_or("");
    let inbound_id = parse_callback_id(data, "create:")?;
    tracing::info!(user_id, inbound_id, "Создание конфига по кнопке");
    bot.answer_callback_query(q.id.clone()).await?;

    if let Some((chat_id, _)) = callback_message_target(&q) {
        create_config_for_inbound(&bot, chat_id, &state, user_id, &username, inbound_id).await?;
    }
    Ok(())
}

async fn callback_clients(bot: Bot, q: CallbackQuery, state: BotState) -> HandlerResult {
    if require_access(&bot, &q, &state).await?.is_none() {
        return Ok(());
    }

    let data = q.data.as_deref().unwrap_or("");
    let inbound_id = parse_callback_id(data, "clients:")?;
    bot.answer_callback_query(q.id.clone()).await?;
    let Some((chat_id, message_id)) = callback_message_target(&q) else {
        return Ok(());
    };

    match state.xui.get_clients(inbound_id).await {
        Ok(clients) if clients.is_empty() => {
            bot.edit_message_text(
                chat_id,
                message_id,
                format!("❌ У сервера {} нет клиентов.", inbound_id),
            )
            .await?;
        }
        Ok(clients) => {
            let mut text = format!("📋 Клиенты сервера {}:\n\n", inbound_id);
            for client in &clients {
                text.push_str(&render_client_block(client));
                text.push('\n');
            }
            bot.edit_message_text(chat_id, message_id, text)
                .reply_markup(crate::bot::keyboards::client_config_buttons(
                    inbound_id, &clients,
                ))
                .await?;
        }
        Err(error) => {
            tracing::error!(inbound_id, error = %error, "Не удалось получить клиентов");
            bot.edit_message_text(
                chat_id,
                message_id,
                format!("❌ {}", user_facing_xui_error(&error)),
            )
            .await?;
        }
    }
    Ok(())
}

async fn callback_get(bot: Bot, q: CallbackQuery, state: BotState) -> HandlerResult {
    let Some((user_id, _)) = require_access(&bot, &q, &state).await? else {
        return Ok(());
    };

    let data = q.data.as_deref().unwrap_or("");
    let (inbound_id, email) = parse_callback_get(data)?;
    tracing::info!(user_id, inbound_id, email = %email, "Выдача конфига по кнопке");
    bot.answer_callback_query(q.id.clone())
        .text("Получаю конфигурацию...")
        .await?;

    if let Some((chat_id, _)) = callback_message_target(&q) {
        send_existing_config(&bot, chat_id, &state, user_id, inbound_id, &email).await?;
    }
    Ok(())
}
