use super::commands::cmd_help;
use super::format::render_client_block;
use super::shared::{create_config_for_inbound, ensure_allowed, HandlerResult};
use super::state::{sender_user_id, sender_username, BotState};
use crate::xui::alloc;
use teloxide::prelude::*;

pub async fn handle_menu_buttons(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let Some(user_id) = sender_user_id(&msg) else {
        return Ok(());
    };
    let username = sender_username(&msg);

    match text {
        crate::bot::keyboards::BTN_CREATE => {
            if !ensure_allowed(&bot, msg.chat.id, &state, username.as_deref()).await? {
                return Ok(());
            }
            let Some(username) = username else {
                bot.send_message(
                    msg.chat.id,
                    "❌ У вас не задан username в Telegram — он нужен как имя конфига.",
                )
                .await?;
                return Ok(());
            };
            create_config_for_inbound(
                &bot,
                msg.chat.id,
                &state,
                user_id,
                &username,
                state.config.xui.default_inbound_id,
            )
            .await?;
        }
        crate::bot::keyboards::BTN_DOWNLOAD => {
            if !ensure_allowed(&bot, msg.chat.id, &state, username.as_deref()).await? {
                return Ok(());
            }
            let Some(username) = username else {
                bot.send_message(msg.chat.id, "❌ У вас не задан username в Telegram.")
                    .await?;
                return Ok(());
            };
            show_own_configs(&bot, &msg, &state, &username).await?;
        }
        crate::bot::keyboards::BTN_INFO => {
            if !ensure_allowed(&bot, msg.chat.id, &state, username.as_deref()).await? {
                return Ok(());
            }
            let Some(username) = username else {
                bot.send_message(msg.chat.id, "❌ У вас не задан username в Telegram.")
                    .await?;
                return Ok(());
            };
            show_own_config_info(&bot, &msg, &state, &username).await?;
        }
        crate::bot::keyboards::BTN_HELP => {
            cmd_help(bot, msg, state).await?;
        }
        _ => {
            if !ensure_allowed(&bot, msg.chat.id, &state, username.as_deref()).await? {
                return Ok(());
            }
            bot.send_message(msg.chat.id, "Не понял запрос. Используйте кнопки меню ниже.")
                .reply_markup(crate::bot::keyboards::user_menu())
                .await?;
        }
    }
    Ok(())
}

/// Кнопки со всеми конфигами пользователя на сервере по умолчанию.
async fn show_own_configs(
    bot: &Bot,
    msg: &Message,
    state: &BotState,
    username: &str,
) -> HandlerResult {
    let inbound_id = state.config.xui.default_inbound_id;
    let handles = match state.xui.user_handles(inbound_id, username).await {
        Ok(handles) => handles,
        Err(error) => {
            tracing::error!(username, error = %error, "Не удалось получить конфиги пользователя");
            bot.send_message(msg.chat.id, "❌ Сервис временно недоступен. Попробуйте позже.")
                .await?;
            return Ok(());
        }
    };

    if handles.is_empty() {
        bot.send_message(
            msg.chat.id,
            format!(
                "❌ У вас пока нет конфигов.\n💡 Создайте первый кнопкой «{}».",
                crate::bot::keyboards::BTN_CREATE
            ),
        )
        .await?;
        return Ok(());
    }

    bot.send_message(
        msg.chat.id,
        format!("📥 Ваши конфиги ({}). Выберите, какой прислать:", handles.len()),
    )
    .reply_markup(crate::bot::keyboards::handle_config_buttons(
        inbound_id, &handles,
    ))
    .await?;
    Ok(())
}

/// Трафик и сроки по всем конфигам пользователя.
async fn show_own_config_info(
    bot: &Bot,
    msg: &Message,
    state: &BotState,
    username: &str,
) -> HandlerResult {
    let inbound_id = state.config.xui.default_inbound_id;
    let clients = match state.xui.get_clients(inbound_id).await {
        Ok(clients) => clients,
        Err(error) => {
            tracing::error!(username, error = %error, "Не удалось получить информацию о конфигах");
            bot.send_message(msg.chat.id, "❌ Сервис временно недоступен. Попробуйте позже.")
                .await?;
            return Ok(());
        }
    };

    let own: Vec<_> = {
        let handles = alloc::user_handles(username, &clients);
        clients
            .into_iter()
            .filter(|client| handles.contains(&client.email))
            .collect()
    };

    if own.is_empty() {
        bot.send_message(
            msg.chat.id,
            format!(
                "❌ У вас пока нет конфигов.\n💡 Создайте первый кнопкой «{}».",
                crate::bot::keyboards::BTN_CREATE
            ),
        )
        .await?;
        return Ok(());
    }

    let mut text = String::from("📊 Ваши конфиги:\n\n");
    for client in &own {
        text.push_str(&render_client_block(client));
        text.push('\n');
    }
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}
