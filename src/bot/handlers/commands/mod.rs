use super::format::{
    admin_help_text, format_expiry_ms, help_text, myinfo_text, render_client_block,
    render_inbound_block, render_user_line, welcome_text,
};
use super::shared::{
    create_config_for_inbound, ensure_allowed, send_existing_config, user_facing_xui_error,
    HandlerResult,
};
use super::state::{is_admin_message, sender_display_name, sender_user_id, sender_username, BotState};
use teloxide::dptree;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
pub enum BotCommand {
    #[command(description = "Начало работы")]
    Start,
    #[command(description = "Справка")]
    Help,
    #[command(description = "Мой аккаунт")]
    Myinfo,
    #[command(description = "Список серверов")]
    List,
    #[command(description = "Клиенты сервера")]
    Clients,
    #[command(description = "Получить конфиг по имени")]
    Get,
    #[command(description = "Создать конфиг")]
    Create,
    #[command(description = "Справка администратора")]
    Adminhelp,
    #[command(description = "Назначить лимит пользователю (админ)")]
    Adduser,
    #[command(description = "Изменить лимит (админ)")]
    Setlimit,
    #[command(description = "Список пользователей (админ)")]
    Users,
    #[command(description = "Продлить конфиг (админ)")]
    Extend,
    #[command(description = "Синхронизировать напоминания (админ)")]
    Syncreminders,
}

pub fn handler() -> teloxide::dispatching::UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>>
{
    teloxide::filter_command::<BotCommand, _>()
        .branch(dptree::case![BotCommand::Start].endpoint(start_cmd))
        .branch(dptree::case![BotCommand::Help].endpoint(cmd_help))
        .branch(dptree::case![BotCommand::Myinfo].endpoint(cmd_myinfo))
        .branch(dptree::case![BotCommand::List].endpoint(cmd_list))
        .branch(dptree::case![BotCommand::Clients].endpoint(cmd_clients))
        .branch(dptree::case![BotCommand::Get].endpoint(cmd_get))
        .branch(dptree::case![BotCommand::Create].endpoint(cmd_create))
        .branch(dptree::case![BotCommand::Adminhelp].endpoint(cmd_adminhelp))
        .branch(dptree::case![BotCommand::Adduser].endpoint(cmd_adduser))
        .branch(dptree::case![BotCommand::Setlimit].endpoint(cmd_setlimit))
        .branch(dptree::case![BotCommand::Users].endpoint(cmd_users))
        .branch(dptree::case![BotCommand::Extend].endpoint(cmd_extend))
        .branch(dptree::case![BotCommand::Syncreminders].endpoint(cmd_syncreminders))
}

fn command_arg(msg: &Message, index: usize) -> Option<String> {
    msg.text()?
        .split_whitespace()
        .nth(index)
        .map(str::to_string)
}

async fn start_cmd(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    let Some(user_id) = sender_user_id(&msg) else {
        return Ok(());
    };
    let username = sender_username(&msg);
    let display_name = sender_display_name(&msg);
    tracing::info!(user_id, username = ?username, "Получен /start");

    // регистрируем при первом обращении, лимит по умолчанию из конфига
    state
        .db
        .upsert_user(
            user_id,
            username.as_deref(),
            display_name.as_deref(),
            state.config.limits.default_config_limit,
        )
        .await?;

    if !ensure_allowed(&bot, msg.chat.id, &state, username.as_deref()).await? {
        return Ok(());
    }

    let mut text = welcome_text().to_string();
    if state.config.is_admin(username.as_deref()) {
        text.push_str("\n\n🔧 Вы администратор: /adminhelp.");
    }
    bot.send_message(msg.chat.id, text)
        .reply_markup(crate::bot::keyboards::user_menu())
        .await?;
    Ok(())
}

pub async fn cmd_help(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    if !ensure_allowed(&bot, msg.chat.id, &state, sender_username(&msg).as_deref()).await? {
        return Ok(());
    }
    bot.send_message(msg.chat.id, help_text())
        .reply_markup(crate::bot::keyboards::user_menu())
        .await?;
    Ok(())
}

pub async fn cmd_myinfo(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    let Some(user_id) = sender_user_id(&msg) else {
        return Ok(());
    };
    if !ensure_allowed(&bot, msg.chat.id, &state, sender_username(&msg).as_deref()).await? {
        return Ok(());
    }

    match state.db.get_user(user_id).await? {
        Some(user) => {
            bot.send_message(msg.chat.id, myinfo_text(&user)).await?;
        }
        None => {
            bot.send_message(msg.chat.id, "❌ Вы не зарегистрированы. Отправьте /start.")
                .await?;
        }
    }
    Ok(())
}

async fn cmd_list(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    if !ensure_allowed(&bot, msg.chat.id, &state, sender_username(&msg).as_deref()).await? {
        return Ok(());
    }

    let loading = bot
        .send_message(msg.chat.id, "⏳ Получаю список серверов...")
        .await?;
    match state.xui.list_inbounds().await {
        Ok(inbounds) if inbounds.is_empty() => {
            bot.edit_message_text(msg.chat.id, loading.id, "❌ Список серверов пуст.")
                .await?;
        }
        Ok(inbounds) => {
            let mut text = String::from("📋 Доступные серверы:\n\n");
            for inbound in &inbounds {
                text.push_str(&render_inbound_block(inbound));
                text.push('\n');
            }
            text.push_str("Нажмите на сервер, чтобы посмотреть его клиентов.");
            bot.edit_message_text(msg.chat.id, loading.id, text)
                .reply_markup(crate::bot::keyboards::inbound_buttons(
                    &inbounds, "clients", "📋",
                ))
                .await?;
        }
        Err(error) => {
            tracing::error!(error = %error, "Не удалось получить список inbound'ов");
            bot.edit_message_text(
                msg.chat.id,
                loading.id,
                format!("❌ {}", user_facing_xui_error(&error)),
            )
            .await?;
        }
    }
    Ok(())
}

async fn cmd_clients(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    if !ensure_allowed(&bot, msg.chat.id, &state, sender_username(&msg).as_deref()).await? {
        return Ok(());
    }

    let Some(inbound_id) = command_arg(&msg, 1).and_then(|arg| arg.parse::<i64>().ok()) else {
        bot.send_message(msg.chat.id, "❌ Укажите ID сервера.\nПример: /clients 1")
            .await?;
        return Ok(());
    };

    match state.xui.get_clients(inbound_id).await {
        Ok(clients) if clients.is_empty() => {
            bot.send_message(
                msg.chat.id,
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
            bot.send_message(msg.chat.id, text)
                .reply_markup(crate::bot::keyboards::client_config_buttons(
                    inbound_id, &clients,
                ))
                .await?;
        }
        Err(error) => {
            tracing::error!(inbound_id, error = %error, "Не удалось получить клиентов");
            bot.send_message(msg.chat.id, format!("❌ {}", user_facing_xui_error(&error)))
                .await?;
        }
    }
    Ok(())
}

async fn cmd_get(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    let Some(user_id) = sender_user_id(&msg) else {
        return Ok(());
    };
    if !ensure_allowed(&bot, msg.chat.id, &state, sender_username(&msg).as_deref()).await? {
        return Ok(());
    }

    let Some(email) = command_arg(&msg, 1) else {
        bot.send_message(msg.chat.id, "❌ Укажите имя конфига.\nПример: /get alice_1")
            .await?;
        return Ok(());
    };

    bot.send_message(msg.chat.id, format!("⏳ Ищу конфиг {}...", email))
        .await?;
    match state.xui.find_client(&email).await {
        Ok(Some((inbound, _))) => {
            send_existing_config(&bot, msg.chat.id, &state, user_id, inbound.id, &email).await?;
        }
        Ok(None) => {
            bot.send_message(msg.chat.id, format!("❌ Конфиг {} не найден.", email))
                .await?;
        }
        Err(error) => {
            tracing::error!(email = %email, error = %error, "Поиск конфига не удался");
            bot.send_message(msg.chat.id, format!("❌ {}", user_facing_xui_error(&error)))
                .await?;
        }
    }
    Ok(())
}

async fn cmd_create(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    let Some(user_id) = sender_user_id(&msg) else {
        return Ok(());
    };
    let username = sender_username(&msg);
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

    if let Some(arg) = command_arg(&msg, 1) {
        let Ok(inbound_id) = arg.parse::<i64>() else {
            bot.send_message(msg.chat.id, "❌ ID сервера должен быть числом.")
                .await?;
            return Ok(());
        };
        return create_config_for_inbound(&bot, msg.chat.id, &state, user_id, &username, inbound_id)
            .await;
    }

    // без аргумента — даём выбрать сервер кнопками
    let loading = bot
        .send_message(msg.chat.id, "⏳ Получаю список серверов...")
        .await?;
    match state.xui.list_inbounds().await {
        Ok(inbounds) if inbounds.is_empty() => {
            bot.edit_message_text(
                msg.chat.id,
                loading.id,
                "❌ Список серверов пуст, создать конфиг не из чего.",
            )
            .await?;
        }
        Ok(inbounds) => {
            let mut text = String::from("📋 Выберите сервер для нового конфига:\n\n");
            for inbound in &inbounds {
                text.push_str(&render_inbound_block(inbound));
                text.push('\n');
            }
            bot.edit_message_text(msg.chat.id, loading.id, text)
                .reply_markup(crate::bot::keyboards::inbound_buttons(
                    &inbounds, "create", "✨",
                ))
                .await?;
        }
        Err(error) => {
            tracing::error!(error = %error, "Не удалось получить список inbound'ов");
            bot.edit_message_text(
                msg.chat.id,
                loading.id,
                format!("❌ {}", user_facing_xui_error(&error)),
            )
            .await?;
        }
    }
    Ok(())
}

async fn cmd_adminhelp(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    if !is_admin_message(&msg, &state) {
        bot.send_message(msg.chat.id, "❌ У вас нет прав администратора.")
            .await?;
        return Ok(());
    }
    bot.send_message(msg.chat.id, admin_help_text()).await?;
    Ok(())
}

async fn set_limit_for_username(
    bot: &Bot,
    msg: &Message,
    state: &BotState,
    username: &str,
    limit: i64,
    notify_user: bool,
) -> HandlerResult {
    let Some(user) = state.db.get_user_by_username(username).await? else {
        bot.send_message(
            msg.chat.id,
            format!(
                "⚠️ Пользователь @{} не найден в базе.\n\
                 Попросите его отправить боту /start, затем повторите.",
                username.trim_start_matches('@')
            ),
        )
        .await?;
        return Ok(());
    };

    state.db.set_config_limit(user.user_id, limit).await?;
    bot.send_message(
        msg.chat.id,
        format!(
            "✅ Лимит для @{} установлен: {}",
            username.trim_start_matches('@'),
            limit
        ),
    )
    .await?;

    if notify_user {
        // пользователь мог заблокировать бота — это не ошибка
        if let Err(error) = bot
            .send_message(
                ChatId(user.user_id),
                format!("📢 Ваш лимит конфигов изменён: {}.", limit),
            )
            .await
        {
            tracing::warn!(user_id = user.user_id, error = %error, "Не доставлено уведомление о лимите");
        }
    }
    Ok(())
}

async fn cmd_adduser(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    if !is_admin_message(&msg, &state) {
        bot.send_message(msg.chat.id, "❌ У вас нет прав администратора.")
            .await?;
        return Ok(());
    }

    let (username, limit) = match (
        command_arg(&msg, 1),
        command_arg(&msg, 2).and_then(|v| v.parse::<i64>().ok()),
    ) {
        (Some(username), Some(limit)) if limit >= 0 => (username, limit),
        _ => {
            bot.send_message(
                msg.chat.id,
                "❌ Использование: /adduser <@username> <limit>\nПример: /adduser @alice 5",
            )
            .await?;
            return Ok(());
        }
    };
    tracing::info!(username = %username, limit, "Админ назначает лимит");
    set_limit_for_username(&bot, &msg, &state, &username, limit, false).await
}

async fn cmd_setlimit(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    if !is_admin_message(&msg, &state) {
        bot.send_message(msg.chat.id, "❌ У вас нет прав администратора.")
            .await?;
        return Ok(());
    }

    let (username, limit) = match (
        command_arg(&msg, 1),
        command_arg(&msg, 2).and_then(|v| v.parse::<i64>().ok()),
    ) {
        (Some(username), Some(limit)) if limit >= 0 => (username, limit),
        _ => {
            bot.send_message(
                msg.chat.id,
                "❌ Использование: /setlimit <@username> <limit>\nПример: /setlimit @alice 10",
            )
            .await?;
            return Ok(());
        }
    };
    tracing::info!(username = %username, limit, "Админ меняет лимит");
    set_limit_for_username(&bot, &msg, &state, &username, limit, true).await
}

async fn cmd_users(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    if !is_admin_message(&msg, &state) {
        bot.send_message(msg.chat.id, "❌ У вас нет прав администратора.")
            .await?;
        return Ok(());
    }

    let users = state.db.list_users().await?;
    if users.is_empty() {
        bot.send_message(msg.chat.id, "📭 В базе нет пользователей.")
            .await?;
        return Ok(());
    }

    let mut text = String::from("📋 Пользователи:\n\n");
    for user in &users {
        text.push_str(&render_user_line(user));
        text.push('\n');
    }
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn cmd_extend(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    if !is_admin_message(&msg, &state) {
        bot.send_message(msg.chat.id, "❌ У вас нет прав администратора.")
            .await?;
        return Ok(());
    }

    let (email, days) = match (
        command_arg(&msg, 1),
        command_arg(&msg, 2).and_then(|v| v.parse::<i64>().ok()),
    ) {
        (Some(email), Some(days)) if days >= 1 => (email, days),
        _ => {
            bot.send_message(
                msg.chat.id,
                "❌ Использование: /extend <имя> <дней>\nПример: /extend alice_1 31",
            )
            .await?;
            return Ok(());
        }
    };
    tracing::info!(email = %email, days, "Админ продлевает конфиг");

    let target = match state.xui.find_client(&email).await {
        Ok(Some((inbound, _))) => inbound,
        Ok(None) => {
            bot.send_message(msg.chat.id, format!("❌ Конфиг {} не найден.", email))
                .await?;
            return Ok(());
        }
        Err(error) => {
            bot.send_message(msg.chat.id, format!("❌ {}", user_facing_xui_error(&error)))
                .await?;
            return Ok(());
        }
    };

    match state.xui.extend_expiry(target.id, &email, days).await {
        Ok(true) => {
            // перечитываем фактический срок и обновляем напоминание владельцу
            let new_expiry = state
                .xui
                .get_inbound(target.id)
                .await?
                .and_then(|inbound| inbound.find_client(&email).map(|c| c.expiry_time))
                .unwrap_or(0);
            if new_expiry > 0
                && let Some(owner) = state.db.find_issuer(&email, target.id).await?
            {
                state
                    .db
                    .upsert_reminder(owner, &email, target.id, new_expiry)
                    .await?;
            }
            let until = if new_expiry > 0 {
                format!(" до {}", format_expiry_ms(new_expiry))
            } else {
                String::new()
            };
            bot.send_message(
                msg.chat.id,
                format!("✅ Конфиг {} продлён на {} дн.{}", email, days, until),
            )
            .await?;
        }
        Ok(false) => {
            bot.send_message(
                msg.chat.id,
                format!("❌ Панель не приняла продление конфига {}.", email),
            )
            .await?;
        }
        Err(error) => {
            tracing::error!(email = %email, error = %error, "Продление не удалось");
            bot.send_message(msg.chat.id, format!("❌ {}", user_facing_xui_error(&error)))
                .await?;
        }
    }
    Ok(())
}

async fn cmd_syncreminders(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    if !is_admin_message(&msg, &state) {
        bot.send_message(msg.chat.id, "❌ У вас нет прав администратора.")
            .await?;
        return Ok(());
    }

    bot.send_message(msg.chat.id, "⏳ Синхронизирую напоминания из панели...")
        .await?;

    let inbounds = match state.xui.list_inbounds().await {
        Ok(inbounds) => inbounds,
        Err(error) => {
            bot.send_message(msg.chat.id, format!("❌ {}", user_facing_xui_error(&error)))
                .await?;
            return Ok(());
        }
    };

    let users = state.db.list_users().await?;
    let mut synced = 0usize;
    for user in &users {
        for inbound in &inbounds {
            for client in &inbound.clients {
                if client.expiry_time <= 0 {
                    continue;
                }
                if state
                    .db
                    .has_issued(user.user_id, &client.email, inbound.id)
                    .await?
                {
                    state
                        .db
                        .upsert_reminder(user.user_id, &client.email, inbound.id, client.expiry_time)
                        .await?;
                    synced += 1;
                }
            }
        }
    }

    tracing::info!(synced, users = users.len(), "Напоминания пересобраны");
    bot.send_message(
        msg.chat.id,
        format!("✅ Синхронизация завершена. Обновлено напоминаний: {}", synced),
    )
    .await?;
    Ok(())
}
