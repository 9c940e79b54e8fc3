//! Периодические напоминания об истечении конфигов.

use std::sync::Arc;
use std::time::Duration;

use teloxide::prelude::*;

use crate::bot::handlers::format_expiry_ms;
use crate::config::Config;
use crate::db::Db;

pub fn spawn(bot: Bot, config: Arc<Config>, db: Arc<Db>) {
    tokio::spawn(run(bot, config, db));
}

async fn run(bot: Bot, config: Arc<Config>, db: Arc<Db>) {
    let period = Duration::from_secs(config.reminders.check_interval_secs.max(60));
    let mut interval = tokio::time::interval(period);
    tracing::info!(
        period_secs = period.as_secs(),
        windows = ?config.reminders.days,
        "Цикл напоминаний запущен"
    );

    loop {
        interval.tick().await;
        if let Err(error) = check_and_send(&bot, &config, &db).await {
            tracing::warn!(error = %error, "Проход напоминаний не удался");
        }
    }
}

async fn check_and_send(bot: &Bot, config: &Config, db: &Db) -> Result<(), anyhow::Error> {
    for days in &config.reminders.days {
        let due = db.pending_reminders(*days).await?;
        for reminder in due {
            let text = format!(
                "⏰ Напоминание: срок действия VPN-конфига подходит к концу.\n\n\
                 📧 Имя: {}\n\
                 📅 Истекает примерно через {} дн.\n\
                 🗓️ Дата истечения: {}\n\n\
                 💡 Не забудьте продлить конфиг или создать новый.",
                reminder.email,
                days,
                format_expiry_ms(reminder.expire_time),
            );

            match bot.send_message(ChatId(reminder.user_id), text).await {
                Ok(_) => {
                    db.mark_reminder_sent(reminder.id, *days).await?;
                    tracing::info!(
                        user_id = reminder.user_id,
                        email = %reminder.email,
                        days_before = *days,
                        "Напоминание отправлено"
                    );
                }
                Err(error) => {
                    // пользователь мог заблокировать бота; попробуем в следующий проход
                    tracing::warn!(
                        user_id = reminder.user_id,
                        email = %reminder.email,
                        error = %error,
                        "Напоминание не доставлено"
                    );
                }
            }
        }
    }
    Ok(())
}
