//! xui-bot — Telegram-бот для выдачи VPN-конфигураций из панели x-ui.

mod bot;
mod config;
mod db;
mod link;
mod reminder;
mod xui;

use std::path::PathBuf;
use std::sync::Arc;
use teloxide::dispatching::Dispatcher;
use teloxide::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/etc/xui-bot.toml"));
    tracing::info!("Starting xui-bot with config {}", config_path.display());

    let config = Arc::new(config::Config::load(&config_path)?);
    let token = config.bot_token()?;
    tracing::info!(
        admin_count = config.admin_usernames.len(),
        allowed_count = config.allowed_usernames.len(),
        db_path = %config.db_path.display(),
        panel_url = %config.xui.base_url,
        default_inbound_id = config.xui.default_inbound_id,
        "Configuration loaded"
    );

    let db = Arc::new(db::Db::open(&config.db_path).await?);
    let xui = Arc::new(xui::XuiClient::new(
        &config.xui.base_url,
        &config.xui.username,
        &config.xui.password,
        config.xui.server_host.clone(),
        config.xui.accept_invalid_certs,
    )?);
    tracing::info!(server_host = xui.server_host(), "Panel client initialized");

    let bot = Bot::new(token);
    reminder::spawn(bot.clone(), config.clone(), db.clone());

    let state = bot::handlers::BotState {
        config,
        db,
        xui,
    };
    tracing::info!("Dispatcher initialized, bot is ready");

    Dispatcher::builder(bot, bot::handlers::schema())
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
