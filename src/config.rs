//! Конфигурация бота (TOML-файл).

use anyhow::{anyhow, Context};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Токен бота; если не задан, берётся из переменной окружения BOT_TOKEN.
    #[serde(default)]
    pub bot_token: Option<String>,
    pub db_path: PathBuf,
    /// Username'ы администраторов, с @ или без.
    #[serde(default)]
    pub admin_usernames: Vec<String>,
    /// Пустой список — бот открыт для всех.
    #[serde(default)]
    pub allowed_usernames: Vec<String>,
    pub xui: XuiSettings,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub reminders: Reminders,
}

#[derive(Debug, Deserialize)]
pub struct XuiSettings {
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Адрес VPN-сервера в ссылках; по умолчанию хост панели.
    #[serde(default)]
    pub server_host: Option<String>,
    #[serde(default = "default_inbound_id")]
    pub default_inbound_id: i64,
    /// Для панелей с самоподписанным сертификатом.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub default_config_limit: i64,
    pub config_expiry_days: i64,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            default_config_limit: 1,
            config_expiry_days: 31,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Reminders {
    pub check_interval_secs: u64,
    /// За сколько дней до истечения напоминать.
    pub days: Vec<i64>,
}

impl Default for Reminders {
    fn default() -> Self {
        Reminders {
            check_interval_secs: 3600,
            days: vec![10, 3],
        }
    }
}

fn default_inbound_id() -> i64 {
    1
}

fn normalize_username(username: &str) -> String {
    username.trim().trim_start_matches('@').to_lowercase()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, anyhow::Error> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Не удалось прочитать конфиг {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("Не удалось разобрать конфиг {}", path.display()))?;
        Ok(config)
    }

    pub fn bot_token(&self) -> Result<String, anyhow::Error> {
        if let Some(token) = &self.bot_token {
            if !token.trim().is_empty() {
                return Ok(token.trim().to_string());
            }
        }
        std::env::var("BOT_TOKEN")
            .map_err(|_| anyhow!("Токен бота не задан ни в конфиге, ни в BOT_TOKEN"))
    }

    pub fn is_admin(&self, username: Option<&str>) -> bool {
        in_list(&self.admin_usernames, username)
    }

    pub fn is_allowed(&self, username: Option<&str>) -> bool {
        if self.allowed_usernames.is_empty() {
            return true;
        }
        in_list(&self.allowed_usernames, username)
    }
}

fn in_list(list: &[String], username: Option<&str>) -> bool {
    let Some(username) = username else {
        return false;
    };
    let normalized = normalize_username(username);
    if normalized.is_empty() {
        return false;
    }
    list.iter().any(|entry| normalize_username(entry) == normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(allowed: &[&str], admins: &[&str]) -> Config {
        Config {
            bot_token: None,
            db_path: PathBuf::from("/tmp/bot.db"),
            admin_usernames: admins.iter().map(|s| s.to_string()).collect(),
            allowed_usernames: allowed.iter().map(|s| s.to_string()).collect(),
            xui: XuiSettings {
                base_url: "https://panel.example.com".into(),
                username: "admin".into(),
                password: "pass".into(),
                server_host: None,
                default_inbound_id: 1,
                accept_invalid_certs: false,
            },
            limits: Limits::default(),
            reminders: Reminders::default(),
        }
    }

    #[test]
    fn empty_allowlist_means_open_access() {
        let config = config_with(&[], &[]);
        assert!(config.is_allowed(Some("anyone")));
        assert!(config.is_allowed(None));
    }

    #[test]
    fn allowlist_normalizes_at_sign_and_case() {
        let config = config_with(&["@Alice"], &[]);
        assert!(config.is_allowed(Some("alice")));
        assert!(config.is_allowed(Some("@ALICE")));
        assert!(!config.is_allowed(Some("bob")));
        assert!(!config.is_allowed(None));
    }

    #[test]
    fn admin_requires_username() {
        let config = config_with(&[], &["root"]);
        assert!(config.is_admin(Some("@root")));
        assert!(!config.is_admin(Some("user")));
        assert!(!config.is_admin(None));
    }
}
