//! SQLite-слой: пользователи с лимитами, журнал выданных конфигов и
//! расписание напоминаний. Состояние панели здесь не дублируется.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use sqlx::FromRow;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: i64,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub config_limit: i64,
    pub configs_created: i64,
    pub is_admin: bool,
    pub created_at: i64,
}

/// Вердикт проверки лимита перед выдачей конфига.
#[derive(Debug, Clone)]
pub enum QuotaCheck {
    /// Пользователь ещё не писал боту.
    UnknownUser,
    /// Лимит не назначен администратором.
    NoLimit,
    Exhausted { limit: i64, used: i64 },
    Allowed { limit: i64, used: i64 },
}

#[derive(Debug, Clone, FromRow)]
pub struct Reminder {
    pub id: i64,
    pub user_id: i64,
    pub email: String,
    pub inbound_id: i64,
    /// Миллисекунды эпохи.
    pub expire_time: i64,
}

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

pub struct Db {
    pool: SqlitePool,
}

fn current_unix_timestamp() -> Result<i64, anyhow::Error> {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .map_err(|err| anyhow::anyhow!("Системное время меньше UNIX_EPOCH: {}", err))
}

fn current_epoch_ms() -> Result<i64, anyhow::Error> {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .map_err(|err| anyhow::anyhow!("Системное время меньше UNIX_EPOCH: {}", err))
}

/// Колонка отметки по окну напоминания: всё, что не 10 дней, пишем в
/// трёхдневную, как и раньше.
fn reminder_flag_column(days_before: i64) -> &'static str {
    if days_before == 10 {
        "reminder_10_days_sent"
    } else {
        "reminder_3_days_sent"
    }
}

impl Db {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow::anyhow!("Не удалось создать директорию для БД: {}", e))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(opts)
            .await
            .map_err(|e| anyhow::anyhow!("Не удалось подключиться к SQLite: {}", e))?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self, anyhow::Error> {
        // одна коннекция, иначе каждый запрос пула получит свою пустую :memory:
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY,
                username TEXT,
                full_name TEXT,
                config_limit INTEGER NOT NULL DEFAULT 0,
                configs_created INTEGER NOT NULL DEFAULT 0,
                is_admin INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_users_username ON users(username);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Миграция users: {}", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS issued_configs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                email TEXT NOT NULL,
                inbound_id INTEGER NOT NULL,
                issued_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users (user_id)
            );
            CREATE INDEX IF NOT EXISTS idx_issued_user ON issued_configs(user_id);
            CREATE INDEX IF NOT EXISTS idx_issued_email ON issued_configs(email);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Миграция issued_configs: {}", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reminders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                email TEXT NOT NULL,
                inbound_id INTEGER NOT NULL,
                expire_time INTEGER NOT NULL,
                reminder_10_days_sent INTEGER NOT NULL DEFAULT 0,
                reminder_3_days_sent INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (user_id) REFERENCES users (user_id)
            );
            CREATE INDEX IF NOT EXISTS idx_reminders_expire ON reminders(expire_time);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Миграция reminders: {}", e))?;

        Ok(())
    }

    /// Создаёт пользователя или обновляет username/имя, не трогая лимит.
    pub async fn upsert_user(
        &self,
        user_id: i64,
        username: Option<&str>,
        full_name: Option<&str>,
        default_limit: i64,
    ) -> Result<(), anyhow::Error> {
        let now = current_unix_timestamp()?;
        let exists = sqlx::query_scalar::<_, i64>("SELECT 1 FROM users WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        if exists.is_some() {
            sqlx::query("UPDATE users SET username = ?, full_name = ? WHERE user_id = ?")
                .bind(username)
                .bind(full_name)
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        } else {
            sqlx::query(
                "INSERT INTO users (user_id, username, full_name, config_limit, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(user_id)
            .bind(username)
            .bind(full_name)
            .bind(default_limit)
            .bind(now)
            .execute(&self.pool)
            .await?;
            tracing::info!(user_id, default_limit, "Новый пользователь зарегистрирован");
        }
        Ok(())
    }

    pub async fn get_user(&self, user_id: i64) -> Result<Option<User>, anyhow::Error> {
        let user = sqlx::query_as::<_, User>(
            "SELECT user_id, username, full_name, config_limit, configs_created, is_admin, created_at FROM users WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// Пользователь по username (без учёта регистра, без @).
    pub async fn get_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<User>, anyhow::Error> {
        let normalized = username.trim_start_matches('@');
        if normalized.is_empty() {
            return Ok(None);
        }
        let user = sqlx::query_as::<_, User>(
            "SELECT user_id, username, full_name, config_limit, configs_created, is_admin, created_at
             FROM users WHERE lower(username) = lower(?)
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(normalized)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn set_config_limit(&self, user_id: i64, limit: i64) -> Result<bool, anyhow::Error> {
        let result = sqlx::query("UPDATE users SET config_limit = ? WHERE user_id = ?")
            .bind(limit)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            tracing::info!(user_id, limit, "Лимит конфигов обновлён");
        }
        Ok(result.rows_affected() > 0)
    }

    pub async fn quota_check(&self, user_id: i64) -> Result<QuotaCheck, anyhow::Error> {
        let Some(user) = self.get_user(user_id).await? else {
            return Ok(QuotaCheck::UnknownUser);
        };
        if user.config_limit == 0 {
            return Ok(QuotaCheck::NoLimit);
        }
        if user.configs_created >= user.config_limit {
            return Ok(QuotaCheck::Exhausted {
                limit: user.config_limit,
                used: user.configs_created,
            });
        }
        Ok(QuotaCheck::Allowed {
            limit: user.config_limit,
            used: user.configs_created,
        })
    }

    /// Журналирует выдачу и увеличивает счётчик пользователя.
    pub async fn record_issued_config(
        &self,
        user_id: i64,
        email: &str,
        inbound_id: i64,
    ) -> Result<(), anyhow::Error> {
        let now = current_unix_timestamp()?;
        sqlx::query(
            "INSERT INTO issued_configs (user_id, email, inbound_id, issued_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(email)
        .bind(inbound_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        sqlx::query("UPDATE users SET configs_created = configs_created + 1 WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn has_issued(
        &self,
        user_id: i64,
        email: &str,
        inbound_id: i64,
    ) -> Result<bool, anyhow::Error> {
        let row = sqlx::query_scalar::<_, i64>(
            "SELECT 1 FROM issued_configs WHERE user_id = ? AND email = ? AND inbound_id = ? LIMIT 1",
        )
        .bind(user_id)
        .bind(email)
        .bind(inbound_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Кому выдавался конфиг с этим именем.
    pub async fn find_issuer(
        &self,
        email: &str,
        inbound_id: i64,
    ) -> Result<Option<i64>, anyhow::Error> {
        let user_id = sqlx::query_scalar::<_, i64>(
            "SELECT user_id FROM issued_configs WHERE email = ? AND inbound_id = ?
             ORDER BY issued_at DESC LIMIT 1",
        )
        .bind(email)
        .bind(inbound_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user_id)
    }

    pub async fn list_users(&self) -> Result<Vec<User>, anyhow::Error> {
        let users = sqlx::query_as::<_, User>(
            "SELECT user_id, username, full_name, config_limit, configs_created, is_admin, created_at
             FROM users ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    /// Ставит напоминание заново: старая запись по той же тройке удаляется,
    /// отметки об отправке сбрасываются.
    pub async fn upsert_reminder(
        &self,
        user_id: i64,
        email: &str,
        inbound_id: i64,
        expire_time: i64,
    ) -> Result<(), anyhow::Error> {
        sqlx::query("DELETE FROM reminders WHERE user_id = ? AND email = ? AND inbound_id = ?")
            .bind(user_id)
            .bind(email)
            .bind(inbound_id)
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "INSERT INTO reminders (user_id, email, inbound_id, expire_time) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(email)
        .bind(inbound_id)
        .bind(expire_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Напоминания, попадающие в окно «истекает примерно через N дней»
    /// (цель ±1 сутки) и ещё не отправленные для этого окна.
    pub async fn pending_reminders(
        &self,
        days_before: i64,
    ) -> Result<Vec<Reminder>, anyhow::Error> {
        let now_ms = current_epoch_ms()?;
        let target = now_ms + days_before * DAY_MS;
        let column = reminder_flag_column(days_before);

        let reminders = sqlx::query_as::<_, Reminder>(&format!(
            "SELECT id, user_id, email, inbound_id, expire_time FROM reminders
             WHERE expire_time >= ? AND expire_time <= ? AND {} = 0",
            column
        ))
        .bind(target - DAY_MS)
        .bind(target + DAY_MS)
        .fetch_all(&self.pool)
        .await?;
        Ok(reminders)
    }

    pub async fn mark_reminder_sent(
        &self,
        reminder_id: i64,
        days_before: i64,
    ) -> Result<(), anyhow::Error> {
        let column = reminder_flag_column(days_before);
        sqlx::query(&format!("UPDATE reminders SET {} = 1 WHERE id = ?", column))
            .bind(reminder_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn quota_flow() {
        let db = Db::open_in_memory().await.unwrap();

        assert!(matches!(
            db.quota_check(1).await.unwrap(),
            QuotaCheck::UnknownUser
        ));

        db.upsert_user(1, Some("alice"), Some("Alice"), 1).await.unwrap();
        assert!(matches!(
            db.quota_check(1).await.unwrap(),
            QuotaCheck::Allowed { limit: 1, used: 0 }
        ));

        db.record_issued_config(1, "alice_1", 7).await.unwrap();
        assert!(matches!(
            db.quota_check(1).await.unwrap(),
            QuotaCheck::Exhausted { limit: 1, used: 1 }
        ));

        db.set_config_limit(1, 3).await.unwrap();
        assert!(matches!(
            db.quota_check(1).await.unwrap(),
            QuotaCheck::Allowed { limit: 3, used: 1 }
        ));
    }

    #[tokio::test]
    async fn upsert_user_preserves_limit() {
        let db = Db::open_in_memory().await.unwrap();
        db.upsert_user(1, Some("alice"), None, 1).await.unwrap();
        db.set_config_limit(1, 5).await.unwrap();
        db.upsert_user(1, Some("alice_renamed"), Some("Alice"), 1)
            .await
            .unwrap();

        let user = db.get_user(1).await.unwrap().unwrap();
        assert_eq!(user.config_limit, 5);
        assert_eq!(user.username.as_deref(), Some("alice_renamed"));
    }

    #[tokio::test]
    async fn username_lookup_ignores_case_and_at() {
        let db = Db::open_in_memory().await.unwrap();
        db.upsert_user(1, Some("Alice"), None, 1).await.unwrap();
        let user = db.get_user_by_username("@alice").await.unwrap();
        assert_eq!(user.map(|u| u.user_id), Some(1));
    }

    #[tokio::test]
    async fn reminder_window_and_flags() {
        let db = Db::open_in_memory().await.unwrap();
        db.upsert_user(1, Some("alice"), None, 1).await.unwrap();

        let now_ms = current_epoch_ms().unwrap();
        let in_ten_days = now_ms + 10 * DAY_MS;
        db.upsert_reminder(1, "alice_1", 7, in_ten_days).await.unwrap();

        let due = db.pending_reminders(10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].email, "alice_1");
        // трёхдневное окно ещё не наступило
        assert!(db.pending_reminders(3).await.unwrap().is_empty());

        db.mark_reminder_sent(due[0].id, 10).await.unwrap();
        assert!(db.pending_reminders(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_reminder_resets_sent_flag() {
        let db = Db::open_in_memory().await.unwrap();
        db.upsert_user(1, Some("alice"), None, 1).await.unwrap();

        let now_ms = current_epoch_ms().unwrap();
        db.upsert_reminder(1, "alice_1", 7, now_ms + 10 * DAY_MS)
            .await
            .unwrap();
        let due = db.pending_reminders(10).await.unwrap();
        db.mark_reminder_sent(due[0].id, 10).await.unwrap();

        // продление пересоздаёт запись — напоминание должно прийти снова
        db.upsert_reminder(1, "alice_1", 7, now_ms + 10 * DAY_MS)
            .await
            .unwrap();
        assert_eq!(db.pending_reminders(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn issuance_journal() {
        let db = Db::open_in_memory().await.unwrap();
        db.upsert_user(1, Some("alice"), None, 2).await.unwrap();
        db.record_issued_config(1, "alice_1", 7).await.unwrap();

        assert!(db.has_issued(1, "alice_1", 7).await.unwrap());
        assert!(!db.has_issued(1, "alice_2", 7).await.unwrap());
        assert_eq!(db.find_issuer("alice_1", 7).await.unwrap(), Some(1));
        assert_eq!(db.find_issuer("ghost", 7).await.unwrap(), None);
    }
}
