use super::{Store, Table, setting_from_row};
use crate::Result;
use crate::model::Setting;

/// Setting row holding the saved backup passphrase.
pub const PASSPHRASE_KEY: &str = "backup_passphrase";
/// Setting row holding the monthly income target, an integer amount.
pub const MONTHLY_TARGET_KEY: &str = "monthly_target";

impl Store {
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        self.notify(&[Table::Settings]);
        Ok(())
    }

    pub async fn delete_setting(&self, key: &str) -> Result<bool> {
        let res = sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        let deleted = res.rows_affected() > 0;
        if deleted {
            self.notify(&[Table::Settings]);
        }
        Ok(deleted)
    }

    pub async fn list_settings(&self) -> Result<Vec<Setting>> {
        let rows = sqlx::query("SELECT key, value FROM settings ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(setting_from_row).collect()
    }

    /// The remembered backup passphrase, if one was saved and is non-empty.
    pub async fn saved_passphrase(&self) -> Result<Option<String>> {
        Ok(self
            .get_setting(PASSPHRASE_KEY)
            .await?
            .filter(|p| !p.is_empty()))
    }

    /// Remember `passphrase` for later backups. Empty input is ignored.
    pub async fn save_passphrase(&self, passphrase: &str) -> Result<()> {
        if passphrase.is_empty() {
            return Ok(());
        }
        self.set_setting(PASSPHRASE_KEY, passphrase).await
    }

    /// Monthly income target; unset or unparsable reads as zero.
    pub async fn monthly_target(&self) -> Result<i64> {
        Ok(self
            .get_setting(MONTHLY_TARGET_KEY)
            .await?
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0))
    }

    pub async fn set_monthly_target(&self, amount: i64) -> Result<()> {
        self.set_setting(MONTHLY_TARGET_KEY, &amount.to_string())
            .await
    }
}
