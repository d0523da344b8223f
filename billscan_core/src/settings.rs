//! Generic key-value settings store
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::postgres::PostgresDB;
use crate::statements::DataError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub description: Option<String>,
}

/// Handler for key-value settings
#[async_trait]
pub trait SettingHandler {
    /// Fetch a setting by key; `None` if it was never stored
    async fn get_setting(&self, key: &str) -> Result<Option<Setting>, DataError>;

    /// Insert or replace a setting
    async fn upsert_setting(&self, setting: &Setting) -> Result<(), DataError>;
}

#[async_trait]
impl SettingHandler for PostgresDB {
    async fn get_setting(&self, key: &str) -> Result<Option<Setting>, DataError> {
        use sqlx::Row;
        let row = sqlx::query("SELECT key, value, description FROM settings WHERE key=$1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DataError::DataAccessFailure(e.to_string()))?;
        match row {
            Some(row) => Ok(Some(Setting {
                key: row
                    .try_get("key")
                    .map_err(|e| DataError::DataAccessFailure(e.to_string()))?,
                value: row
                    .try_get("value")
                    .map_err(|e| DataError::DataAccessFailure(e.to_string()))?,
                description: row
                    .try_get("description")
                    .map_err(|e| DataError::DataAccessFailure(e.to_string()))?,
            })),
            None => Ok(None),
        }
    }

    async fn upsert_setting(&self, setting: &Setting) -> Result<(), DataError> {
        sqlx::query(
            "INSERT INTO settings (key, value, description) VALUES ($1, $2, $3)
             ON CONFLICT (key) DO UPDATE SET value=$2, description=$3",
        )
        .bind(&setting.key)
        .bind(&setting.value)
        .bind(&setting.description)
        .execute(&self.pool)
        .await
        .map_err(|e| DataError::InsertFailed(e.to_string()))?;
        Ok(())
    }
}
