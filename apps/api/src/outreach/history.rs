//! Per-user contact history, one ordered list per channel.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::contact::ContactRecordRow;
use crate::outreach::candidate::{Channel, ContactRecord};

#[async_trait]
pub trait History: Send + Sync {
    /// Appends a record. Appending a key that is already present is a no-op
    /// returning `Ok(false)`.
    async fn append(&self, record: &ContactRecord) -> Result<bool, sqlx::Error>;

    /// Records in insertion (chronological) order.
    async fn list(&self) -> Result<Vec<ContactRecord>, sqlx::Error>;

    async fn contains_key(&self, key: &str) -> Result<bool, sqlx::Error>;
}

/// SQLite-backed history scoped to one user and one channel.
#[derive(Clone)]
pub struct SqliteHistory {
    pool: SqlitePool,
    user_id: Uuid,
    channel: Channel,
}

impl SqliteHistory {
    pub fn new(pool: SqlitePool, user_id: Uuid, channel: Channel) -> Self {
        Self {
            pool,
            user_id,
            channel,
        }
    }

    /// All dedup keys for this user and channel, for the Filter stage.
    pub async fn keys(&self) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            "SELECT dedup_key FROM contact_records WHERE user_id = ? AND channel = ?",
        )
        .bind(self.user_id.to_string())
        .bind(self.channel.as_str())
        .fetch_all(&self.pool)
        .await
    }
}

#[async_trait]
impl History for SqliteHistory {
    async fn append(&self, record: &ContactRecord) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO contact_records
                (user_id, channel, dedup_key, organization_name, contact_name,
                 contact_address, job_title, message_summary, sent_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(self.user_id.to_string())
        .bind(self.channel.as_str())
        .bind(&record.dedup_key)
        .bind(&record.organization_name)
        .bind(&record.contact_name)
        .bind(&record.contact_address)
        .bind(&record.job_title)
        .bind(&record.message_summary)
        .bind(record.sent_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list(&self) -> Result<Vec<ContactRecord>, sqlx::Error> {
        let rows = list_contact_rows(&self.pool, self.user_id, self.channel).await?;
        Ok(rows.into_iter().map(ContactRecord::from).collect())
    }

    async fn contains_key(&self, key: &str) -> Result<bool, sqlx::Error> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM contact_records WHERE user_id = ? AND channel = ? AND dedup_key = ?",
        )
        .bind(self.user_id.to_string())
        .bind(self.channel.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }
}

/// Raw rows for one user and channel, oldest first.
pub async fn list_contact_rows(
    pool: &SqlitePool,
    user_id: Uuid,
    channel: Channel,
) -> Result<Vec<ContactRecordRow>, sqlx::Error> {
    sqlx::query_as::<_, ContactRecordRow>(
        "SELECT * FROM contact_records WHERE user_id = ? AND channel = ? ORDER BY id ASC",
    )
    .bind(user_id.to_string())
    .bind(channel.as_str())
    .fetch_all(pool)
    .await
}
