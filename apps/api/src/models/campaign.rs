use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::outreach::candidate::Channel;
use crate::outreach::delivery::DeliveryTally;

/// One row per run with its final tally.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CampaignRunRow {
    pub id: String,
    pub user_id: String,
    pub channel: String,
    /// running | completed | failed | cancelled
    pub status: String,
    pub sent: i64,
    pub skipped: i64,
    pub failed: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

pub async fn insert_run(
    pool: &SqlitePool,
    run_id: Uuid,
    user_id: Uuid,
    channel: Channel,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO campaign_runs (id, user_id, channel, status, started_at) VALUES (?, ?, ?, 'running', ?)",
    )
    .bind(run_id.to_string())
    .bind(user_id.to_string())
    .bind(channel.as_str())
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn finish_run(
    pool: &SqlitePool,
    run_id: Uuid,
    status: &str,
    tally: &DeliveryTally,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE campaign_runs
        SET status = ?, sent = ?, skipped = ?, failed = ?, finished_at = ?
        WHERE id = ?
        "#,
    )
    .bind(status)
    .bind(tally.sent as i64)
    .bind(tally.skipped as i64)
    .bind(tally.failed as i64)
    .bind(Utc::now())
    .bind(run_id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_runs(pool: &SqlitePool, user_id: Uuid) -> Result<Vec<CampaignRunRow>, sqlx::Error> {
    sqlx::query_as::<_, CampaignRunRow>(
        "SELECT * FROM campaign_runs WHERE user_id = ? ORDER BY started_at DESC",
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await
}
