use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::outreach::candidate::ContactRecord;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ContactRecordRow {
    pub id: i64,
    pub user_id: String,
    pub channel: String,
    pub dedup_key: String,
    pub organization_name: String,
    pub contact_name: Option<String>,
    pub contact_address: Option<String>,
    pub job_title: Option<String>,
    pub message_summary: String,
    pub sent_at: DateTime<Utc>,
}

impl From<ContactRecordRow> for ContactRecord {
    fn from(row: ContactRecordRow) -> Self {
        ContactRecord {
            dedup_key: row.dedup_key,
            organization_name: row.organization_name,
            contact_name: row.contact_name,
            contact_address: row.contact_address,
            job_title: row.job_title,
            message_summary: row.message_summary,
            sent_at: row.sent_at,
        }
    }
}
