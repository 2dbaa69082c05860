use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub resume_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Ids are always written by `insert_user` as hyphenated UUIDs.
    pub fn id(&self) -> Uuid {
        Uuid::parse_str(&self.id).unwrap_or_else(|_| Uuid::nil())
    }
}

pub async fn insert_user(pool: &SqlitePool, username: &str) -> Result<User, sqlx::Error> {
    let user = User {
        id: Uuid::new_v4().to_string(),
        username: username.to_string(),
        resume_path: None,
        created_at: Utc::now(),
    };

    sqlx::query("INSERT INTO users (id, username, resume_path, created_at) VALUES (?, ?, ?, ?)")
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.resume_path)
        .bind(user.created_at)
        .execute(pool)
        .await?;

    Ok(user)
}

pub async fn fetch_user(pool: &SqlitePool, user_id: Uuid) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await
}

pub async fn set_resume_path(
    pool: &SqlitePool,
    user_id: Uuid,
    resume_path: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET resume_path = ? WHERE id = ?")
        .bind(resume_path)
        .bind(user_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}
