//! # QuickChat Database
//!
//! Connection pooling and access to the `chats` table, the durable sink of
//! the persistence worker. The schema itself is owned by the CRUD service.

use anyhow::Result;
use chrono::{DateTime, Utc};
use quickchat_config::DbConfig;
use quickchat_types::ChatEvent;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};

/// Database connection pool type
pub type DbPool = Pool<Postgres>;

/// One durable chat row. Written once per consumed log record; the table
/// has no uniqueness constraint, so redelivered records become duplicates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedMessage {
    pub group_id: String,
    pub message: Option<String>,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<&ChatEvent> for PersistedMessage {
    fn from(event: &ChatEvent) -> Self {
        Self {
            group_id: event.room_id.to_string(),
            message: event.body.clone(),
            name: event.sender_name.clone(),
            created_at: event.created_at,
        }
    }
}

/// Create a PostgreSQL connection pool
pub async fn create_pool(database_url: &str, db_config: &DbConfig) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(db_config.max_connections)
        .acquire_timeout(std::time::Duration::from_secs(
            db_config.acquire_timeout_secs,
        ))
        .idle_timeout(Some(std::time::Duration::from_secs(
            db_config.idle_timeout_secs,
        )))
        .test_before_acquire(true)
        .connect(database_url)
        .await?;

    Ok(pool)
}

pub async fn insert_chat(pool: &DbPool, message: &PersistedMessage) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO chats (group_id, message, name, created_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(&message.group_id)
    .bind(&message.message)
    .bind(&message.name)
    .bind(message.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn ping(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickchat_types::RoomId;

    #[test]
    fn test_persisted_message_from_event() {
        let created_at = Utc::now();
        let event = ChatEvent {
            room_id: RoomId::parse("abc").unwrap(),
            sender_name: "Alice".to_string(),
            body: None,
            created_at,
        };

        let row = PersistedMessage::from(&event);
        assert_eq!(row.group_id, "abc");
        assert_eq!(row.name, "Alice");
        assert_eq!(row.message, None);
        assert_eq!(row.created_at, created_at);
    }

    // Requires a running Postgres with the `chats` table:
    // DATABASE_URL=postgres://... cargo test -p quickchat-db -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_insert_keeps_duplicates() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL");
        let pool = create_pool(&url, &DbConfig::default()).await.unwrap();

        let group_id = format!("test-{}", Utc::now().timestamp_micros());
        let message = PersistedMessage {
            group_id: group_id.clone(),
            message: Some("hi".to_string()),
            name: "Alice".to_string(),
            created_at: Utc::now(),
        };

        insert_chat(&pool, &message).await.unwrap();
        insert_chat(&pool, &message).await.unwrap();

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chats WHERE group_id = $1")
            .bind(&group_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 2);
    }
}
