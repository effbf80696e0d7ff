use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use quickchat_config::DbConfig;
use quickchat_db::{DbPool, PersistedMessage};
use quickchat_error::{AppError, AppResult};

use crate::ops::ReadinessProbe;

/// Durable sink of the persistence worker
#[async_trait::async_trait]
pub trait ChatStore: Send + Sync {
    /// Write one row; fails with `StorageWriteFailure`
    async fn write(&self, message: &PersistedMessage) -> AppResult<()>;
}

/// PostgreSQL `chats` table
#[derive(Clone)]
pub struct PgChatStore {
    pool: DbPool,
}

impl PgChatStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, db_config: &DbConfig) -> anyhow::Result<Self> {
        let pool = quickchat_db::create_pool(database_url, db_config).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait::async_trait]
impl ChatStore for PgChatStore {
    async fn write(&self, message: &PersistedMessage) -> AppResult<()> {
        quickchat_db::insert_chat(&self.pool, message)
            .await
            .map_err(|e| AppError::storage_write(e.to_string()))
    }
}

#[async_trait::async_trait]
impl ReadinessProbe for PgChatStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn check(&self) -> AppResult<()> {
        quickchat_db::ping(&self.pool).await?;
        Ok(())
    }
}

/// In-memory store with a switch to simulate an outage
#[derive(Clone, Default)]
pub struct MemoryChatStore {
    rows: Arc<Mutex<Vec<PersistedMessage>>>,
    failing: Arc<AtomicBool>,
    attempts: Arc<AtomicU64>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn rows(&self) -> Vec<PersistedMessage> {
        self.rows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Write attempts, failed ones included
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ChatStore for MemoryChatStore {
    async fn write(&self, message: &PersistedMessage) -> AppResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::storage_write("memory store marked failing"));
        }
        self.rows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message.clone());
        Ok(())
    }
}
