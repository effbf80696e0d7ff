//! Redis client implementation with connection management

use crate::Result;
use redis::{AsyncCommands, aio::ConnectionManager};

/// Redis client with automatic reconnection
#[derive(Clone)]
pub struct RedisClient {
    conn: ConnectionManager,
}

impl RedisClient {
    /// Connect to Redis server
    ///
    /// Supports both redis:// and rediss:// (TLS) URLs
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// PUBLISH - returns the number of subscribers that received the payload
    pub async fn publish(&mut self, channel: &str, payload: &[u8]) -> Result<i64> {
        self.conn.publish(channel, payload).await
    }

    /// PING - used by readiness checks
    pub async fn ping(&mut self) -> Result<()> {
        let _: String = redis::cmd("PING").query_async(&mut self.conn).await?;
        Ok(())
    }
}
