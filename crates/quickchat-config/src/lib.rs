// ============================================================================
// QuickChat Config - Centralized configuration management
// ============================================================================
//
// Configuration for the gateway and the persistence worker, loaded from
// environment variables (and an optional .env file) with defaults.
//
// ============================================================================

mod constants;
mod database;
mod gateway;
mod kafka;
mod logging;
mod persistence;
mod redis;

pub use constants::MAX_MESSAGE_SIZE;
pub use database::DbConfig;
pub use gateway::GatewayConfig;
pub use kafka::KafkaConfig;
pub use logging::{LogFormat, LoggingConfig};
pub use persistence::{CommitPolicy, PersistenceConfig};
pub use redis::{FabricMode, RedisConfig};

use anyhow::Result;
use constants::*;

/// Main configuration structure for QuickChat services
#[derive(Clone, Debug)]
pub struct Config {
    /// Only the persistence worker needs a database
    pub database_url: Option<String>,
    pub port: u16,
    pub bind_address: String,
    pub health_port: u16,
    pub rust_log: String,

    // Sub-configurations
    pub gateway: GatewayConfig,
    pub kafka: KafkaConfig,
    pub redis: RedisConfig,
    pub db: DbConfig,
    pub logging: LoggingConfig,
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            port,
            bind_address: format!("0.0.0.0:{}", port),
            health_port: std::env::var("HEALTH_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_HEALTH_PORT),
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),

            gateway: GatewayConfig::from_env(),
            kafka: KafkaConfig::from_env(),
            redis: RedisConfig::from_env()?,
            db: DbConfig::from_env(),
            logging: LoggingConfig::from_env(),
            persistence: PersistenceConfig::from_env()?,
        })
    }

    /// DATABASE_URL, failing with a readable error when a service needs it
    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set"))
    }
}
