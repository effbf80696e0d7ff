use axum::{http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Application error type
///
/// The first four variants are the chat pipeline's failure taxonomy. Only
/// `InvalidRoom` ever reaches a client (as a handshake rejection); the rest
/// are caught at the boundary where they occur and turned into diagnostics.
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Chat Pipeline Taxonomy =====
    #[error("Invalid room: {0}")]
    InvalidRoom(#[from] quickchat_types::RoomIdError),

    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("Malformed log record: {0}")]
    ParseFailure(String),

    #[error("Storage write failed: {0}")]
    StorageWriteFailure(String),

    // ===== Serialization Errors =====
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ===== Database & Storage Errors =====
    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Kafka Errors =====
    #[error("Kafka error: {0}")]
    Kafka(String),

    // ===== Internal Server Errors =====
    #[error("Internal server error: {0}")]
    Internal(String),

    // ===== Unknown/Generic Errors =====
    #[error("Unknown error: {0}")]
    Unknown(#[from] anyhow::Error),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidRoom(_) => StatusCode::BAD_REQUEST,
            AppError::BrokerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            #[cfg(feature = "redis")]
            AppError::Redis(_) => StatusCode::SERVICE_UNAVAILABLE,
            #[cfg(feature = "database")]
            AppError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::StorageWriteFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::InvalidRoom(_) => "INVALID_ROOM",
            AppError::BrokerUnavailable(_) => "BROKER_UNAVAILABLE",
            AppError::ParseFailure(_) => "PARSE_FAILURE",
            AppError::StorageWriteFailure(_) => "STORAGE_WRITE_FAILURE",
            AppError::Json(_) => "JSON_ERROR",
            #[cfg(feature = "database")]
            AppError::Database(_) => "DATABASE_ERROR",
            #[cfg(feature = "redis")]
            AppError::Redis(_) => "REDIS_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Kafka(_) => "KAFKA_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Unknown(_) => "UNKNOWN_ERROR",
        }
    }

    /// Log this error with appropriate level and context
    pub fn log(&self) {
        let code = self.error_code();

        match self {
            AppError::InvalidRoom(_) => {
                tracing::debug!(error = %self, error_code = %code, "Handshake rejected");
            }
            AppError::ParseFailure(_) => {
                tracing::warn!(error = %self, error_code = %code, "Skipping malformed record");
            }
            _ => {
                tracing::error!(error = %self, error_code = %code, "Operation failed");
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        self.log();

        let status = self.status_code();
        let body = if status.is_server_error() {
            // Don't expose internal details to the caller
            json!({
                "status": "unavailable",
                "error_code": self.error_code(),
            })
        } else {
            json!({
                "error": self.to_string(),
                "error_code": self.error_code(),
            })
        };

        (status, axum::Json(body)).into_response()
    }
}

// ============================================================================
// Conversion from common error types
// ============================================================================

#[cfg(feature = "kafka")]
impl From<rdkafka::error::KafkaError> for AppError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        AppError::Kafka(err.to_string())
    }
}

// ============================================================================
// Helper functions for creating common errors
// ============================================================================

impl AppError {
    pub fn broker_unavailable(msg: impl Into<String>) -> Self {
        AppError::BrokerUnavailable(msg.into())
    }

    pub fn parse_failure(msg: impl Into<String>) -> Self {
        AppError::ParseFailure(msg.into())
    }

    pub fn storage_write(msg: impl Into<String>) -> Self {
        AppError::StorageWriteFailure(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }
}
