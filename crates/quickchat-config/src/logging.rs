// ============================================================================
// Logging Configuration
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// Log sender names and identities in clear instead of salted hashes
    pub enable_user_identifiers: bool,
    pub hash_salt: String,
    pub format: LogFormat,
}

impl LoggingConfig {
    pub(crate) fn from_env() -> Self {
        let hash_salt = std::env::var("LOG_HASH_SALT").unwrap_or_default();
        let hash_salt = if hash_salt.is_empty() {
            // Per-process salt: hashes stay stable within one run only
            let generated = uuid::Uuid::new_v4().to_string();
            tracing::warn!("LOG_HASH_SALT not set, identity hashes will not correlate across restarts");
            generated
        } else {
            hash_salt
        };

        Self {
            enable_user_identifiers: std::env::var("LOG_USER_IDENTIFIERS")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            hash_salt,
            format: match std::env::var("LOG_FORMAT").as_deref() {
                Ok("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enable_user_identifiers: false,
            hash_salt: "quickchat-test-salt".to_string(),
            format: LogFormat::Pretty,
        }
    }
}
