// ============================================================================
// Persistence Worker Configuration
// ============================================================================

use crate::constants::{DEFAULT_RETRY_BASE_MS, DEFAULT_RETRY_MAX_MS};
use anyhow::Result;

/// When the persistence worker commits a record's offset
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitPolicy {
    /// Commit after every record whatever the write outcome.
    /// A failed storage write is logged and the message is lost from history.
    BestEffort,
    /// Commit only after a successful write; failed writes are retried in
    /// place, holding the partition until storage recovers.
    AtLeastOnce,
}

impl std::str::FromStr for CommitPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "best_effort" | "best-effort" => Ok(CommitPolicy::BestEffort),
            "at_least_once" | "at-least-once" => Ok(CommitPolicy::AtLeastOnce),
            other => Err(format!("Unknown commit policy: {}", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PersistenceConfig {
    pub commit_policy: CommitPolicy,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
}

impl PersistenceConfig {
    pub(crate) fn from_env() -> Result<Self> {
        let commit_policy = std::env::var("PERSISTENCE_COMMIT_POLICY")
            .unwrap_or_else(|_| "best_effort".to_string())
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;

        Ok(Self {
            commit_policy,
            retry_base_ms: std::env::var("PERSISTENCE_RETRY_BASE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RETRY_BASE_MS),
            retry_max_ms: std::env::var("PERSISTENCE_RETRY_MAX_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RETRY_MAX_MS),
        })
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            commit_policy: CommitPolicy::BestEffort,
            retry_base_ms: DEFAULT_RETRY_BASE_MS,
            retry_max_ms: DEFAULT_RETRY_MAX_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_policy_parsing() {
        assert_eq!("best_effort".parse::<CommitPolicy>(), Ok(CommitPolicy::BestEffort));
        assert_eq!("AT-LEAST-ONCE".parse::<CommitPolicy>(), Ok(CommitPolicy::AtLeastOnce));
        assert!("exactly_once".parse::<CommitPolicy>().is_err());
    }
}
