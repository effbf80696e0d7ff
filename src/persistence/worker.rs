// ============================================================================
// Persistence Worker
// ============================================================================
//
// Drains the chat log into storage, one record at a time per partition.
// Sequential processing is what keeps per-room order in the `chats` table.
//
// Commit policy (PERSISTENCE_COMMIT_POLICY):
// - best_effort:   commit after every record. A failed write is logged and
//                  counted; the message is missing from history.
// - at_least_once: a failed write is retried in place with capped backoff
//                  and the offset is committed only after it succeeds.
//                  Shutdown during retries leaves the record uncommitted so
//                  the next consumer in the group redelivers it.
//
// Parse failures are skipped and committed under both policies.
//
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use quickchat_config::{CommitPolicy, PersistenceConfig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::processor::{ProcessResult, process_record};
use super::store::ChatStore;
use crate::event_log::{LogRecord, LogSource};
use crate::metrics;

const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(1);
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Subscribed,
    Polling,
    Processing,
    CommitOffset,
    Error,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Idle => "idle",
            WorkerState::Subscribed => "subscribed",
            WorkerState::Polling => "polling",
            WorkerState::Processing => "processing",
            WorkerState::CommitOffset => "commit_offset",
            WorkerState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Running totals since the worker started
#[derive(Debug, Default)]
pub struct WorkerStats {
    persisted: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    committed: AtomicU64,
}

impl WorkerStats {
    pub fn persisted(&self) -> u64 {
        self.persisted.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Failed write attempts, retries included
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
/// capped at `max`
pub fn retry_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    base.checked_mul(factor).map_or(max, |delay| delay.min(max))
}

pub struct PersistenceWorker<S, C: ?Sized> {
    source: S,
    store: Arc<C>,
    config: PersistenceConfig,
    stats: Arc<WorkerStats>,
    state: WorkerState,
}

impl<S, C> PersistenceWorker<S, C>
where
    S: LogSource,
    C: ChatStore + ?Sized,
{
    pub fn new(source: S, store: Arc<C>, config: PersistenceConfig) -> Self {
        Self {
            source,
            store,
            config,
            stats: Arc::new(WorkerStats::default()),
            state: WorkerState::Idle,
        }
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    fn transition(&mut self, next: WorkerState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "Persistence worker state");
            self.state = next;
        }
    }

    /// Consume until `shutdown` fires, then leave the consumer group
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(commit_policy = ?self.config.commit_policy, "Persistence worker started");
        self.transition(WorkerState::Subscribed);

        let stats_token = shutdown.child_token();
        tokio::spawn(log_stats_periodically(self.stats.clone(), stats_token.clone()));

        loop {
            self.transition(WorkerState::Polling);
            let polled = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                polled = self.source.next_record() => polled,
            };

            let record = match polled {
                Ok(record) => record,
                Err(e) => {
                    self.transition(WorkerState::Error);
                    error!(error = %e, "Failed to poll chat log");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => continue,
                    }
                }
            };

            self.transition(WorkerState::Processing);
            if !self.handle_record(&record, &shutdown).await {
                info!(
                    partition = record.partition,
                    offset = record.offset,
                    "Shutdown during write retries, leaving record uncommitted"
                );
                break;
            }

            self.transition(WorkerState::CommitOffset);
            match self.source.commit(&record).await {
                Ok(()) => {
                    self.stats.committed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.transition(WorkerState::Error);
                    error!(
                        error = %e,
                        partition = record.partition,
                        offset = record.offset,
                        "Failed to commit offset"
                    );
                }
            }
        }

        stats_token.cancel();
        if let Err(e) = self.source.close().await {
            warn!(error = %e, "Failed to close chat log consumer");
        }
        self.transition(WorkerState::Idle);
        info!(
            persisted = self.stats.persisted(),
            skipped = self.stats.skipped(),
            failed = self.stats.failed(),
            "Persistence worker stopped"
        );
    }

    /// Process one record. Returns whether its offset may be committed.
    async fn handle_record(&self, record: &LogRecord, shutdown: &CancellationToken) -> bool {
        let mut attempt: u32 = 0;

        loop {
            match process_record(self.store.as_ref(), record).await {
                ProcessResult::Persisted => {
                    self.stats.persisted.fetch_add(1, Ordering::Relaxed);
                    metrics::RECORDS_PERSISTED.inc();
                    debug!(
                        partition = record.partition,
                        offset = record.offset,
                        "Chat record persisted"
                    );
                    return true;
                }
                ProcessResult::Skipped(e) => {
                    self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                    metrics::RECORDS_SKIPPED.inc();
                    warn!(
                        error = %e,
                        partition = record.partition,
                        offset = record.offset,
                        "Skipping malformed chat record"
                    );
                    return true;
                }
                ProcessResult::Failed(e) => {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    metrics::STORAGE_WRITE_FAILURES.inc();

                    match self.config.commit_policy {
                        CommitPolicy::BestEffort => {
                            error!(
                                error = %e,
                                partition = record.partition,
                                offset = record.offset,
                                "Storage write failed, record dropped from history"
                            );
                            return true;
                        }
                        CommitPolicy::AtLeastOnce => {
                            attempt += 1;
                            let delay = retry_delay(
                                attempt,
                                Duration::from_millis(self.config.retry_base_ms),
                                Duration::from_millis(self.config.retry_max_ms),
                            );
                            warn!(
                                error = %e,
                                partition = record.partition,
                                offset = record.offset,
                                attempt,
                                retry_in_ms = delay.as_millis() as u64,
                                "Storage write failed, retrying"
                            );
                            tokio::select! {
                                _ = shutdown.cancelled() => return false,
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                    }
                }
            }
        }
    }
}

async fn log_stats_periodically(stats: Arc<WorkerStats>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(STATS_LOG_INTERVAL);
    // First tick completes immediately
    interval.tick().await;

    let (mut persisted, mut skipped, mut failed) = (0, 0, 0);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        let (now_persisted, now_skipped, now_failed) =
            (stats.persisted(), stats.skipped(), stats.failed());
        info!(
            persisted = now_persisted - persisted,
            skipped = now_skipped - skipped,
            failed = now_failed - failed,
            "Persistence worker metrics (last 30s)"
        );
        (persisted, skipped, failed) = (now_persisted, now_skipped, now_failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::{EventLog, MemoryLog};
    use crate::persistence::MemoryChatStore;
    use chrono::{TimeZone, Utc};
    use quickchat_types::{ChatEvent, RoomId};
    use tokio::task::JoinHandle;

    const TOPIC: &str = "chats";
    const GROUP: &str = "chats-v1-group";

    fn event(room: &str, body: &str, second: u32) -> Vec<u8> {
        ChatEvent {
            room_id: RoomId::parse(room).unwrap(),
            sender_name: "Alice".to_string(),
            body: Some(body.to_string()),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, second).unwrap(),
        }
        .to_json_bytes()
        .unwrap()
    }

    fn config(commit_policy: CommitPolicy) -> PersistenceConfig {
        PersistenceConfig {
            commit_policy,
            retry_base_ms: 5,
            retry_max_ms: 20,
        }
    }

    fn start(
        log: &MemoryLog,
        store: &MemoryChatStore,
        policy: CommitPolicy,
    ) -> (CancellationToken, Arc<WorkerStats>, JoinHandle<()>) {
        let worker = PersistenceWorker::new(
            log.subscribe(GROUP, TOPIC),
            Arc::new(store.clone()),
            config(policy),
        );
        let stats = worker.stats();
        let token = CancellationToken::new();
        let handle = tokio::spawn(worker.run(token.clone()));
        (token, stats, handle)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(5000);

        assert_eq!(retry_delay(1, base, max), Duration::from_millis(100));
        assert_eq!(retry_delay(2, base, max), Duration::from_millis(200));
        assert_eq!(retry_delay(4, base, max), Duration::from_millis(800));
        assert_eq!(retry_delay(7, base, max), max);
        assert_eq!(retry_delay(64, base, max), max);
    }

    #[tokio::test]
    async fn test_records_persisted_in_room_order() {
        let log = MemoryLog::new(4);
        for (i, body) in ["m1", "m2", "m3"].iter().enumerate() {
            log.append(TOPIC, "abc", &event("abc", body, i as u32)).await.unwrap();
        }
        log.append(TOPIC, "xyz", &event("xyz", "other", 0)).await.unwrap();

        let store = MemoryChatStore::new();
        let (token, stats, handle) = start(&log, &store, CommitPolicy::BestEffort);
        wait_until(|| store.rows().len() == 4).await;
        token.cancel();
        handle.await.unwrap();

        let abc: Vec<_> = store
            .rows()
            .into_iter()
            .filter(|row| row.group_id == "abc")
            .filter_map(|row| row.message)
            .collect();
        assert_eq!(abc, vec!["m1", "m2", "m3"]);
        assert_eq!(stats.persisted(), 4);
        assert_eq!(
            log.committed_offset(GROUP, TOPIC, log.partition_for("abc")),
            Some(3)
        );
    }

    #[tokio::test]
    async fn test_malformed_record_skipped_and_committed() {
        let log = MemoryLog::new(1);
        log.append(TOPIC, "abc", b"{not json").await.unwrap();
        log.append(TOPIC, "abc", &event("abc", "after", 1)).await.unwrap();

        let store = MemoryChatStore::new();
        let (token, stats, handle) = start(&log, &store, CommitPolicy::BestEffort);
        wait_until(|| log.committed_offset(GROUP, TOPIC, 0) == Some(2)).await;
        token.cancel();
        handle.await.unwrap();

        let rows = store.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].message.as_deref(), Some("after"));
        assert_eq!(stats.skipped(), 1);
        assert_eq!(stats.persisted(), 1);
    }

    #[tokio::test]
    async fn test_best_effort_commits_despite_storage_failure() {
        let log = MemoryLog::new(1);
        log.append(TOPIC, "abc", &event("abc", "lost", 0)).await.unwrap();
        log.append(TOPIC, "abc", &event("abc", "also lost", 1)).await.unwrap();

        let store = MemoryChatStore::new();
        store.set_failing(true);
        let (token, stats, handle) = start(&log, &store, CommitPolicy::BestEffort);
        wait_until(|| log.committed_offset(GROUP, TOPIC, 0) == Some(2)).await;
        token.cancel();
        handle.await.unwrap();

        assert!(store.rows().is_empty());
        assert_eq!(store.attempts(), 2);
        assert_eq!(stats.failed(), 2);
    }

    #[tokio::test]
    async fn test_at_least_once_retries_until_storage_recovers() {
        let log = MemoryLog::new(1);
        log.append(TOPIC, "abc", &event("abc", "kept", 0)).await.unwrap();

        let store = MemoryChatStore::new();
        store.set_failing(true);
        let (token, stats, handle) = start(&log, &store, CommitPolicy::AtLeastOnce);

        wait_until(|| store.attempts() >= 3).await;
        assert_eq!(log.committed_offset(GROUP, TOPIC, 0), None);

        store.set_failing(false);
        wait_until(|| log.committed_offset(GROUP, TOPIC, 0) == Some(1)).await;
        token.cancel();
        handle.await.unwrap();

        assert_eq!(store.rows().len(), 1);
        assert_eq!(stats.persisted(), 1);
        assert_eq!(stats.committed(), 1);
        assert!(stats.failed() >= 3);
    }

    #[tokio::test]
    async fn test_shutdown_during_retries_leaves_record_for_redelivery() {
        let log = MemoryLog::new(1);
        log.append(TOPIC, "abc", &event("abc", "pending", 0)).await.unwrap();

        let store = MemoryChatStore::new();
        store.set_failing(true);
        let (token, _, handle) = start(&log, &store, CommitPolicy::AtLeastOnce);
        wait_until(|| store.attempts() >= 2).await;
        token.cancel();
        handle.await.unwrap();
        assert_eq!(log.committed_offset(GROUP, TOPIC, 0), None);

        // The next member of the group picks the record up again
        store.set_failing(false);
        let (token, _, handle) = start(&log, &store, CommitPolicy::AtLeastOnce);
        wait_until(|| store.rows().len() == 1).await;
        token.cancel();
        handle.await.unwrap();
        assert_eq!(log.committed_offset(GROUP, TOPIC, 0), Some(1));
    }

    #[tokio::test]
    async fn test_crash_before_commit_persists_duplicate() {
        let log = MemoryLog::new(1);
        log.append(TOPIC, "abc", &event("abc", "twice", 0)).await.unwrap();
        let store = MemoryChatStore::new();

        // First consumer writes the row and dies before committing
        let mut crashed = log.subscribe(GROUP, TOPIC);
        let record = crashed.next_record().await.unwrap();
        assert!(matches!(
            process_record(&store, &record).await,
            ProcessResult::Persisted
        ));
        drop(crashed);

        let (token, _, handle) = start(&log, &store, CommitPolicy::BestEffort);
        wait_until(|| log.committed_offset(GROUP, TOPIC, 0) == Some(1)).await;
        token.cancel();
        handle.await.unwrap();

        let rows = store.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], rows[1]);
    }
}
