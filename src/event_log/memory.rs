// ============================================================================
// In-process partitioned log
// ============================================================================
//
// Behaves like a single-broker Kafka topic: records are routed to a
// partition by hash(key), each consumer group keeps its own committed
// offsets, and a source subscribed after a "crash" restarts from the last
// committed offset, so uncommitted records are delivered again.
//
// ============================================================================

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use quickchat_error::{AppError, AppResult};
use tokio::sync::watch;

use super::{EventLog, LogAck, LogRecord, LogSource};

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Vec<u8>,
    payload: Vec<u8>,
}

#[derive(Default)]
struct LogState {
    /// topic -> partitions -> records
    topics: HashMap<String, Vec<Vec<StoredRecord>>>,
    /// (group, topic, partition) -> next offset to read
    committed: HashMap<(String, String, i32), i64>,
}

struct Inner {
    partitions: usize,
    state: Mutex<LogState>,
    appended: watch::Sender<u64>,
    unavailable: AtomicBool,
}

/// Shared handle to an in-process log
#[derive(Clone)]
pub struct MemoryLog {
    inner: Arc<Inner>,
}

impl MemoryLog {
    pub fn new(partitions: usize) -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                partitions: partitions.max(1),
                state: Mutex::new(LogState::default()),
                appended,
                unavailable: AtomicBool::new(false),
            }),
        }
    }

    /// Simulate a broker outage: appends fail with `BrokerUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn partition_for(&self, key: &str) -> i32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.inner.partitions as u64) as i32
    }

    /// Every record of `topic`, partition by partition
    pub fn records(&self, topic: &str) -> Vec<LogRecord> {
        let state = self.lock();
        let Some(partitions) = state.topics.get(topic) else {
            return Vec::new();
        };

        partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, records)| {
                records
                    .iter()
                    .enumerate()
                    .map(move |(offset, stored)| to_record(topic, partition as i32, offset as i64, stored))
            })
            .collect()
    }

    /// Next offset `group` will read on `partition`, if it ever committed
    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        self.lock()
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    /// Join `group` on `topic`, starting from its committed offsets or from
    /// the earliest record.
    pub fn subscribe(&self, group: &str, topic: &str) -> MemoryLogSource {
        let positions = {
            let state = self.lock();
            (0..self.inner.partitions as i32)
                .map(|partition| {
                    state
                        .committed
                        .get(&(group.to_string(), topic.to_string(), partition))
                        .copied()
                        .unwrap_or(0)
                })
                .collect()
        };

        MemoryLogSource {
            log: self.clone(),
            group: group.to_string(),
            topic: topic.to_string(),
            positions,
            appended: self.inner.appended.subscribe(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn to_record(topic: &str, partition: i32, offset: i64, stored: &StoredRecord) -> LogRecord {
    LogRecord {
        topic: topic.to_string(),
        partition,
        offset,
        key: Some(stored.key.clone()),
        payload: Some(stored.payload.clone()),
    }
}

#[async_trait::async_trait]
impl EventLog for MemoryLog {
    async fn append(&self, topic: &str, key: &str, value: &[u8]) -> AppResult<LogAck> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::broker_unavailable("memory log marked unavailable"));
        }

        let partition = self.partition_for(key);
        let offset = {
            let mut state = self.lock();
            let partitions = state
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| vec![Vec::new(); self.inner.partitions]);
            let records = &mut partitions[partition as usize];
            records.push(StoredRecord {
                key: key.as_bytes().to_vec(),
                payload: value.to_vec(),
            });
            records.len() as i64 - 1
        };

        self.inner.appended.send_modify(|count| *count += 1);
        Ok(LogAck { partition, offset })
    }

    async fn close(&self) -> AppResult<()> {
        Ok(())
    }
}

/// A consumer of one topic within one group
pub struct MemoryLogSource {
    log: MemoryLog,
    group: String,
    topic: String,
    positions: Vec<i64>,
    appended: watch::Receiver<u64>,
}

impl MemoryLogSource {
    fn poll_ready(&mut self) -> Option<LogRecord> {
        let state = self.log.lock();
        let partitions = state.topics.get(&self.topic)?;

        // Lowest partition with pending records first; each partition is
        // drained strictly in offset order.
        for (partition, records) in partitions.iter().enumerate() {
            let position = self.positions[partition];
            if let Some(stored) = records.get(position as usize) {
                self.positions[partition] = position + 1;
                return Some(to_record(&self.topic, partition as i32, position, stored));
            }
        }
        None
    }
}

#[async_trait::async_trait]
impl LogSource for MemoryLogSource {
    async fn next_record(&mut self) -> AppResult<LogRecord> {
        loop {
            self.appended.borrow_and_update();
            if let Some(record) = self.poll_ready() {
                return Ok(record);
            }
            // The sender lives inside `self.log`, so this never errors
            if self.appended.changed().await.is_err() {
                return Err(AppError::internal("memory log dropped"));
            }
        }
    }

    async fn commit(&mut self, record: &LogRecord) -> AppResult<()> {
        self.log.lock().committed.insert(
            (self.group.clone(), record.topic.clone(), record.partition),
            record.offset + 1,
        );
        Ok(())
    }

    async fn close(&mut self) -> AppResult<()> {
        Ok(())
    }
}
