// ============================================================================
// Durable Event Log
// ============================================================================
//
// The seam between the gateway, the broker and the persistence worker.
// Producers see `EventLog`, the persistence worker sees `LogSource`; Kafka
// and the in-process `MemoryLog` implement both sides.
//
// Ordering is guaranteed within a partition only. Callers key every append
// by room id so one room always lands on one partition.
//
// ============================================================================

pub mod memory;

pub use memory::{MemoryLog, MemoryLogSource};

use quickchat_error::AppResult;

/// Broker acknowledgement of an append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogAck {
    pub partition: i32,
    pub offset: i64,
}

impl LogAck {
    /// Ack returned by a log that is switched off
    pub const DISABLED: LogAck = LogAck {
        partition: -1,
        offset: -1,
    };
}

/// One record read back from the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
}

/// Producer side of the durable log
#[async_trait::async_trait]
pub trait EventLog: Send + Sync {
    /// Append `value` under `key`. Fails with `BrokerUnavailable`.
    async fn append(&self, topic: &str, key: &str, value: &[u8]) -> AppResult<LogAck>;

    /// Flush in-flight appends and release the connection
    async fn close(&self) -> AppResult<()>;
}

/// Consumer side of the durable log, bound to one consumer group
#[async_trait::async_trait]
pub trait LogSource: Send {
    /// Wait for the next record
    async fn next_record(&mut self) -> AppResult<LogRecord>;

    /// Mark `record` and everything before it on its partition as consumed
    async fn commit(&mut self, record: &LogRecord) -> AppResult<()>;

    /// Leave the consumer group
    async fn close(&mut self) -> AppResult<()>;
}
