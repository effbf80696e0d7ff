// ============================================================================
// Persistence Consumer
// ============================================================================
//
// Library side of the `persistence-worker` binary:
// - store.rs     - ChatStore trait, PostgreSQL and in-memory sinks
// - processor.rs - one log record to one stored row
// - worker.rs    - poll / process / commit loop and commit policies
//
// ============================================================================

pub mod processor;
pub mod store;
pub mod worker;

pub use processor::{ProcessResult, process_record};
pub use store::{ChatStore, MemoryChatStore, PgChatStore};
pub use worker::{PersistenceWorker, WorkerState, WorkerStats, retry_delay};
