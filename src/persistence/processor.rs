// ============================================================================
// Log record processing
// ============================================================================
//
// Turns one log record into one durable row. Parsing and writing are kept
// apart so the worker can tell a poison record (skip it) from a storage
// outage (policy decides).
//
// ============================================================================

use quickchat_db::PersistedMessage;
use quickchat_error::{AppError, AppResult};
use quickchat_types::ChatEvent;

use super::store::ChatStore;
use crate::event_log::LogRecord;

/// Outcome of processing one record
#[derive(Debug)]
pub enum ProcessResult {
    /// Row written
    Persisted,
    /// Record could not be parsed; never retried
    Skipped(AppError),
    /// Storage rejected the write
    Failed(AppError),
}

/// Decode a record's payload into the chat event it carries
pub fn parse_record(record: &LogRecord) -> AppResult<ChatEvent> {
    let payload = record
        .payload
        .as_deref()
        .ok_or_else(|| AppError::parse_failure("record has no payload"))?;

    ChatEvent::from_json_bytes(payload).map_err(|e| AppError::parse_failure(e.to_string()))
}

pub async fn process_record<S>(store: &S, record: &LogRecord) -> ProcessResult
where
    S: ChatStore + ?Sized,
{
    let event = match parse_record(record) {
        Ok(event) => event,
        Err(e) => return ProcessResult::Skipped(e),
    };

    match store.write(&PersistedMessage::from(&event)).await {
        Ok(()) => ProcessResult::Persisted,
        Err(e) => ProcessResult::Failed(e),
    }
}
