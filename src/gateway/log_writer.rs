// ============================================================================
// Durable enqueue
// ============================================================================
//
// Sessions hand chat events to a bounded queue and move on; one task per
// gateway appends them to the durable log. Appends are started strictly in
// queue order (each append reaches the producer on its first poll, and
// `FuturesOrdered` polls new futures in push order), with up to
// `MAX_IN_FLIGHT` acks outstanding.
//
// A full or stopped queue is reported as BrokerUnavailable: the event was
// already broadcast and simply never reaches the log.
//
// ============================================================================

use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream::FuturesOrdered;
use quickchat_error::{AppError, AppResult};
use quickchat_types::ChatEvent;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::event_log::EventLog;
use crate::metrics;

const MAX_IN_FLIGHT: usize = 256;

pub struct LogWriter {
    queue: mpsc::Sender<ChatEvent>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LogWriter {
    pub fn spawn(log: Arc<dyn EventLog>, topic: String, capacity: usize) -> Self {
        let (queue, rx) = mpsc::channel(capacity.max(1));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run(log, topic, rx, shutdown.clone()));

        Self {
            queue,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    /// Queue `event` for the log without waiting
    pub fn enqueue(&self, event: ChatEvent) -> AppResult<()> {
        self.queue.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                AppError::broker_unavailable("durable log queue full")
            }
            mpsc::error::TrySendError::Closed(_) => {
                AppError::broker_unavailable("durable log writer stopped")
            }
        })
    }

    /// Stop accepting events, append what is queued, then close the log
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

async fn run(
    log: Arc<dyn EventLog>,
    topic: String,
    mut rx: mpsc::Receiver<ChatEvent>,
    shutdown: CancellationToken,
) {
    let mut in_flight = FuturesOrdered::new();
    let mut draining = false;

    loop {
        tokio::select! {
            biased;

            Some(result) = in_flight.next(), if !in_flight.is_empty() => {
                if let Err(e) = result {
                    report_failure(&e);
                }
            }

            _ = shutdown.cancelled(), if !draining => {
                draining = true;
                // Buffered events are still received after close()
                rx.close();
            }

            event = rx.recv(), if in_flight.len() < MAX_IN_FLIGHT => {
                let Some(event) = event else {
                    break;
                };
                let log = log.clone();
                let topic = topic.clone();
                in_flight.push_back(async move {
                    let value = event.to_json_bytes()?;
                    let ack = log.append(&topic, event.room_id.as_str(), &value).await?;
                    debug!(
                        room_id = %event.room_id,
                        partition = ack.partition,
                        offset = ack.offset,
                        "Chat event enqueued on durable log"
                    );
                    Ok::<_, AppError>(())
                });
            }
        }
    }

    while let Some(result) = in_flight.next().await {
        if let Err(e) = result {
            report_failure(&e);
        }
    }

    if let Err(e) = log.close().await {
        warn!(error = %e, "Failed to close durable log");
    }
    info!("Durable log writer stopped");
}

fn report_failure(error: &AppError) {
    metrics::LOG_ENQUEUE_FAILURES.inc();
    warn!(
        error = %error,
        error_code = error.error_code(),
        "Durable enqueue failed, event was broadcast only"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::MemoryLog;
    use chrono::Utc;
    use quickchat_types::RoomId;

    fn event(room: &str, body: &str) -> ChatEvent {
        ChatEvent {
            room_id: RoomId::parse(room).unwrap(),
            sender_name: "Alice".to_string(),
            body: Some(body.to_string()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_appends_in_enqueue_order_keyed_by_room() {
        let log = MemoryLog::new(4);
        let writer = LogWriter::spawn(Arc::new(log.clone()), "chats".to_string(), 64);

        for i in 0..10 {
            writer.enqueue(event("abc", &i.to_string())).unwrap();
        }
        writer.shutdown().await;

        let records = log.records("chats");
        assert_eq!(records.len(), 10);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.key.as_deref(), Some(&b"abc"[..]));
            let stored = ChatEvent::from_json_bytes(record.payload.as_deref().unwrap()).unwrap();
            assert_eq!(stored.body, Some(i.to_string()));
        }
    }

    #[tokio::test]
    async fn test_broker_failure_is_contained() {
        let log = MemoryLog::new(1);
        log.set_unavailable(true);
        let writer = LogWriter::spawn(Arc::new(log.clone()), "chats".to_string(), 8);

        writer.enqueue(event("abc", "lost")).unwrap();
        writer.shutdown().await;

        assert!(log.records("chats").is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_is_broker_unavailable() {
        let writer = LogWriter::spawn(Arc::new(MemoryLog::new(1)), "chats".to_string(), 8);
        writer.shutdown().await;

        let err = writer.enqueue(event("abc", "late")).unwrap_err();
        assert_eq!(err.error_code(), "BROKER_UNAVAILABLE");
    }
}
