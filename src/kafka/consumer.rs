use quickchat_config::KafkaConfig;
use quickchat_error::AppResult;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::{Message, Offset, TopicPartitionList};
use tracing::{debug, info};

use super::config::consumer_config;
use super::metrics;
use crate::event_log::{LogRecord, LogSource};

/// Kafka consumer for the persistence worker
///
/// This consumer is configured for:
/// - Manual offset commits (the worker decides when a record is done)
/// - Consumer group coordination, so one partition is read by one worker
/// - Earliest offset on first start, so a fresh group backfills the backlog
pub struct KafkaLogSource {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaLogSource {
    pub fn new(config: &KafkaConfig) -> AppResult<Self> {
        info!(
            brokers = %config.brokers,
            topic = %config.topic,
            consumer_group = %config.consumer_group,
            "Initializing Kafka consumer"
        );

        let consumer: StreamConsumer = consumer_config(config)?.create()?;
        consumer.subscribe(&[config.topic.as_str()])?;

        info!(topic = %config.topic, "Kafka consumer subscribed");

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
        })
    }
}

#[async_trait::async_trait]
impl LogSource for KafkaLogSource {
    async fn next_record(&mut self) -> AppResult<LogRecord> {
        match self.consumer.recv().await {
            Ok(message) => {
                metrics::KAFKA_CONSUME_SUCCESS.inc();
                Ok(LogRecord {
                    topic: message.topic().to_string(),
                    partition: message.partition(),
                    offset: message.offset(),
                    key: message.key().map(<[u8]>::to_vec),
                    payload: message.payload().map(<[u8]>::to_vec),
                })
            }
            Err(e) => {
                metrics::KAFKA_CONSUME_FAILURE.inc();
                Err(e.into())
            }
        }
    }

    /// Commits `offset + 1` for the record's partition: the committed
    /// offset is the next one the group will read.
    async fn commit(&mut self, record: &LogRecord) -> AppResult<()> {
        let mut offsets = TopicPartitionList::new();
        offsets.add_partition_offset(
            &record.topic,
            record.partition,
            Offset::Offset(record.offset + 1),
        )?;

        if let Err(e) = self.consumer.commit(&offsets, CommitMode::Async) {
            metrics::KAFKA_COMMIT_FAILURE.inc();
            return Err(e.into());
        }

        debug!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            "Kafka offset committed"
        );
        Ok(())
    }

    async fn close(&mut self) -> AppResult<()> {
        self.consumer.unsubscribe();
        info!(topic = %self.topic, "Kafka consumer left the group");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::EventLog;
    use crate::kafka::KafkaEventLog;
    use std::time::Duration;

    // Requires a broker: docker run -d -p 9092:9092 apache/kafka:3.7.0
    #[tokio::test]
    #[ignore]
    async fn test_consume_from_earliest_and_commit() {
        let config = KafkaConfig {
            enabled: true,
            topic: format!("chats-test-{}", uuid::Uuid::new_v4()),
            consumer_group: format!("chats-test-group-{}", uuid::Uuid::new_v4()),
            ..KafkaConfig::disabled()
        };

        let log = KafkaEventLog::new(&config).unwrap();
        log.append(&config.topic, "abc", b"{\"n\":1}").await.unwrap();

        let mut source = KafkaLogSource::new(&config).unwrap();
        let record = tokio::time::timeout(Duration::from_secs(30), source.next_record())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(record.key.as_deref(), Some(&b"abc"[..]));
        source.commit(&record).await.unwrap();
        source.close().await.unwrap();
    }
}
