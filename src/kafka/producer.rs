use std::sync::Arc;
use std::time::{Duration, Instant};

use quickchat_config::KafkaConfig;
use quickchat_error::{AppError, AppResult};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tracing::{debug, info, warn};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, State};
use super::config::producer_config;
use super::metrics;
use crate::event_log::{EventLog, LogAck};
use crate::ops::StatusReport;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Kafka-backed durable chat log
///
/// Appends are keyed by the caller (the gateway uses the room id) and wait
/// for the broker ack, bounded by `producer_send_timeout_ms`. Repeated
/// failures open a circuit breaker so a dead broker costs nothing per event.
/// With `KAFKA_ENABLED=false` no producer is created and every append is
/// acknowledged as `LogAck::DISABLED`.
#[derive(Clone)]
pub struct KafkaEventLog {
    producer: Option<Arc<FutureProducer>>,
    breaker: Arc<CircuitBreaker>,
    send_timeout: Duration,
}

impl KafkaEventLog {
    pub fn new(config: &KafkaConfig) -> AppResult<Self> {
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::from_kafka(config)));
        let send_timeout = Duration::from_millis(config.producer_send_timeout_ms);

        if !config.enabled {
            info!("Kafka producer disabled (KAFKA_ENABLED=false), chat events are broadcast-only");
            return Ok(Self {
                producer: None,
                breaker,
                send_timeout,
            });
        }

        info!(brokers = %config.brokers, topic = %config.topic, "Initializing Kafka producer...");
        let producer: FutureProducer = producer_config(config)?.create()?;
        info!(topic = %config.topic, "Kafka producer initialized");

        Ok(Self {
            producer: Some(Arc::new(producer)),
            breaker,
            send_timeout,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.producer.is_some()
    }

    pub fn circuit_state(&self) -> State {
        self.breaker.state()
    }
}

#[async_trait::async_trait]
impl EventLog for KafkaEventLog {
    async fn append(&self, topic: &str, key: &str, value: &[u8]) -> AppResult<LogAck> {
        let Some(producer) = &self.producer else {
            return Ok(LogAck::DISABLED);
        };

        let start = Instant::now();
        let send = async {
            let record = FutureRecord::to(topic).key(key).payload(value);
            producer
                .send(record, Timeout::After(self.send_timeout))
                .await
                .map_err(|(kafka_err, _)| kafka_err)
        };

        match self.breaker.call(send).await {
            Ok((partition, offset)) => {
                let latency = start.elapsed();
                metrics::KAFKA_PRODUCE_SUCCESS.inc();
                metrics::KAFKA_PRODUCE_LATENCY.observe(latency.as_secs_f64());
                debug!(
                    topic = %topic,
                    partition = partition,
                    offset = offset,
                    latency_ms = latency.as_millis() as u64,
                    "Chat event appended to Kafka"
                );
                Ok(LogAck { partition, offset })
            }
            Err(e) => {
                metrics::KAFKA_PRODUCE_FAILURE.inc();
                let reason = match &e {
                    CircuitBreakerError::Open { .. } => "circuit open",
                    CircuitBreakerError::Timeout(_) => "timeout",
                    CircuitBreakerError::Inner(_) => "broker error",
                };
                warn!(
                    error = %e,
                    reason = reason,
                    topic = %topic,
                    latency_ms = start.elapsed().as_millis() as u64,
                    "Failed to append chat event to Kafka"
                );
                Err(AppError::broker_unavailable(e.to_string()))
            }
        }
    }

    async fn close(&self) -> AppResult<()> {
        let Some(producer) = self.producer.clone() else {
            return Ok(());
        };

        info!(timeout_secs = FLUSH_TIMEOUT.as_secs(), "Flushing Kafka producer...");
        // flush blocks the calling thread until in-flight appends settle
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(FLUSH_TIMEOUT)))
            .await
            .map_err(|e| AppError::internal(format!("flush task failed: {e}")))??;
        info!("Kafka producer flushed");
        Ok(())
    }
}

/// Informational only: a broker outage leaves live chat serving, so the
/// gateway stays ready while the circuit is open
impl StatusReport for KafkaEventLog {
    fn name(&self) -> &'static str {
        "kafka"
    }

    fn status(&self) -> &'static str {
        if !self.is_enabled() {
            return "disabled";
        }
        match self.breaker.state() {
            State::Closed => "ok",
            State::HalfOpen => "half_open",
            State::Open => "circuit_open",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_log_has_no_producer() {
        let log = KafkaEventLog::new(&KafkaConfig::disabled()).unwrap();
        assert!(!log.is_enabled());
        assert_eq!(log.circuit_state(), State::Closed);
    }

    #[tokio::test]
    async fn test_disabled_log_acks_without_broker() {
        let log = KafkaEventLog::new(&KafkaConfig::disabled()).unwrap();

        let ack = log.append("chats", "abc", b"{}").await.unwrap();
        assert_eq!(ack, LogAck::DISABLED);
        assert!(log.close().await.is_ok());
        assert_eq!(log.status(), "disabled");
    }

    #[tokio::test]
    async fn test_status_reports_open_circuit() {
        let config = KafkaConfig {
            producer_failure_threshold: 2,
            ..KafkaConfig::disabled()
        };
        let mut log = KafkaEventLog::new(&config).unwrap();
        // Stand-in producer so the status reflects the breaker; never sent to
        log.producer = Some(Arc::new(
            rdkafka::ClientConfig::new()
                .set("bootstrap.servers", "127.0.0.1:1")
                .create()
                .unwrap(),
        ));
        assert_eq!(log.status(), "ok");

        for _ in 0..2 {
            let _ = log
                .breaker
                .call(async { Err::<(), _>(AppError::broker_unavailable("down")) })
                .await;
        }
        assert_eq!(log.circuit_state(), State::Open);
        assert_eq!(log.status(), "circuit_open");
    }

    // Requires a broker: docker run -d -p 9092:9092 apache/kafka:3.7.0
    #[tokio::test]
    #[ignore]
    async fn test_append_to_local_broker() {
        let config = KafkaConfig {
            enabled: true,
            ..KafkaConfig::disabled()
        };
        let log = KafkaEventLog::new(&config).unwrap();

        let first = log.append("chats-test", "abc", b"{\"n\":1}").await.unwrap();
        let second = log.append("chats-test", "abc", b"{\"n\":2}").await.unwrap();

        assert_eq!(first.partition, second.partition);
        assert!(second.offset > first.offset);
        log.close().await.unwrap();
    }
}
