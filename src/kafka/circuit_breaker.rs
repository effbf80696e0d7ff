// ============================================================================
// Circuit Breaker for the chat log producer
// ============================================================================
//
// When the broker is down every append would wait for the full send timeout.
// The breaker counts consecutive failures and, past the threshold, rejects
// appends immediately until `reset_timeout` has passed. The first append
// after that is a probe: success closes the circuit, failure reopens it.
//
// States:
// - CLOSED: appends go through
// - OPEN: appends are rejected without touching the broker
// - HALF_OPEN: reset timeout elapsed, the next append probes the broker
//
// ============================================================================

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use quickchat_config::KafkaConfig;

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Upper bound on a single guarded call
    pub timeout: Duration,
    /// How long the circuit stays open before a probe is allowed
    pub reset_timeout: Duration,
}

impl CircuitBreakerConfig {
    pub fn from_kafka(config: &KafkaConfig) -> Self {
        Self {
            failure_threshold: config.producer_failure_threshold.max(1),
            // rdkafka enforces the send timeout itself; this only catches a
            // call that never returns
            timeout: Duration::from_millis(config.producer_send_timeout_ms)
                + Duration::from_secs(1),
            reset_timeout: Duration::from_secs(config.producer_reset_timeout_secs),
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(3),
            reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit open, {remaining:?} until the next probe")]
    Open { remaining: Duration },

    #[error("call exceeded {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Inner(#[source] E),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
enum Phase {
    Closed { failures: u32 },
    Open { since: Instant },
    /// A probe is in flight; other calls are rejected until it settles or
    /// outlives the call timeout
    Probing { since: Instant },
}

pub struct CircuitBreaker {
    phase: Mutex<Phase>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            phase: Mutex::new(Phase::Closed { failures: 0 }),
            config,
        }
    }

    /// Run `f` unless the circuit is open
    pub async fn call<F, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        self.admit()?;

        match tokio::time::timeout(self.config.timeout, f).await {
            Ok(Ok(value)) => {
                self.on_success();
                Ok(value)
            }
            Ok(Err(error)) => {
                self.on_failure();
                Err(CircuitBreakerError::Inner(error))
            }
            Err(_) => {
                self.on_failure();
                Err(CircuitBreakerError::Timeout(self.config.timeout))
            }
        }
    }

    pub fn state(&self) -> State {
        match &*self.lock() {
            Phase::Closed { .. } => State::Closed,
            Phase::Open { since } if since.elapsed() >= self.config.reset_timeout => {
                State::HalfOpen
            }
            Phase::Open { .. } => State::Open,
            Phase::Probing { .. } => State::HalfOpen,
        }
    }

    fn admit<E>(&self) -> Result<(), CircuitBreakerError<E>> {
        let mut phase = self.lock();
        match &*phase {
            Phase::Closed { .. } => Ok(()),
            Phase::Open { since } => {
                let elapsed = since.elapsed();
                if elapsed >= self.config.reset_timeout {
                    tracing::info!(
                        elapsed_seconds = elapsed.as_secs(),
                        "Kafka circuit half-open, probing broker"
                    );
                    *phase = Phase::Probing {
                        since: Instant::now(),
                    };
                    Ok(())
                } else {
                    Err(CircuitBreakerError::Open {
                        remaining: self.config.reset_timeout - elapsed,
                    })
                }
            }
            Phase::Probing { since } if since.elapsed() >= self.config.timeout => {
                *phase = Phase::Probing {
                    since: Instant::now(),
                };
                Ok(())
            }
            Phase::Probing { .. } => Err(CircuitBreakerError::Open {
                remaining: Duration::ZERO,
            }),
        }
    }

    fn on_success(&self) {
        let mut phase = self.lock();
        if matches!(*phase, Phase::Probing { .. } | Phase::Open { .. }) {
            tracing::info!("Kafka circuit CLOSED, broker recovered");
        }
        *phase = Phase::Closed { failures: 0 };
    }

    fn on_failure(&self) {
        let mut phase = self.lock();
        let failures = match &*phase {
            Phase::Closed { failures } => failures + 1,
            // A failed probe reopens immediately
            Phase::Probing { .. } | Phase::Open { .. } => self.config.failure_threshold,
        };

        if failures >= self.config.failure_threshold {
            if !matches!(*phase, Phase::Open { .. }) {
                tracing::error!(
                    failures = failures,
                    reset_timeout_seconds = self.config.reset_timeout.as_secs(),
                    "Kafka circuit OPENED, appends fail fast"
                );
            }
            *phase = Phase::Open {
                since: Instant::now(),
            };
        } else {
            tracing::warn!(
                failures = failures,
                threshold = self.config.failure_threshold,
                "Kafka append failure recorded"
            );
            *phase = Phase::Closed { failures };
        }
    }

    fn lock(&self) -> MutexGuard<'_, Phase> {
        self.phase
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32, reset: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            timeout: Duration::from_millis(100),
            reset_timeout: reset,
        })
    }

    async fn fail(cb: &CircuitBreaker) {
        let _ = cb.call(async { Err::<(), _>("broker down") }).await;
    }

    #[tokio::test]
    async fn test_success_keeps_circuit_closed() {
        let cb = breaker(2, Duration::from_secs(30));
        fail(&cb).await;
        assert_eq!(cb.call(async { Ok::<_, &str>(7) }).await.unwrap(), 7);

        // The earlier failure was forgotten
        fail(&cb).await;
        assert_eq!(cb.state(), State::Closed);
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_skips_calls() {
        let cb = breaker(3, Duration::from_secs(30));
        for _ in 0..3 {
            fail(&cb).await;
        }
        assert_eq!(cb.state(), State::Open);

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = cb
            .call(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await;

        assert!(matches!(result, Err(CircuitBreakerError::Open { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let cb = breaker(1, Duration::from_secs(30));
        let result = cb
            .call(async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok::<_, &str>(())
            })
            .await;

        assert!(matches!(result, Err(CircuitBreakerError::Timeout(_))));
        assert_eq!(cb.state(), State::Open);
    }

    #[tokio::test]
    async fn test_probe_success_closes_circuit() {
        let cb = breaker(1, Duration::from_millis(50));
        fail(&cb).await;
        assert_eq!(cb.state(), State::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cb.state(), State::HalfOpen);

        assert!(cb.call(async { Ok::<_, &str>(()) }).await.is_ok());
        assert_eq!(cb.state(), State::Closed);
    }

    #[tokio::test]
    async fn test_probe_failure_reopens_circuit() {
        let cb = breaker(2, Duration::from_millis(50));
        fail(&cb).await;
        fail(&cb).await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        fail(&cb).await;

        assert_eq!(cb.state(), State::Open);
    }
}
