//! Resilience envelope applied to every rail call.
//!
//! Layers, outermost first:
//!
//! ```text
//! circuit breaker → rate limiter → retry(backoff) → bulkhead → timeout → rail
//! ```
//!
//! One [`ResilienceEnvelope`] is built per rail collaborator and shared by
//! every authorization that targets it, so the circuit window and the
//! bulkhead permits are rail-wide.

mod bulkhead;
mod circuit_breaker;
pub mod mapper;
mod rate_limiter;
mod retry;

pub use bulkhead::{Bulkhead, CapacityExceeded};
pub use circuit_breaker::{CallPermit, CircuitBreaker};
pub use rate_limiter::{RateLimiter, Throttled};
pub use retry::RetryPolicy;

use crate::config::ResilienceConfig;
use crate::domain::payment::RailType;
use crate::error::{RailError, Result, UnavailableReason};
use crate::observability::{ObserverRef, RailEvent};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

pub struct ResilienceEnvelope {
    rail: RailType,
    circuit_breaker: CircuitBreaker,
    rate_limiter: RateLimiter,
    retry: RetryPolicy,
    bulkhead: Bulkhead,
    timeout: Duration,
    observer: ObserverRef,
}

impl ResilienceEnvelope {
    pub fn new(rail: RailType, config: &ResilienceConfig, observer: ObserverRef) -> Self {
        Self {
            rail,
            circuit_breaker: CircuitBreaker::new(
                rail,
                config.circuit_breaker.clone(),
                observer.clone(),
            ),
            rate_limiter: RateLimiter::new(config.rate_limiter.clone()),
            retry: RetryPolicy::new(config.retry.clone()),
            bulkhead: Bulkhead::new(config.bulkhead.clone()),
            timeout: config.timeout.duration(),
            observer,
        }
    }

    pub fn rail(&self) -> RailType {
        self.rail
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    /// Runs `operation` inside every layer.
    ///
    /// The closure receives the 1-based attempt number. Non-idempotent
    /// operations use it to check the rail for an earlier effect before
    /// repeating themselves.
    pub async fn call<T, F, Fut>(&self, operation: &'static str, mut f: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let Some(permit) = self.circuit_breaker.try_acquire() else {
            return Err(self.reject(operation, UnavailableReason::CircuitOpen, None, true));
        };

        if self.rate_limiter.acquire().await.is_err() {
            self.circuit_breaker.abandon(permit);
            return Err(self.reject(operation, UnavailableReason::Throttled, None, false));
        }

        // The breaker judges slowness by the final attempt alone.
        let started = Instant::now();
        let mut attempt = 1;
        let (outcome, last_attempt) = loop {
            let attempt_started = Instant::now();
            let result = self.attempt(f(attempt)).await;
            let took = attempt_started.elapsed();
            match result {
                Ok(value) => break (Ok(value), took),
                Err(err) => match self.retry.next_delay(&err, attempt) {
                    Some(delay) => {
                        self.observer.on_event(&RailEvent::RetryScheduled {
                            rail: self.rail,
                            operation,
                            attempt,
                            delay,
                        });
                        sleep(delay).await;
                        attempt += 1;
                    }
                    None => break (Err(err), took),
                },
            }
        };
        let elapsed = started.elapsed();

        match outcome {
            Ok(value) => {
                self.circuit_breaker.record(permit, false, last_attempt);
                self.observer.on_event(&RailEvent::OperationSucceeded {
                    rail: self.rail,
                    operation,
                    elapsed,
                });
                Ok(value)
            }
            Err(err) if err.is_retry_later() => {
                // The bulkhead turned the call away; the rail never saw it.
                self.circuit_breaker.abandon(permit);
                let reason = err
                    .unavailable_reason()
                    .unwrap_or(UnavailableReason::CapacityExceeded);
                self.observer.on_event(&RailEvent::Rejected {
                    rail: self.rail,
                    operation,
                    reason,
                });
                Err(err)
            }
            Err(err) => {
                self.circuit_breaker
                    .record(permit, err.is_rail_fault(), last_attempt);
                self.observer.on_event(&RailEvent::OperationFailed {
                    rail: self.rail,
                    operation,
                    kind: err.kind(),
                    elapsed,
                });
                if err.is_transient() {
                    Err(self.reject(
                        operation,
                        UnavailableReason::RetriesExhausted,
                        Some(err),
                        true,
                    ))
                } else {
                    Err(err)
                }
            }
        }
    }

    /// One attempt: bulkhead admission, then the call under a hard deadline.
    /// Dropping the future on expiry cancels the in-flight call.
    async fn attempt<T, Fut>(&self, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let _permit = self.bulkhead.acquire().await.map_err(|_| RailError::Unavailable {
            rail: self.rail,
            reason: UnavailableReason::CapacityExceeded,
            cause: None,
        })?;

        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(mapper::map_error(err)),
            Err(_) => Err(RailError::RailCommunication(format!(
                "{} call timed out after {} ms",
                self.rail,
                self.timeout.as_millis()
            ))),
        }
    }

    fn reject(
        &self,
        operation: &'static str,
        reason: UnavailableReason,
        cause: Option<RailError>,
        fallback: bool,
    ) -> RailError {
        let event = if fallback {
            RailEvent::Fallback {
                rail: self.rail,
                operation,
                reason,
            }
        } else {
            RailEvent::Rejected {
                rail: self.rail,
                operation,
                reason,
            }
        };
        self.observer.on_event(&event);
        RailError::Unavailable {
            rail: self.rail,
            reason,
            cause: cause.map(Box::new),
        }
    }
}
