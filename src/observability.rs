//! Events emitted by the resilience envelope and the authorization service.
//!
//! Components receive an [`Observer`] at construction instead of reaching
//! for a global registry. The default [`TracingObserver`] turns events into
//! structured `tracing` records; metrics backends can implement the trait
//! themselves.

use crate::domain::authorization::{AuthorizationId, AuthorizationStatus};
use crate::domain::payment::RailType;
use crate::error::{ErrorKind, UnavailableReason};
use crate::resilience::CircuitState;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum RailEvent {
    OperationSucceeded {
        rail: RailType,
        operation: &'static str,
        elapsed: Duration,
    },
    OperationFailed {
        rail: RailType,
        operation: &'static str,
        kind: ErrorKind,
        elapsed: Duration,
    },
    RetryScheduled {
        rail: RailType,
        operation: &'static str,
        attempt: u32,
        delay: Duration,
    },
    Rejected {
        rail: RailType,
        operation: &'static str,
        reason: UnavailableReason,
    },
    Fallback {
        rail: RailType,
        operation: &'static str,
        reason: UnavailableReason,
    },
    CircuitTransition {
        rail: RailType,
        from: CircuitState,
        to: CircuitState,
    },
    AuthorizationTransition {
        authorization_id: AuthorizationId,
        from: AuthorizationStatus,
        to: AuthorizationStatus,
    },
}

pub trait Observer: Send + Sync {
    fn on_event(&self, event: &RailEvent);
}

pub type ObserverRef = Arc<dyn Observer>;

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_event(&self, event: &RailEvent) {
        match event {
            RailEvent::OperationSucceeded {
                rail,
                operation,
                elapsed,
            } => debug!(%rail, operation, elapsed_ms = elapsed.as_millis() as u64, "Rail operation succeeded"),
            RailEvent::OperationFailed {
                rail,
                operation,
                kind,
                elapsed,
            } => warn!(%rail, operation, %kind, elapsed_ms = elapsed.as_millis() as u64, "Rail operation failed"),
            RailEvent::RetryScheduled {
                rail,
                operation,
                attempt,
                delay,
            } => debug!(%rail, operation, attempt, delay_ms = delay.as_millis() as u64, "Retrying rail operation"),
            RailEvent::Rejected {
                rail,
                operation,
                reason,
            } => warn!(%rail, operation, %reason, "Rail call rejected"),
            RailEvent::Fallback {
                rail,
                operation,
                reason,
            } => warn!(%rail, operation, %reason, "Fallback triggered"),
            RailEvent::CircuitTransition { rail, from, to } => {
                info!(%rail, from = ?from, to = ?to, "Circuit breaker transition")
            }
            RailEvent::AuthorizationTransition {
                authorization_id,
                from,
                to,
            } => info!(authorization_id = %authorization_id, %from, %to, "Authorization transition"),
        }
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {
    fn on_event(&self, _event: &RailEvent) {}
}

/// Keeps every event in memory, mostly for assertions in tests.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: std::sync::Mutex<Vec<RailEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RailEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl Observer for RecordingObserver {
    fn on_event(&self, event: &RailEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
