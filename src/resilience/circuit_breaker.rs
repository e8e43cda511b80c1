use super::CircuitState;
use crate::config::CircuitBreakerConfig;
use crate::domain::payment::RailType;
use crate::observability::{ObserverRef, RailEvent};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Count-based circuit breaker shared by every caller of one rail.
///
/// The lock is only ever held for bookkeeping, never across an `.await`.
pub struct CircuitBreaker {
    rail: RailType,
    config: CircuitBreakerConfig,
    observer: ObserverRef,
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    /// `true` marks a failed or slow call.
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    half_open_issued: usize,
    /// Bumped on every transition so outcomes of calls admitted under an
    /// earlier state are not counted against the new one.
    generation: u64,
}

/// Admission ticket for one call. Hand it back through
/// [`CircuitBreaker::record`] or [`CircuitBreaker::abandon`].
///
/// A permit dropped without either, because the caller gave up on the
/// call, returns its half-open trial slot.
#[derive(Debug)]
pub struct CallPermit {
    generation: u64,
    settled: bool,
    inner: Arc<Mutex<Inner>>,
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.settled
            && let Ok(mut inner) = self.inner.lock()
        {
            inner.return_trial(self.generation);
        }
    }
}

impl Inner {
    fn return_trial(&mut self, generation: u64) {
        if generation == self.generation && self.state == CircuitState::HalfOpen {
            self.half_open_issued = self.half_open_issued.saturating_sub(1);
        }
    }
}

impl CircuitBreaker {
    pub fn new(rail: RailType, config: CircuitBreakerConfig, observer: ObserverRef) -> Self {
        let capacity = config.sliding_window_size.max(1);
        Self {
            rail,
            config,
            observer,
            inner: Arc::new(Mutex::new(Inner {
                state: CircuitState::Closed,
                window: VecDeque::with_capacity(capacity),
                opened_at: None,
                half_open_issued: 0,
                generation: 0,
            })),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner
            .lock()
            .map(|inner| inner.state)
            .unwrap_or(CircuitState::Open)
    }

    /// Admits a call, or returns `None` when the circuit rejects it.
    pub fn try_acquire(&self) -> Option<CallPermit> {
        let (permit, transition) = {
            let Ok(mut inner) = self.inner.lock() else {
                return None;
            };
            let mut transition = None;

            if inner.state == CircuitState::Open {
                let cooled_down = inner
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.config.wait_duration_in_open_state());
                if cooled_down {
                    transition = Some(self.move_to(&mut inner, CircuitState::HalfOpen));
                }
            }

            let permit = match inner.state {
                CircuitState::Closed => Some(self.permit(inner.generation)),
                CircuitState::HalfOpen
                    if inner.half_open_issued < self.config.permitted_calls_in_half_open_state =>
                {
                    inner.half_open_issued += 1;
                    Some(self.permit(inner.generation))
                }
                _ => None,
            };
            (permit, transition)
        };

        self.emit(transition);
        permit
    }

    /// Records the outcome of an admitted call.
    pub fn record(&self, mut permit: CallPermit, failed: bool, elapsed: Duration) {
        permit.settled = true;
        let bad = failed || elapsed > self.config.slow_call_duration_threshold();
        let transition = {
            let Ok(mut inner) = self.inner.lock() else {
                return;
            };
            if permit.generation != inner.generation {
                return;
            }
            match inner.state {
                CircuitState::Closed => {
                    self.push(&mut inner, bad);
                    if inner.window.len() >= self.config.minimum_number_of_calls.max(1)
                        && self.failure_rate(&inner) >= self.config.failure_rate_threshold
                    {
                        Some(self.move_to(&mut inner, CircuitState::Open))
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    self.push(&mut inner, bad);
                    if inner.window.len() >= self.config.permitted_calls_in_half_open_state.max(1) {
                        let next = if self.failure_rate(&inner) >= self.config.failure_rate_threshold
                        {
                            CircuitState::Open
                        } else {
                            CircuitState::Closed
                        };
                        Some(self.move_to(&mut inner, next))
                    } else {
                        None
                    }
                }
                CircuitState::Open => None,
            }
        };
        self.emit(transition);
    }

    /// Returns a permit whose call never reached the rail.
    pub fn abandon(&self, permit: CallPermit) {
        drop(permit);
    }

    fn permit(&self, generation: u64) -> CallPermit {
        CallPermit {
            generation,
            settled: false,
            inner: self.inner.clone(),
        }
    }

    fn push(&self, inner: &mut Inner, bad: bool) {
        inner.window.push_back(bad);
        while inner.window.len() > self.config.sliding_window_size.max(1) {
            inner.window.pop_front();
        }
    }

    fn failure_rate(&self, inner: &Inner) -> f64 {
        if inner.window.is_empty() {
            return 0.0;
        }
        let bad = inner.window.iter().filter(|b| **b).count();
        bad as f64 * 100.0 / inner.window.len() as f64
    }

    fn move_to(&self, inner: &mut Inner, next: CircuitState) -> (CircuitState, CircuitState) {
        let from = inner.state;
        inner.state = next;
        inner.generation += 1;
        inner.window.clear();
        inner.half_open_issued = 0;
        inner.opened_at = (next == CircuitState::Open).then(Instant::now);
        (from, next)
    }

    fn emit(&self, transition: Option<(CircuitState, CircuitState)>) {
        if let Some((from, to)) = transition {
            self.observer.on_event(&RailEvent::CircuitTransition {
                rail: self.rail,
                from,
                to,
            });
        }
    }
}
