use crate::domain::ports::Clock;
use crate::observability::ObserverRef;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Process-wide collaborators handed to components at construction, in
/// place of global registries.
#[derive(Clone)]
pub struct RailContext {
    pub clock: Arc<dyn Clock>,
    pub observer: ObserverRef,
}

impl RailContext {
    pub fn new(clock: Arc<dyn Clock>, observer: ObserverRef) -> Self {
        Self { clock, observer }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
