use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default window during which a token maps to a single outcome.
pub const DEFAULT_IDEMPOTENCY_WINDOW_HOURS: i64 = 24;

/// A client-supplied token that collapses repeated submissions into one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyKey {
    pub fn new(token: impl Into<String>, created_at: DateTime<Utc>, window: Duration) -> Self {
        Self {
            token: token.into(),
            created_at,
            expires_at: created_at + window,
        }
    }

    /// Generates a random token with the default 24h window.
    pub fn generate(now: DateTime<Utc>) -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            now,
            Duration::hours(DEFAULT_IDEMPOTENCY_WINDOW_HOURS),
        )
    }

    /// Valid strictly before `expires_at`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}
