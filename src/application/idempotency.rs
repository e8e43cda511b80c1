use crate::error::{ErrorKind, RailError, Result};
use chrono::{DateTime, Duration, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use tracing::debug;

type SharedOutcome<T> = Shared<BoxFuture<'static, Result<T>>>;

struct Entry<T: Clone> {
    seq: u64,
    expires_at: DateTime<Utc>,
    outcome: SharedOutcome<T>,
}

struct Entries<T: Clone> {
    next_seq: u64,
    by_token: HashMap<String, Entry<T>>,
}

/// Collapses submissions that share an idempotency token into one execution.
///
/// The first submission spawns its operation, so it runs to completion even
/// if that caller goes away. Concurrent and later submissions with the same
/// live token await the same outcome. Try-again-later and storage failures
/// are not definitive, so they are dropped once resolved and the next
/// submission runs the operation again.
pub struct IdempotencyGuard<T: Clone> {
    entries: Mutex<Entries<T>>,
    window: Duration,
}

impl<T> IdempotencyGuard<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(window: Duration) -> Self {
        Self {
            entries: Mutex::new(Entries {
                next_seq: 0,
                by_token: HashMap::new(),
            }),
            window,
        }
    }

    pub async fn submit<F>(&self, token: &str, now: DateTime<Utc>, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (seq, outcome) = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let live = entries
                .by_token
                .get(token)
                .filter(|entry| now < entry.expires_at)
                .map(|entry| (entry.seq, entry.outcome.clone()));
            match live {
                Some(joined) => {
                    debug!(token, "Joining existing submission");
                    joined
                }
                None => {
                    let handle = tokio::spawn(operation);
                    let outcome = async move {
                        handle
                            .await
                            .unwrap_or_else(|e| Err(RailError::operation_failed(e.into())))
                    }
                    .boxed()
                    .shared();

                    entries.next_seq += 1;
                    let seq = entries.next_seq;
                    entries.by_token.insert(
                        token.to_string(),
                        Entry {
                            seq,
                            expires_at: now + self.window,
                            outcome: outcome.clone(),
                        },
                    );
                    (seq, outcome)
                }
            }
        };

        let result = outcome.await;
        if let Err(err) = &result
            && (err.is_retry_later() || err.kind() == ErrorKind::Storage)
        {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            if entries.by_token.get(token).is_some_and(|e| e.seq == seq) {
                entries.by_token.remove(token);
            }
        }
        result
    }

    /// Evicts entries whose window has elapsed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.by_token.len();
        entries.by_token.retain(|_, entry| now < entry.expires_at);
        before - entries.by_token.len()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .map(|entries| entries.by_token.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
