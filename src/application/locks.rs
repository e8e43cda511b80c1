use crate::domain::authorization::AuthorizationId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per authorization id.
///
/// Operations on the same authorization queue behind each other, while
/// distinct authorizations never contend. The guard may be held across rail
/// calls.
#[derive(Default)]
pub struct LockTable {
    locks: Mutex<HashMap<AuthorizationId, Arc<AsyncMutex<()>>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, id: AuthorizationId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Forgets locks nobody holds or waits on.
    pub fn prune(&self) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .map(|locks| locks.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_id_is_serialized() {
        let table = Arc::new(LockTable::new());
        let id = AuthorizationId::new();

        let guard = table.lock(id).await;
        let waiter = {
            let table = table.clone();
            tokio::spawn(async move {
                let _guard = table.lock(id).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_distinct_ids_do_not_contend() {
        let table = LockTable::new();
        let _a = table.lock(AuthorizationId::new()).await;
        let _b = table.lock(AuthorizationId::new()).await;
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks() {
        let table = LockTable::new();
        let held = table.lock(AuthorizationId::new()).await;
        drop(table.lock(AuthorizationId::new()).await);
        table.prune();
        assert_eq!(table.len(), 1);
        drop(held);
        table.prune();
        assert!(table.is_empty());
    }
}
