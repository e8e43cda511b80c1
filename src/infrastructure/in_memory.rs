use crate::domain::authorization::{Authorization, AuthorizationId};
use crate::domain::ports::AuthorizationStore;
use crate::error::{RailError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    by_id: HashMap<AuthorizationId, Authorization>,
    by_token: HashMap<String, AuthorizationId>,
}

/// A thread-safe in-memory store for authorizations.
///
/// Both maps live behind one `RwLock`, so the id table and the idempotency
/// index can never disagree. Ideal for tests and the sandbox CLI.
#[derive(Default, Clone)]
pub struct InMemoryAuthorizationStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryAuthorizationStore {
    /// Creates a new, empty in-memory authorization store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuthorizationStore for InMemoryAuthorizationStore {
    async fn insert_if_absent(&self, authorization: Authorization) -> Result<bool> {
        let mut tables = self.tables.write().await;
        if tables.by_id.contains_key(&authorization.id) {
            return Ok(false);
        }

        let token = authorization.idempotency_key.token.clone();
        let claimed = tables
            .by_token
            .get(&token)
            .and_then(|id| tables.by_id.get(id))
            .is_some_and(|existing| {
                existing
                    .idempotency_key
                    .is_valid_at(authorization.created_at)
            });
        if claimed {
            return Ok(false);
        }

        tables.by_token.insert(token, authorization.id);
        tables.by_id.insert(authorization.id, authorization);
        Ok(true)
    }

    async fn get(&self, id: AuthorizationId) -> Result<Option<Authorization>> {
        let tables = self.tables.read().await;
        Ok(tables.by_id.get(&id).cloned())
    }

    async fn update(&self, authorization: Authorization) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.by_id.get_mut(&authorization.id) {
            Some(slot) => {
                *slot = authorization;
                Ok(())
            }
            None => Err(RailError::PaymentNotFound(authorization.id.to_string())),
        }
    }

    async fn find_by_idempotency_token(&self, token: &str) -> Result<Option<Authorization>> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_token
            .get(token)
            .and_then(|id| tables.by_id.get(id))
            .cloned())
    }

    async fn list_non_terminal(&self) -> Result<Vec<Authorization>> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_id
            .values()
            .filter(|a| !a.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn get_all(&self) -> Result<Vec<Authorization>> {
        let tables = self.tables.read().await;
        let mut all: Vec<_> = tables.by_id.values().cloned().collect();
        all.sort_by_key(|a| a.created_at);
        Ok(all)
    }

    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut tables = self.tables.write().await;
        let stale: Vec<AuthorizationId> = tables
            .by_id
            .values()
            .filter(|a| a.status.is_terminal() && !a.idempotency_key.is_valid_at(now))
            .map(|a| a.id)
            .collect();

        for id in &stale {
            if let Some(auth) = tables.by_id.remove(id)
                && tables.by_token.get(&auth.idempotency_key.token) == Some(id)
            {
                tables.by_token.remove(&auth.idempotency_key.token);
            }
        }
        Ok(stale.len())
    }
}
