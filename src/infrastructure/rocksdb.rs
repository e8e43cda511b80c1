use crate::domain::authorization::{Authorization, AuthorizationId};
use crate::domain::ports::AuthorizationStore;
use crate::error::{RailError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for authorization records, keyed by authorization id.
pub const CF_AUTHORIZATIONS: &str = "authorizations";
/// Column Family mapping idempotency tokens to authorization ids.
pub const CF_IDEMPOTENCY: &str = "idempotency";

impl From<rocksdb::Error> for RailError {
    fn from(err: rocksdb::Error) -> Self {
        RailError::Storage(err.to_string())
    }
}

/// A persistent authorization store using RocksDB.
///
/// Records and the idempotency index live in separate Column Families and
/// are written together in one `WriteBatch`. RocksDB has no compare-and-swap,
/// so writers serialize on an async mutex to keep `insert_if_absent` atomic.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the required column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_authorizations = ColumnFamilyDescriptor::new(CF_AUTHORIZATIONS, Options::default());
        let cf_idempotency = ColumnFamilyDescriptor::new(CF_IDEMPOTENCY, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_authorizations, cf_idempotency])?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| RailError::Storage(format!("{} column family not found", name)))
    }

    fn read(&self, id: &AuthorizationId) -> Result<Option<Authorization>> {
        let cf = self.cf(CF_AUTHORIZATIONS)?;
        match self.db.get_pinned_cf(cf, id.to_string())? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    fn read_token(&self, token: &str) -> Result<Option<AuthorizationId>> {
        let cf = self.cf(CF_IDEMPOTENCY)?;
        match self.db.get_pinned_cf(cf, token)? {
            Some(bytes) => {
                let raw = std::str::from_utf8(&bytes)
                    .map_err(|e| RailError::Storage(format!("Corrupt index entry: {}", e)))?;
                raw.parse().map(Some)
            }
            None => Ok(None),
        }
    }
}

fn encode(authorization: &Authorization) -> Result<Vec<u8>> {
    serde_json::to_vec(authorization)
        .map_err(|e| RailError::Storage(format!("Serialization error: {}", e)))
}

fn decode(bytes: &[u8]) -> Result<Authorization> {
    serde_json::from_slice(bytes)
        .map_err(|e| RailError::Storage(format!("Deserialization error: {}", e)))
}

#[async_trait]
impl AuthorizationStore for RocksDBStore {
    async fn insert_if_absent(&self, authorization: Authorization) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        if self.read(&authorization.id)?.is_some() {
            return Ok(false);
        }
        let token = &authorization.idempotency_key.token;
        if let Some(existing_id) = self.read_token(token)?
            && let Some(existing) = self.read(&existing_id)?
            && existing
                .idempotency_key
                .is_valid_at(authorization.created_at)
        {
            return Ok(false);
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_AUTHORIZATIONS)?,
            authorization.id.to_string(),
            encode(&authorization)?,
        );
        batch.put_cf(
            self.cf(CF_IDEMPOTENCY)?,
            token,
            authorization.id.to_string(),
        );
        self.db.write(batch)?;
        Ok(true)
    }

    async fn get(&self, id: AuthorizationId) -> Result<Option<Authorization>> {
        self.read(&id)
    }

    async fn update(&self, authorization: Authorization) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.read(&authorization.id)?.is_none() {
            return Err(RailError::PaymentNotFound(authorization.id.to_string()));
        }
        let cf = self.cf(CF_AUTHORIZATIONS)?;
        self.db
            .put_cf(cf, authorization.id.to_string(), encode(&authorization)?)?;
        Ok(())
    }

    async fn find_by_idempotency_token(&self, token: &str) -> Result<Option<Authorization>> {
        match self.read_token(token)? {
            Some(id) => self.read(&id),
            None => Ok(None),
        }
    }

    async fn list_non_terminal(&self) -> Result<Vec<Authorization>> {
        Ok(self
            .get_all()
            .await?
            .into_iter()
            .filter(|a| !a.status.is_terminal())
            .collect())
    }

    async fn get_all(&self) -> Result<Vec<Authorization>> {
        let cf = self.cf(CF_AUTHORIZATIONS)?;
        let mut all = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            all.push(decode(&value)?);
        }
        all.sort_by_key(|a: &Authorization| a.created_at);
        Ok(all)
    }

    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let cf_auth = self.cf(CF_AUTHORIZATIONS)?;
        let cf_index = self.cf(CF_IDEMPOTENCY)?;

        let mut batch = WriteBatch::default();
        let mut evicted = 0;
        for item in self.db.iterator_cf(cf_auth, IteratorMode::Start) {
            let (key, value) = item?;
            let auth = decode(&value)?;
            if !auth.status.is_terminal() || auth.idempotency_key.is_valid_at(now) {
                continue;
            }
            batch.delete_cf(cf_auth, key);
            if self.read_token(&auth.idempotency_key.token)? == Some(auth.id) {
                batch.delete_cf(cf_index, &auth.idempotency_key.token);
            }
            evicted += 1;
        }
        self.db.write(batch)?;
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::BankAccount;
    use crate::domain::authorization::AuthorizationStatus;
    use crate::domain::idempotency::IdempotencyKey;
    use crate::domain::money::{Currency, Money};
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn authorization(token: &str, now: DateTime<Utc>) -> Authorization {
        Authorization::new(
            Money::new(dec!(100.00), Currency::Usd).unwrap(),
            BankAccount::from_account_number("Alice", "12345678", Some("021000021".into()))
                .unwrap(),
            BankAccount::from_account_number("Bob", "87654321", Some("011000015".into()))
                .unwrap(),
            IdempotencyKey::new(token, now, Duration::hours(24)),
            None,
            now,
            Duration::minutes(30),
        )
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");

        assert!(store.db.cf_handle(CF_AUTHORIZATIONS).is_some());
        assert!(store.db.cf_handle(CF_IDEMPOTENCY).is_some());
    }

    #[tokio::test]
    async fn test_rocksdb_authorization_store() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        let now = Utc::now();

        let mut auth = authorization("key-1", now);
        assert!(store.insert_if_absent(auth.clone()).await.unwrap());
        assert!(!store.insert_if_absent(authorization("key-1", now)).await.unwrap());

        auth.transition_to(AuthorizationStatus::PendingValidation, now)
            .unwrap();
        store.update(auth.clone()).await.unwrap();

        assert_eq!(store.get(auth.id).await.unwrap(), Some(auth.clone()));
        assert_eq!(
            store.find_by_idempotency_token("key-1").await.unwrap(),
            Some(auth)
        );
        assert_eq!(store.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rocksdb_survives_reopen() {
        let dir = tempdir().unwrap();
        let now = Utc::now();
        let auth = authorization("key-9", now);
        {
            let store = RocksDBStore::open(dir.path()).unwrap();
            store.insert_if_absent(auth.clone()).await.unwrap();
        }
        let store = RocksDBStore::open(dir.path()).unwrap();
        assert_eq!(store.get(auth.id).await.unwrap(), Some(auth));
    }

    #[tokio::test]
    async fn test_rocksdb_evicts_expired_terminal_records() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        let now = Utc::now();

        let mut auth = authorization("key-2", now);
        auth.transition_to(AuthorizationStatus::Declined, now).unwrap();
        store.insert_if_absent(auth).await.unwrap();

        assert_eq!(store.evict_expired(now + Duration::hours(25)).await.unwrap(), 1);
        assert!(store.find_by_idempotency_token("key-2").await.unwrap().is_none());
    }
}
