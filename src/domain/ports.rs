use super::account::BankAccount;
use super::authorization::{
    AuthenticationChallenge, AuthenticationMethod, Authorization, AuthorizationId,
};
use super::money::Money;
use super::payment::{PaymentId, RailReference, RailStatus, RailType, ReservationId, ReservationResult};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Contract every rail integration implements.
///
/// Implementations report failures as `anyhow::Error`. Returning a
/// [`crate::error::RailError`] inside it keeps the classification; anything
/// else is treated as an unrecognized failure by the mapper.
///
/// `reserve` MUST be idempotent on `reference`: a second call with the same
/// reference returns the original reservation instead of holding funds again.
#[async_trait]
pub trait RailPort: Send + Sync {
    fn rail_type(&self) -> RailType;

    async fn reserve(
        &self,
        amount: &Money,
        debtor: &BankAccount,
        creditor: &BankAccount,
        reference: &str,
    ) -> anyhow::Result<ReservationResult>;

    async fn release(&self, reservation_id: &ReservationId) -> anyhow::Result<()>;

    async fn submit(&self, reservation_id: &ReservationId) -> anyhow::Result<PaymentId>;

    async fn query_status(&self, reference: &RailReference) -> anyhow::Result<RailStatus>;

    /// Cheap connectivity probe for health reporting.
    async fn is_healthy(&self) -> bool {
        true
    }
}

/// Issues and verifies strong customer authentication challenges.
#[async_trait]
pub trait ScaProvider: Send + Sync {
    async fn issue(
        &self,
        authorization: &Authorization,
        method: AuthenticationMethod,
        expires_at: DateTime<Utc>,
    ) -> Result<AuthenticationChallenge>;

    async fn verify(&self, challenge: &AuthenticationChallenge, response: &str) -> Result<bool>;
}

/// Key-value store of authorizations.
///
/// `insert_if_absent` is the atomic check-then-create that keeps two
/// concurrent authorizations from claiming the same id or idempotency token.
#[async_trait]
pub trait AuthorizationStore: Send + Sync {
    async fn insert_if_absent(&self, authorization: Authorization) -> Result<bool>;
    async fn get(&self, id: AuthorizationId) -> Result<Option<Authorization>>;
    async fn update(&self, authorization: Authorization) -> Result<()>;
    async fn find_by_idempotency_token(&self, token: &str) -> Result<Option<Authorization>>;
    async fn list_non_terminal(&self) -> Result<Vec<Authorization>>;
    async fn get_all(&self) -> Result<Vec<Authorization>>;
    /// Drops records whose idempotency window has elapsed.
    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

pub type RailPortRef = Arc<dyn RailPort>;
pub type ScaProviderRef = Arc<dyn ScaProvider>;
pub type AuthorizationStoreRef = Arc<dyn AuthorizationStore>;

/// Source of wall-clock time for lifecycle decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
