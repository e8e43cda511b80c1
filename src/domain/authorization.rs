use super::account::BankAccount;
use super::idempotency::IdempotencyKey;
use super::money::Money;
use super::payment::{PaymentId, ReservationId};
use crate::error::{ErrorRecord, RailError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuthorizationId(Uuid);

impl AuthorizationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AuthorizationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AuthorizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "auth_{}", self.0.simple())
    }
}

impl FromStr for AuthorizationId {
    type Err = RailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("auth_").unwrap_or(s);
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|_| RailError::PaymentNotFound(format!("Malformed authorization id: {}", s)))
    }
}

/// Lifecycle of a two-phase payment.
///
/// ```text
/// INITIATED → PENDING_VALIDATION → AUTHORIZED ─────────────────→ CONFIRMED
///                       │              ↑
///                       └→ PENDING_AUTHENTICATION
///
/// CANCELLED, DECLINED, EXPIRED reachable from every non-terminal state
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorizationStatus {
    Initiated,
    PendingValidation,
    Authorized,
    PendingAuthentication,
    Confirmed,
    Cancelled,
    Declined,
    Expired,
}

impl AuthorizationStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuthorizationStatus::Confirmed
                | AuthorizationStatus::Cancelled
                | AuthorizationStatus::Declined
                | AuthorizationStatus::Expired
        )
    }

    /// Funds may be held at the rail in these states.
    #[inline]
    pub fn may_hold_reservation(&self) -> bool {
        matches!(
            self,
            AuthorizationStatus::PendingValidation
                | AuthorizationStatus::Authorized
                | AuthorizationStatus::PendingAuthentication
        )
    }

    pub fn can_transition_to(&self, next: AuthorizationStatus) -> bool {
        use AuthorizationStatus::*;

        if self.is_terminal() {
            return false;
        }
        match next {
            Cancelled | Declined | Expired => true,
            PendingValidation => *self == Initiated,
            Authorized => matches!(self, PendingValidation | PendingAuthentication),
            PendingAuthentication => *self == PendingValidation,
            Confirmed => *self == Authorized,
            Initiated => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizationStatus::Initiated => "INITIATED",
            AuthorizationStatus::PendingValidation => "PENDING_VALIDATION",
            AuthorizationStatus::Authorized => "AUTHORIZED",
            AuthorizationStatus::PendingAuthentication => "PENDING_AUTHENTICATION",
            AuthorizationStatus::Confirmed => "CONFIRMED",
            AuthorizationStatus::Cancelled => "CANCELLED",
            AuthorizationStatus::Declined => "DECLINED",
            AuthorizationStatus::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthenticationMethod {
    #[default]
    SmsOtp,
    OauthRedirect,
    None,
}

/// Authentication preferences supplied by the caller with a payment request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthenticationContext {
    #[serde(default)]
    pub method: AuthenticationMethod,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub sca_exemption: bool,
    #[serde(default)]
    pub exemption_reason: Option<String>,
}

impl AuthenticationContext {
    pub fn with_method(method: AuthenticationMethod) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn with_exemption(reason: impl Into<String>) -> Self {
        Self {
            method: AuthenticationMethod::None,
            callback_url: None,
            sca_exemption: true,
            exemption_reason: Some(reason.into()),
        }
    }

    /// An exemption only counts when it names its regulatory reason.
    pub fn has_valid_exemption(&self) -> bool {
        self.sca_exemption
            && self
                .exemption_reason
                .as_deref()
                .is_some_and(|r| !r.trim().is_empty())
    }
}

/// An outstanding SCA challenge the payer must answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationChallenge {
    pub method: AuthenticationMethod,
    pub challenge_token: String,
    pub redirect_url: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl AuthenticationChallenge {
    /// Challenges are honored strictly before `expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// The central mutable entity of the payment lifecycle.
///
/// Only the authorization service mutates it, and only through
/// [`Authorization::transition_to`], so illegal jumps are rejected in one
/// place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Authorization {
    pub id: AuthorizationId,
    pub status: AuthorizationStatus,
    pub reserved_amount: Money,
    pub debtor: BankAccount,
    pub creditor: BankAccount,
    pub idempotency_key: IdempotencyKey,
    /// Reference handed to the rail; reservations are idempotent on it.
    pub reference: String,
    pub reservation_id: Option<ReservationId>,
    pub challenge: Option<AuthenticationChallenge>,
    /// Caller preferences, kept so an interrupted Phase 1 can resume.
    #[serde(default)]
    pub authentication: Option<AuthenticationContext>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub attempt_count: u32,
    pub last_error: Option<ErrorRecord>,
    pub payment_id: Option<PaymentId>,
    /// A rail call ended ambiguously; the rail must be queried before any
    /// side-effecting call is repeated.
    pub submission_in_doubt: bool,
}

impl Authorization {
    pub fn new(
        amount: Money,
        debtor: BankAccount,
        creditor: BankAccount,
        idempotency_key: IdempotencyKey,
        reference: Option<String>,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        let id = AuthorizationId::new();
        Self {
            id,
            status: AuthorizationStatus::Initiated,
            reserved_amount: amount,
            debtor,
            creditor,
            idempotency_key,
            reference: reference.unwrap_or_else(|| id.to_string()),
            reservation_id: None,
            challenge: None,
            authentication: None,
            created_at: now,
            expires_at: now + ttl,
            updated_at: now,
            attempt_count: 0,
            last_error: None,
            payment_id: None,
            submission_in_doubt: false,
        }
    }

    pub fn transition_to(
        &mut self,
        next: AuthorizationStatus,
        now: DateTime<Utc>,
    ) -> Result<AuthorizationStatus, RailError> {
        if !self.status.can_transition_to(next) {
            return Err(RailError::InvalidState {
                authorization_id: self.id.to_string(),
                status: self.status,
                message: format!("cannot move to {}", next),
            });
        }
        let previous = self.status;
        self.status = next;
        self.updated_at = now;
        if next != AuthorizationStatus::PendingAuthentication {
            self.challenge = None;
        }
        Ok(previous)
    }

    pub fn record_error(&mut self, err: &RailError, now: DateTime<Utc>) {
        self.last_error = Some(ErrorRecord::from(err));
        self.updated_at = now;
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn invalid_state(&self, message: impl Into<String>) -> RailError {
        RailError::InvalidState {
            authorization_id: self.id.to_string(),
            status: self.status,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Currency;
    use rust_decimal_macros::dec;

    fn authorization(now: DateTime<Utc>) -> Authorization {
        Authorization::new(
            Money::new(dec!(10.00), Currency::Eur).unwrap(),
            BankAccount::from_iban("Alice", "DE89370400440532013000", None).unwrap(),
            BankAccount::from_iban("Bob", "GB82WEST12345698765432", None).unwrap(),
            IdempotencyKey::new("key-1", now, chrono::Duration::hours(24)),
            None,
            now,
            chrono::Duration::minutes(30),
        )
    }

    #[test]
    fn test_terminal_states() {
        assert!(AuthorizationStatus::Confirmed.is_terminal());
        assert!(AuthorizationStatus::Cancelled.is_terminal());
        assert!(AuthorizationStatus::Declined.is_terminal());
        assert!(AuthorizationStatus::Expired.is_terminal());

        assert!(!AuthorizationStatus::Initiated.is_terminal());
        assert!(!AuthorizationStatus::PendingValidation.is_terminal());
        assert!(!AuthorizationStatus::Authorized.is_terminal());
        assert!(!AuthorizationStatus::PendingAuthentication.is_terminal());
    }

    #[test]
    fn test_lifecycle_edges() {
        use AuthorizationStatus::*;
        assert!(Initiated.can_transition_to(PendingValidation));
        assert!(PendingValidation.can_transition_to(PendingAuthentication));
        assert!(PendingAuthentication.can_transition_to(Authorized));
        assert!(Authorized.can_transition_to(Confirmed));

        assert!(!Initiated.can_transition_to(Authorized));
        assert!(!PendingAuthentication.can_transition_to(Confirmed));
        assert!(!Confirmed.can_transition_to(Cancelled));
        assert!(!Expired.can_transition_to(Authorized));
    }

    #[test]
    fn test_transition_rejects_illegal_jump() {
        let now = Utc::now();
        let mut auth = authorization(now);
        let err = auth
            .transition_to(AuthorizationStatus::Confirmed, now)
            .unwrap_err();
        assert!(matches!(err, RailError::InvalidState { .. }));
        assert_eq!(auth.status, AuthorizationStatus::Initiated);
    }

    #[test]
    fn test_leaving_pending_authentication_discards_challenge() {
        let now = Utc::now();
        let mut auth = authorization(now);
        auth.transition_to(AuthorizationStatus::PendingValidation, now)
            .unwrap();
        auth.transition_to(AuthorizationStatus::PendingAuthentication, now)
            .unwrap();
        auth.challenge = Some(AuthenticationChallenge {
            method: AuthenticationMethod::SmsOtp,
            challenge_token: "tok".into(),
            redirect_url: None,
            expires_at: now + chrono::Duration::minutes(5),
        });
        auth.transition_to(AuthorizationStatus::Authorized, now)
            .unwrap();
        assert!(auth.challenge.is_none());
    }

    #[test]
    fn test_id_display_roundtrip() {
        let id = AuthorizationId::new();
        let parsed: AuthorizationId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_exemption_requires_reason() {
        assert!(AuthenticationContext::with_exemption("LOW_VALUE").has_valid_exemption());
        assert!(!AuthenticationContext::with_exemption(" ").has_valid_exemption());
        assert!(!AuthenticationContext::default().has_valid_exemption());
    }
}
