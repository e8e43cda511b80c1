use crate::domain::authorization::AuthorizationStatus;
use crate::domain::payment::RailType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RailError>;

/// Machine-readable classification carried by every [`RailError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidAccount,
    InsufficientFunds,
    PaymentRejected,
    PaymentNotFound,
    RailAuthentication,
    RailCommunication,
    RailConfiguration,
    RailOperationFailed,
    Unavailable,
    InvalidState,
    Storage,
}

impl ErrorKind {
    /// Stable code for callers and logs.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidAccount => "INVALID_ACCOUNT",
            ErrorKind::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ErrorKind::PaymentRejected => "PAYMENT_REJECTED",
            ErrorKind::PaymentNotFound => "PAYMENT_NOT_FOUND",
            ErrorKind::RailAuthentication => "RAIL_AUTHENTICATION",
            ErrorKind::RailCommunication => "RAIL_COMMUNICATION",
            ErrorKind::RailConfiguration => "RAIL_CONFIGURATION",
            ErrorKind::RailOperationFailed => "RAIL_OPERATION_FAILED",
            ErrorKind::Unavailable => "TRY_AGAIN_LATER",
            ErrorKind::InvalidState => "INVALID_STATE",
            ErrorKind::Storage => "STORAGE",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Why the resilience envelope refused or gave up on a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    CircuitOpen,
    Throttled,
    CapacityExceeded,
    RetriesExhausted,
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnavailableReason::CircuitOpen => "circuit open",
            UnavailableReason::Throttled => "rate limited",
            UnavailableReason::CapacityExceeded => "capacity exceeded",
            UnavailableReason::RetriesExhausted => "retries exhausted",
        };
        f.write_str(s)
    }
}

/// Closed error taxonomy for rail operations.
///
/// Collaborator failures are normalized into these variants before the
/// authorization state machine sees them, so it can branch on the
/// classification instead of on concrete error types.
#[derive(Error, Debug, Clone)]
pub enum RailError {
    #[error("Invalid account: {0}")]
    InvalidAccount(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Payment rejected: {0}")]
    PaymentRejected(String),

    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    #[error("Rail authentication failed: {0}")]
    RailAuthentication(String),

    #[error("Rail communication failure: {0}")]
    RailCommunication(String),

    #[error("Rail configuration error: {0}")]
    RailConfiguration(String),

    #[error("Rail operation failed: {message}")]
    RailOperationFailed {
        message: String,
        #[source]
        cause: Arc<dyn std::error::Error + Send + Sync>,
    },

    #[error("Service temporarily unavailable for {rail} rail ({reason}). Please try again later.")]
    Unavailable {
        rail: RailType,
        reason: UnavailableReason,
        #[source]
        cause: Option<Box<RailError>>,
    },

    #[error("Authorization {authorization_id} is {status}: {message}")]
    InvalidState {
        authorization_id: String,
        status: AuthorizationStatus,
        message: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl RailError {
    /// Wraps an unrecognized collaborator failure, keeping it as the cause.
    pub fn operation_failed(err: anyhow::Error) -> Self {
        let message = err.to_string();
        let boxed: Box<dyn std::error::Error + Send + Sync> = err.into();
        RailError::RailOperationFailed {
            message,
            cause: Arc::from(boxed),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RailError::InvalidAccount(_) => ErrorKind::InvalidAccount,
            RailError::InsufficientFunds(_) => ErrorKind::InsufficientFunds,
            RailError::PaymentRejected(_) => ErrorKind::PaymentRejected,
            RailError::PaymentNotFound(_) => ErrorKind::PaymentNotFound,
            RailError::RailAuthentication(_) => ErrorKind::RailAuthentication,
            RailError::RailCommunication(_) => ErrorKind::RailCommunication,
            RailError::RailConfiguration(_) => ErrorKind::RailConfiguration,
            RailError::RailOperationFailed { .. } => ErrorKind::RailOperationFailed,
            RailError::Unavailable { .. } => ErrorKind::Unavailable,
            RailError::InvalidState { .. } => ErrorKind::InvalidState,
            RailError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Transient failures are the only ones the retry layer re-attempts.
    pub fn is_transient(&self) -> bool {
        matches!(self, RailError::RailCommunication(_))
    }

    /// Failures that say something about the rail's health, as opposed to a
    /// business decision about one payment. Only these feed the circuit
    /// breaker's failure rate.
    pub fn is_rail_fault(&self) -> bool {
        matches!(
            self,
            RailError::RailCommunication(_)
                | RailError::RailAuthentication(_)
                | RailError::RailConfiguration(_)
                | RailError::RailOperationFailed { .. }
        )
    }

    /// Kinds that end the payment: the authorization is declined and the
    /// call is never retried.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RailError::InvalidAccount(_)
                | RailError::InsufficientFunds(_)
                | RailError::PaymentRejected(_)
                | RailError::PaymentNotFound(_)
                | RailError::RailAuthentication(_)
                | RailError::RailConfiguration(_)
        )
    }

    /// The "try again later" family, never a business decline.
    pub fn is_retry_later(&self) -> bool {
        matches!(self, RailError::Unavailable { .. })
    }

    pub fn unavailable_reason(&self) -> Option<UnavailableReason> {
        match self {
            RailError::Unavailable { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// Serializable trace of the last failure recorded on an authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&RailError> for ErrorRecord {
    fn from(err: &RailError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
