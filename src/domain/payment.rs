use super::account::BankAccount;
use super::authorization::{AuthenticationContext, AuthorizationId, AuthorizationStatus};
use super::money::Money;
use crate::error::{ErrorRecord, RailError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RailType {
    Ach,
    Swift,
    Sepa,
    Chips,
    Fps,
    Fedwire,
    Interac,
    Rtp,
    CardNetwork,
    MobileWallet,
    CryptoBlockchain,
    Target2,
    Bacs,
    Pix,
    Upi,
    Zelle,
}

impl RailType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RailType::Ach => "ACH",
            RailType::Swift => "SWIFT",
            RailType::Sepa => "SEPA",
            RailType::Chips => "CHIPS",
            RailType::Fps => "FPS",
            RailType::Fedwire => "FEDWIRE",
            RailType::Interac => "INTERAC",
            RailType::Rtp => "RTP",
            RailType::CardNetwork => "CARD_NETWORK",
            RailType::MobileWallet => "MOBILE_WALLET",
            RailType::CryptoBlockchain => "CRYPTO_BLOCKCHAIN",
            RailType::Target2 => "TARGET2",
            RailType::Bacs => "BACS",
            RailType::Pix => "PIX",
            RailType::Upi => "UPI",
            RailType::Zelle => "ZELLE",
        }
    }
}

impl fmt::Display for RailType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RailType {
    type Err = RailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let quoted = format!("\"{}\"", s.trim().replace('-', "_").to_ascii_uppercase());
        serde_json::from_str(&quoted)
            .map_err(|_| RailError::RailConfiguration(format!("Unknown rail: {}", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    #[default]
    CreditTransfer,
    DebitTransfer,
    DirectDebit,
    WireTransfer,
    RequestToPay,
    P2pTransfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementSpeed {
    Instant,
    SameDay,
    NextDay,
    #[default]
    Standard,
    Batch,
}

/// Input for validation, authorization and single-phase initiation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub amount: Money,
    pub debtor: BankAccount,
    pub creditor: BankAccount,
    #[serde(default)]
    pub end_to_end_reference: Option<String>,
    #[serde(default)]
    pub remittance_information: Option<String>,
    #[serde(default)]
    pub transaction_type: TransactionType,
    #[serde(default)]
    pub settlement_speed: SettlementSpeed,
    #[serde(default)]
    pub authentication: Option<AuthenticationContext>,
}

impl PaymentRequest {
    pub fn new(amount: Money, debtor: BankAccount, creditor: BankAccount) -> Self {
        Self {
            amount,
            debtor,
            creditor,
            end_to_end_reference: None,
            remittance_information: None,
            transaction_type: TransactionType::default(),
            settlement_speed: SettlementSpeed::default(),
            authentication: None,
        }
    }

    pub fn with_authentication(mut self, context: AuthenticationContext) -> Self {
        self.authentication = Some(context);
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.end_to_end_reference = Some(reference.into());
        self
    }
}

/// Identifier the rail assigns to held funds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationId(pub String);

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier the rail assigns to a submitted payment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentId(pub String);

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a successful `reserve` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationResult {
    pub reservation_id: ReservationId,
    /// The rail demands strong customer authentication for this payment.
    pub sca_required: bool,
}

/// What a status query can be asked about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RailReference {
    Reservation(ReservationId),
    Payment(PaymentId),
    /// The caller's reference passed to `reserve`. Finds a hold whose
    /// reservation id never came back.
    Reference(String),
}

/// The rail's view of a reservation or payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RailStatus {
    Reserved(ReservationId),
    Released,
    Submitted(PaymentId),
    Settled(PaymentId),
    Rejected(String),
    Unknown,
}

impl RailStatus {
    pub fn payment_id(&self) -> Option<&PaymentId> {
        match self {
            RailStatus::Submitted(id) | RailStatus::Settled(id) => Some(id),
            _ => None,
        }
    }
}

/// Result of Phase 2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentResult {
    pub authorization_id: AuthorizationId,
    pub payment_id: PaymentId,
    pub status: AuthorizationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancellationResult {
    pub authorization_id: AuthorizationId,
    pub cancelled: bool,
    pub status: AuthorizationStatus,
    pub reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Status as seen by a caller polling a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentStatusView {
    pub authorization_id: AuthorizationId,
    pub status: AuthorizationStatus,
    pub payment_id: Option<PaymentId>,
    pub reserved_amount: Money,
    pub last_error: Option<ErrorRecord>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RailHealth {
    pub rail: RailType,
    pub status: HealthStatus,
    pub circuit: crate::resilience::CircuitState,
    pub checked_at: DateTime<Utc>,
    pub reason: Option<String>,
}
