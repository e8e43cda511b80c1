use crate::domain::account::BankAccount;
use crate::domain::money::Money;
use crate::domain::payment::{
    PaymentId, RailReference, RailStatus, RailType, ReservationId, ReservationResult,
};
use crate::domain::ports::RailPort;
use crate::error::RailError;
use anyhow::anyhow;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Hold {
    Reserved,
    Released,
    Submitted(PaymentId),
}

#[derive(Debug, Default)]
struct Ledger {
    by_reference: HashMap<String, ReservationId>,
    holds: HashMap<ReservationId, Hold>,
    payments: HashMap<PaymentId, ReservationId>,
}

/// Sandbox rail that settles everything in memory.
///
/// Amounts at or above `sca_threshold` ask for strong customer
/// authentication; amounts above `max_amount` are refused for insufficient
/// funds. Reservations are idempotent on the caller's reference.
#[derive(Debug)]
pub struct SimulatedRail {
    rail: RailType,
    sca_threshold: Option<Decimal>,
    max_amount: Option<Decimal>,
    ledger: Mutex<Ledger>,
}

impl SimulatedRail {
    pub fn new(rail: RailType) -> Self {
        Self {
            rail,
            sca_threshold: None,
            max_amount: None,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    pub fn with_sca_threshold(mut self, threshold: Decimal) -> Self {
        self.sca_threshold = Some(threshold);
        self
    }

    pub fn with_max_amount(mut self, max: Decimal) -> Self {
        self.max_amount = Some(max);
        self
    }

    fn ledger(&self) -> anyhow::Result<std::sync::MutexGuard<'_, Ledger>> {
        self.ledger
            .lock()
            .map_err(|_| anyhow!("{} sandbox ledger poisoned", self.rail))
    }
}

#[async_trait]
impl RailPort for SimulatedRail {
    fn rail_type(&self) -> RailType {
        self.rail
    }

    async fn reserve(
        &self,
        amount: &Money,
        _debtor: &BankAccount,
        _creditor: &BankAccount,
        reference: &str,
    ) -> anyhow::Result<ReservationResult> {
        let sca_required = self
            .sca_threshold
            .is_some_and(|threshold| amount.amount() >= threshold);

        let mut ledger = self.ledger()?;
        if let Some(existing) = ledger.by_reference.get(reference) {
            return Ok(ReservationResult {
                reservation_id: existing.clone(),
                sca_required,
            });
        }

        if let Some(max) = self.max_amount
            && amount.amount() > max
        {
            return Err(RailError::InsufficientFunds(format!(
                "{} exceeds available balance of {} {}",
                amount,
                max,
                amount.currency()
            ))
            .into());
        }

        let reservation_id = ReservationId(format!("rsv_{}", Uuid::new_v4().simple()));
        ledger
            .by_reference
            .insert(reference.to_string(), reservation_id.clone());
        ledger.holds.insert(reservation_id.clone(), Hold::Reserved);
        debug!(rail = %self.rail, %reservation_id, %amount, "Funds reserved");

        Ok(ReservationResult {
            reservation_id,
            sca_required,
        })
    }

    async fn release(&self, reservation_id: &ReservationId) -> anyhow::Result<()> {
        let mut ledger = self.ledger()?;
        match ledger.holds.get_mut(reservation_id) {
            None => Err(RailError::PaymentNotFound(reservation_id.to_string()).into()),
            Some(Hold::Submitted(_)) => Err(RailError::PaymentRejected(format!(
                "Reservation {} already submitted",
                reservation_id
            ))
            .into()),
            Some(hold) => {
                *hold = Hold::Released;
                Ok(())
            }
        }
    }

    async fn submit(&self, reservation_id: &ReservationId) -> anyhow::Result<PaymentId> {
        let mut ledger = self.ledger()?;
        let payment_id = match ledger.holds.get(reservation_id) {
            None => return Err(RailError::PaymentNotFound(reservation_id.to_string()).into()),
            Some(Hold::Released) => {
                return Err(RailError::PaymentRejected(format!(
                    "Reservation {} was released",
                    reservation_id
                ))
                .into());
            }
            Some(Hold::Submitted(payment_id)) => return Ok(payment_id.clone()),
            Some(Hold::Reserved) => PaymentId(format!("pay_{}", Uuid::new_v4().simple())),
        };

        ledger
            .holds
            .insert(reservation_id.clone(), Hold::Submitted(payment_id.clone()));
        ledger
            .payments
            .insert(payment_id.clone(), reservation_id.clone());
        debug!(rail = %self.rail, %reservation_id, %payment_id, "Payment submitted");
        Ok(payment_id)
    }

    async fn query_status(&self, reference: &RailReference) -> anyhow::Result<RailStatus> {
        let ledger = self.ledger()?;
        let found = match reference {
            RailReference::Reservation(id) => Some(id),
            RailReference::Payment(payment_id) => ledger.payments.get(payment_id),
            RailReference::Reference(reference) => ledger.by_reference.get(reference),
        };
        let Some(reservation_id) = found else {
            return Ok(RailStatus::Unknown);
        };
        Ok(match ledger.holds.get(reservation_id) {
            None => RailStatus::Unknown,
            Some(Hold::Reserved) => RailStatus::Reserved(reservation_id.clone()),
            Some(Hold::Released) => RailStatus::Released,
            Some(Hold::Submitted(payment_id)) => RailStatus::Settled(payment_id.clone()),
        })
    }
}
