use crate::domain::authorization::{Authorization, AuthorizationStatus};
use crate::domain::money::Currency;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct AuthorizationRow {
    key: String,
    authorization_id: String,
    status: AuthorizationStatus,
    amount: Decimal,
    currency: Currency,
    payment_id: Option<String>,
    error: Option<String>,
}

impl From<&Authorization> for AuthorizationRow {
    fn from(auth: &Authorization) -> Self {
        Self {
            key: auth.idempotency_key.token.clone(),
            authorization_id: auth.id.to_string(),
            status: auth.status,
            amount: auth.reserved_amount.amount(),
            currency: auth.reserved_amount.currency(),
            payment_id: auth.payment_id.as_ref().map(|id| id.to_string()),
            error: auth.last_error.as_ref().map(|e| e.kind.code().to_string()),
        }
    }
}

/// Writes the final state of every authorization as CSV.
pub struct AuthorizationWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> AuthorizationWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_authorizations<'a>(
        &mut self,
        authorizations: impl IntoIterator<Item = &'a Authorization>,
    ) -> Result<(), csv::Error> {
        for auth in authorizations {
            self.writer.serialize(AuthorizationRow::from(auth))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
