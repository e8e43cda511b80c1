use crate::domain::account::BankAccount;
use crate::domain::authorization::{AuthenticationContext, AuthenticationMethod};
use crate::domain::money::{Currency, Money};
use crate::domain::payment::PaymentRequest;
use crate::error::RailError;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Malformed command row: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid command for key {key}: {source}")]
    Invalid {
        key: String,
        #[source]
        source: RailError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    Authorize,
    Initiate,
    Authenticate,
    Confirm,
    Cancel,
    Reconcile,
}

/// One CSV row. Which columns are required depends on `op`.
///
/// Accounts are either an IBAN or `account_number/routing_number`.
#[derive(Debug, Clone, Deserialize)]
struct CommandRecord {
    op: CommandType,
    key: String,
    #[serde(default)]
    amount: Option<Decimal>,
    #[serde(default)]
    currency: Option<Currency>,
    #[serde(default)]
    debtor_name: Option<String>,
    #[serde(default)]
    debtor_account: Option<String>,
    #[serde(default)]
    creditor_name: Option<String>,
    #[serde(default)]
    creditor_account: Option<String>,
    #[serde(default)]
    method: Option<AuthenticationMethod>,
    #[serde(default)]
    exemption: Option<String>,
    #[serde(default)]
    response: Option<String>,
}

/// A lifecycle operation addressed by the caller's idempotency key.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Authorize { key: String, request: PaymentRequest },
    Initiate { key: String, request: PaymentRequest },
    Authenticate { key: String, response: String },
    Confirm { key: String },
    Cancel { key: String },
    Reconcile { key: String },
}

impl Command {
    pub fn key(&self) -> &str {
        match self {
            Command::Authorize { key, .. }
            | Command::Initiate { key, .. }
            | Command::Authenticate { key, .. }
            | Command::Confirm { key }
            | Command::Cancel { key }
            | Command::Reconcile { key } => key,
        }
    }
}

impl TryFrom<CommandRecord> for Command {
    type Error = CommandError;

    fn try_from(record: CommandRecord) -> Result<Self, Self::Error> {
        let key = record.key.clone();
        let invalid = |source: RailError| CommandError::Invalid {
            key: key.clone(),
            source,
        };

        let command = match record.op {
            CommandType::Authorize => Command::Authorize {
                request: payment_request(&record).map_err(invalid)?,
                key: record.key,
            },
            CommandType::Initiate => Command::Initiate {
                request: payment_request(&record).map_err(invalid)?,
                key: record.key,
            },
            CommandType::Authenticate => Command::Authenticate {
                response: required(record.response.as_deref(), "response").map_err(invalid)?,
                key: record.key,
            },
            CommandType::Confirm => Command::Confirm { key: record.key },
            CommandType::Cancel => Command::Cancel { key: record.key },
            CommandType::Reconcile => Command::Reconcile { key: record.key },
        };
        Ok(command)
    }
}

fn required(value: Option<&str>, column: &str) -> Result<String, RailError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| RailError::PaymentRejected(format!("Column '{}' is required", column)))
}

fn account(name: Option<&str>, identifier: Option<&str>, role: &str) -> Result<BankAccount, RailError> {
    let name = required(name, &format!("{role}_name"))?;
    let identifier = required(identifier, &format!("{role}_account"))?;
    match identifier.split_once('/') {
        Some((number, routing)) => {
            BankAccount::from_account_number(name, number, Some(routing.to_string()))
        }
        None => BankAccount::from_iban(name, identifier, None),
    }
}

fn payment_request(record: &CommandRecord) -> Result<PaymentRequest, RailError> {
    let amount = record
        .amount
        .ok_or_else(|| RailError::PaymentRejected("Column 'amount' is required".to_string()))?;
    let currency = record
        .currency
        .ok_or_else(|| RailError::PaymentRejected("Column 'currency' is required".to_string()))?;
    let debtor = account(
        record.debtor_name.as_deref(),
        record.debtor_account.as_deref(),
        "debtor",
    )?;
    let creditor = account(
        record.creditor_name.as_deref(),
        record.creditor_account.as_deref(),
        "creditor",
    )?;

    let mut request = PaymentRequest::new(Money::new(amount, currency)?, debtor, creditor);
    if let Some(reason) = record.exemption.as_deref().filter(|r| !r.is_empty()) {
        request = request.with_authentication(AuthenticationContext::with_exemption(reason));
    } else if let Some(method) = record.method {
        request = request.with_authentication(AuthenticationContext::with_method(method));
    }
    Ok(request)
}

/// Reads lifecycle commands from a CSV source.
///
/// Whitespace is trimmed and rows may omit trailing columns that their
/// operation does not use.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes rows; a bad row yields an error and reading continues.
    pub fn commands(self) -> impl Iterator<Item = Result<Command, CommandError>> {
        self.reader
            .into_deserialize::<CommandRecord>()
            .map(|result| result.map_err(CommandError::from).and_then(Command::try_from))
    }
}
