use crate::error::RailError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a payment counterparty.
///
/// Supports both the IBAN (+BIC) form used by SEPA/SWIFT style rails and the
/// account number + routing number form used by ACH style rails. The holder
/// name is the only field enforced at construction; well-formedness of the
/// identifiers is checked by `validation`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "BankAccountRepr")]
pub struct BankAccount {
    pub account_holder_name: String,
    pub iban: Option<String>,
    pub account_number: Option<String>,
    pub routing_number: Option<String>,
    pub swift_code: Option<String>,
    pub bank_name: Option<String>,
    pub country_code: Option<String>,
}

#[derive(Deserialize)]
struct BankAccountRepr {
    account_holder_name: String,
    #[serde(default)]
    iban: Option<String>,
    #[serde(default)]
    account_number: Option<String>,
    #[serde(default)]
    routing_number: Option<String>,
    #[serde(default)]
    swift_code: Option<String>,
    #[serde(default)]
    bank_name: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
}

impl TryFrom<BankAccountRepr> for BankAccount {
    type Error = RailError;

    fn try_from(repr: BankAccountRepr) -> Result<Self, Self::Error> {
        let mut account = BankAccount::new(repr.account_holder_name)?;
        account.iban = repr.iban;
        account.account_number = repr.account_number;
        account.routing_number = repr.routing_number;
        account.swift_code = repr.swift_code;
        account.bank_name = repr.bank_name;
        account.country_code = repr.country_code;
        Ok(account)
    }
}

fn non_blank(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

impl BankAccount {
    fn new(account_holder_name: impl Into<String>) -> Result<Self, RailError> {
        let account_holder_name = account_holder_name.into();
        if account_holder_name.trim().is_empty() {
            return Err(RailError::InvalidAccount(
                "Account holder name must not be blank".to_string(),
            ));
        }
        Ok(Self {
            account_holder_name,
            iban: None,
            account_number: None,
            routing_number: None,
            swift_code: None,
            bank_name: None,
            country_code: None,
        })
    }

    pub fn from_iban(
        account_holder_name: impl Into<String>,
        iban: impl Into<String>,
        swift_code: Option<String>,
    ) -> Result<Self, RailError> {
        let mut account = Self::new(account_holder_name)?;
        account.iban = Some(iban.into());
        account.swift_code = swift_code;
        Ok(account)
    }

    pub fn from_account_number(
        account_holder_name: impl Into<String>,
        account_number: impl Into<String>,
        routing_number: Option<String>,
    ) -> Result<Self, RailError> {
        let mut account = Self::new(account_holder_name)?;
        account.account_number = Some(account_number.into());
        account.routing_number = routing_number;
        account.country_code = Some("US".to_string());
        Ok(account)
    }

    pub fn with_bank_name(mut self, bank_name: impl Into<String>) -> Self {
        self.bank_name = Some(bank_name.into());
        self
    }

    pub fn iban(&self) -> Option<&str> {
        non_blank(self.iban.as_ref())
    }

    pub fn account_number(&self) -> Option<&str> {
        non_blank(self.account_number.as_ref())
    }

    pub fn routing_number(&self) -> Option<&str> {
        non_blank(self.routing_number.as_ref())
    }

    pub fn swift_code(&self) -> Option<&str> {
        non_blank(self.swift_code.as_ref())
    }

    /// An account is usable once it carries at least one routable identifier.
    pub fn is_usable(&self) -> bool {
        self.iban().is_some() || self.account_number().is_some()
    }
}

impl fmt::Display for BankAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.iban(), self.account_number()) {
            (Some(iban), _) => write!(f, "{} <{}>", self.account_holder_name, iban),
            (None, Some(number)) => write!(
                f,
                "{} <{}/{}>",
                self.account_holder_name,
                self.routing_number().unwrap_or("-"),
                number
            ),
            (None, None) => write!(f, "{} <unroutable>", self.account_holder_name),
        }
    }
}
