use crate::error::RailError;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Currencies a rail may settle in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
    Gbp,
    Jpy,
    Chf,
    Cad,
    Aud,
    Nzd,
    Sek,
    Nok,
    Dkk,
    Pln,
    Czk,
    Huf,
    Ron,
    Bgn,
    Try,
    Brl,
    Mxn,
    Ars,
    Clp,
    Cop,
    Pen,
    Inr,
    Cny,
    Hkd,
    Sgd,
    Myr,
    Thb,
    Idr,
    Php,
    Krw,
    Zar,
    Aed,
    Sar,
    Ils,
    Btc,
    Eth,
    Usdt,
    Usdc,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
            Currency::Jpy => "JPY",
            Currency::Chf => "CHF",
            Currency::Cad => "CAD",
            Currency::Aud => "AUD",
            Currency::Nzd => "NZD",
            Currency::Sek => "SEK",
            Currency::Nok => "NOK",
            Currency::Dkk => "DKK",
            Currency::Pln => "PLN",
            Currency::Czk => "CZK",
            Currency::Huf => "HUF",
            Currency::Ron => "RON",
            Currency::Bgn => "BGN",
            Currency::Try => "TRY",
            Currency::Brl => "BRL",
            Currency::Mxn => "MXN",
            Currency::Ars => "ARS",
            Currency::Clp => "CLP",
            Currency::Cop => "COP",
            Currency::Pen => "PEN",
            Currency::Inr => "INR",
            Currency::Cny => "CNY",
            Currency::Hkd => "HKD",
            Currency::Sgd => "SGD",
            Currency::Myr => "MYR",
            Currency::Thb => "THB",
            Currency::Idr => "IDR",
            Currency::Php => "PHP",
            Currency::Krw => "KRW",
            Currency::Zar => "ZAR",
            Currency::Aed => "AED",
            Currency::Sar => "SAR",
            Currency::Ils => "ILS",
            Currency::Btc => "BTC",
            Currency::Eth => "ETH",
            Currency::Usdt => "USDT",
            Currency::Usdc => "USDC",
        }
    }

    /// Crypto settlement assets are accepted but flagged during validation.
    pub fn is_crypto(&self) -> bool {
        matches!(
            self,
            Currency::Btc | Currency::Eth | Currency::Usdt | Currency::Usdc
        )
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = RailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let quoted = format!("\"{}\"", s.trim().to_ascii_uppercase());
        serde_json::from_str(&quoted)
            .map_err(|_| RailError::PaymentRejected(format!("Unknown currency: {}", s)))
    }
}

/// An immutable amount of a given currency.
///
/// Wraps `rust_decimal::Decimal` so financial arithmetic never goes through
/// floating point. The amount can be zero but never negative; positivity of
/// a payment amount is a validation rule, not a construction rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "MoneyRepr")]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

#[derive(Deserialize)]
struct MoneyRepr {
    amount: Decimal,
    currency: Currency,
}

impl TryFrom<MoneyRepr> for Money {
    type Error = RailError;

    fn try_from(repr: MoneyRepr) -> Result<Self, Self::Error> {
        Money::new(repr.amount, repr.currency)
    }
}

impl Money {
    pub fn new(amount: Decimal, currency: Currency) -> Result<Self, RailError> {
        if amount < Decimal::ZERO {
            return Err(RailError::PaymentRejected(
                "Amount must not be negative".to_string(),
            ));
        }
        Ok(Self { amount, currency })
    }

    /// Builds an amount from minor units (cents for two-decimal currencies).
    pub fn from_minor_units(minor: i64, currency: Currency) -> Result<Self, RailError> {
        Self::new(Decimal::new(minor, 2), currency)
    }

    pub fn to_minor_units(&self) -> i64 {
        (self.amount * Decimal::ONE_HUNDRED)
            .trunc()
            .to_i64()
            .unwrap_or(i64::MAX)
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn is_positive(&self) -> bool {
        self.amount > Decimal::ZERO
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}
