//! Money types
//!
//! Bolívar amounts submitted by payers, the BCV rate used to convert them,
//! and the cent rounding applied to every USD figure.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum accepted payment (one trillion Bs)
const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);

/// Largest USD figure the ledger columns hold (9,999,999,999.99)
const MAX_USD: Decimal = Decimal::from_parts(3_567_587_327, 232, 0, false, 2);

/// Largest accepted rate (one trillion Bs per USD)
const MAX_RATE: Decimal = MAX_AMOUNT;

/// Payments are entered with at most two decimals
const MAX_SCALE: u32 = 2;

/// One cent. Differences below this are treated as settled.
pub const CENT: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Round to cents, half away from zero.
pub fn round_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Amount represents a validated bolívar payment amount.
///
/// # Invariants
/// - Value is at least 0.01
/// - Maximum 2 decimal places
/// - Maximum value is one trillion
///
/// # Example
/// ```
/// use rust_decimal::Decimal;
/// use bnc_billing::domain::Amount;
///
/// let amount: Amount = "4000.50".parse().unwrap();
/// assert_eq!(amount.value(), Decimal::new(400050, 2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

/// Errors that can occur when creating an Amount or Rate
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("Amount must be positive (got {0})")]
    NotPositive(Decimal),

    #[error("Amount has too many decimal places (max {MAX_SCALE}, got {0})")]
    TooManyDecimals(u32),

    #[error("Amount exceeds maximum allowed value ({MAX_AMOUNT})")]
    Overflow,

    #[error("Invalid amount format: {0}")]
    ParseError(String),
}

impl Amount {
    /// Create a new Amount with validation.
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value <= Decimal::ZERO {
            return Err(AmountError::NotPositive(value));
        }

        let value = value.normalize();
        if value.scale() > MAX_SCALE {
            return Err(AmountError::TooManyDecimals(value.scale()));
        }

        if value > MAX_AMOUNT {
            return Err(AmountError::Overflow);
        }

        Ok(Self(value))
    }

    /// Get the underlying Decimal value.
    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Convert to USD at `rate`, rounded to cents.
    ///
    /// Fails with [`AmountError::Overflow`] when the result does not fit the
    /// ledger.
    pub fn to_usd(&self, rate: Rate) -> Result<Decimal, AmountError> {
        let usd = self
            .0
            .checked_div(rate.value())
            .map(round_cents)
            .ok_or(AmountError::Overflow)?;
        if usd > MAX_USD {
            return Err(AmountError::Overflow);
        }
        Ok(usd)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal = Decimal::from_str(s.trim())
            .map_err(|e| AmountError::ParseError(e.to_string()))?;
        Amount::new(decimal)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Amount::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

/// Bs per USD. Strictly positive and at most one trillion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Rate(Decimal);

impl Rate {
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value <= Decimal::ZERO {
            return Err(AmountError::NotPositive(value));
        }
        if value > MAX_RATE {
            return Err(AmountError::Overflow);
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Convert a USD figure back to bolívars, rounded to cents.
    ///
    /// USD figures within the ledger bounds never overflow at a valid rate.
    pub fn to_local(&self, usd: Decimal) -> Decimal {
        round_cents(usd.saturating_mul(self.0))
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
