//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use thiserror::Error;

/// Business rule violations raised by the billing core.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// No usable BCV rate; nothing may be recorded
    #[error("BCV rate is unavailable, try again")]
    RateUnavailable,

    /// Invalid amount (zero, negative, or exceeds limit)
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Payer details failed validation
    #[error("Invalid payment details: {0}")]
    InvalidPayment(String),

    /// Invoice amounts went out of range
    #[error("Invoice {invoice_id} would be overpaid: due {due}, paid {paid}")]
    InvoiceOverpaid {
        invoice_id: i64,
        due: rust_decimal::Decimal,
        paid: rust_decimal::Decimal,
    },
}

impl From<super::AmountError> for DomainError {
    fn from(err: super::AmountError) -> Self {
        DomainError::InvalidAmount(err.to_string())
    }
}
