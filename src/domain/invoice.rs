//! Invoices
//!
//! Monthly invoices and the settlement rules applied when money is put
//! against them.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::money::CENT;
use super::DomainError;

/// Invoice status. Moves forward only: pending -> partial -> paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Partial,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Partial => "partial",
            InvoiceStatus::Paid => "paid",
        }
    }
}

impl From<String> for InvoiceStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "partial" => InvoiceStatus::Partial,
            "paid" => InvoiceStatus::Paid,
            _ => InvoiceStatus::Pending,
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user's invoice for one billing period. Amounts are USD.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: i64,
    pub user_id: i64,
    /// First day of the billed month
    pub period: NaiveDate,
    pub amount_due: Decimal,
    pub amount_paid: Decimal,
    pub status: InvoiceStatus,
}

impl Invoice {
    /// Amount still owed (never negative)
    pub fn outstanding(&self) -> Decimal {
        (self.amount_due - self.amount_paid).max(Decimal::ZERO)
    }

    /// `YYYY-MM` label for messages
    pub fn period_label(&self) -> String {
        self.period.format("%Y-%m").to_string()
    }

    /// Put `amount` against this invoice and recompute its status.
    ///
    /// A remainder under one cent closes the invoice and `amount_paid` is
    /// clamped to `amount_due`.
    pub fn apply(&mut self, amount: Decimal) -> Result<(), DomainError> {
        if amount <= Decimal::ZERO {
            return Err(DomainError::InvalidAmount(format!(
                "cannot apply {} to invoice {}",
                amount, self.id
            )));
        }

        let paid = self.amount_paid + amount;
        if paid - self.amount_due >= CENT {
            return Err(DomainError::InvoiceOverpaid {
                invoice_id: self.id,
                due: self.amount_due,
                paid,
            });
        }

        self.amount_paid = paid;
        if (self.amount_due - self.amount_paid).abs() < CENT {
            self.amount_paid = self.amount_due;
            self.status = InvoiceStatus::Paid;
        } else if self.amount_paid > Decimal::ZERO && self.status != InvoiceStatus::Paid {
            self.status = InvoiceStatus::Partial;
        }

        Ok(())
    }
}
