//! Command definitions
//!
//! Commands represent intentions to change the system state.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{Amount, InvoiceStatus, PayerDetails, Payment};

/// Command to record a bolívar payment for a user
#[derive(Debug, Clone)]
pub struct RecordPaymentCommand {
    pub user_id: i64,
    /// Gross amount in Bs
    pub amount: Amount,
    pub payer: PayerDetails,
}

impl RecordPaymentCommand {
    pub fn new(user_id: i64, amount: Amount, payer: PayerDetails) -> Self {
        Self {
            user_id,
            amount,
            payer,
        }
    }
}

/// One invoice funded by a payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedInvoice {
    pub id: i64,
    /// `YYYY-MM`
    pub period: String,
    pub applied_amount_usd: Decimal,
    pub applied_amount_bs: Decimal,
    pub status: InvoiceStatus,
}

/// Result of a successful allocation
#[derive(Debug, Clone)]
pub struct AllocationResult {
    /// Canonical record holding the whole converted amount
    pub original_payment: Payment,
    pub applied_invoices: Vec<AppliedInvoice>,
    /// USD added to the user's credit by this payment
    pub credit_delta: Decimal,
    /// USD credit after this payment
    pub credit_balance: Decimal,
    pub amount_bs: Decimal,
    pub amount_usd: Decimal,
    pub rate: Decimal,
}

impl AllocationResult {
    /// Human-readable summary for the payer
    pub fn message(&self) -> String {
        let mut message = String::from("Payment recorded.");
        if !self.applied_invoices.is_empty() {
            message.push_str(&format!(
                " Applied to {} invoice(s).",
                self.applied_invoices.len()
            ));
        }
        if self.credit_delta > Decimal::ZERO {
            message.push_str(&format!(" Available credit: ${:.2}", self.credit_delta));
        }
        message
    }
}
