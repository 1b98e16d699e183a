//! Billing persistence interface
//!
//! Allocation runs inside a [`UserLedger`], a unit of work scoped to one
//! user. Opening a ledger serializes against every other open ledger of the
//! same user; dropping it without [`UserLedger::commit`] discards its
//! writes.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{Invoice, NewPayment, Payment};

/// Billing-relevant view of a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: i64,
    pub name: String,
    /// USD credit from earlier overpayments
    pub credit_balance: Decimal,
}

/// Persistence failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("User not found: {0}")]
    UserNotFound(i64),

    #[error("Invoice not found: {0}")]
    InvoiceNotFound(i64),
}

/// Source of per-user units of work
#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Lock `user_id` and open a unit of work on it
    async fn begin(&self, user_id: i64) -> Result<Box<dyn UserLedger>, StoreError>;
}

/// Reads and writes for one user, applied atomically on commit
#[async_trait]
pub trait UserLedger: Send {
    /// The locked user as read when the ledger was opened
    fn user(&self) -> &UserAccount;

    /// Invoices not yet paid, oldest period first
    async fn open_invoices(&mut self) -> Result<Vec<Invoice>, StoreError>;

    async fn insert_payment(&mut self, payment: NewPayment) -> Result<Payment, StoreError>;

    /// Persist `amount_paid` and `status`
    async fn save_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError>;

    /// Add to the user's credit balance, returning the new balance
    async fn add_credit(&mut self, amount: Decimal) -> Result<Decimal, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
