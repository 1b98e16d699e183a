//! In-memory billing store
//!
//! Used by tests and local runs without a database. A ledger works on a
//! copy of the state and holds the store mutex until it is committed or
//! dropped.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::store::{BillingStore, StoreError, UserAccount, UserLedger};
use crate::domain::{Invoice, InvoiceStatus, NewPayment, Payment};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: HashMap<i64, UserAccount>,
    invoices: BTreeMap<i64, Invoice>,
    payments: Vec<Payment>,
    next_invoice_id: i64,
}

/// Billing store kept in process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryBillingStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, id: i64, name: &str, credit_balance: Decimal) {
        self.state.lock().await.users.insert(
            id,
            UserAccount {
                id,
                name: name.to_string(),
                credit_balance,
            },
        );
    }

    /// Add an invoice and return its id
    pub async fn add_invoice(
        &self,
        user_id: i64,
        period: NaiveDate,
        amount_due: Decimal,
        amount_paid: Decimal,
        status: InvoiceStatus,
    ) -> i64 {
        let mut state = self.state.lock().await;
        state.next_invoice_id += 1;
        let id = state.next_invoice_id;
        state.invoices.insert(
            id,
            Invoice {
                id,
                user_id,
                period,
                amount_due,
                amount_paid,
                status,
            },
        );
        id
    }

    pub async fn user(&self, id: i64) -> Option<UserAccount> {
        self.state.lock().await.users.get(&id).cloned()
    }

    pub async fn invoice(&self, id: i64) -> Option<Invoice> {
        self.state.lock().await.invoices.get(&id).cloned()
    }

    /// Payments of `user_id` in insertion order
    pub async fn payments(&self, user_id: i64) -> Vec<Payment> {
        self.state
            .lock()
            .await
            .payments
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl BillingStore for MemoryBillingStore {
    async fn begin(&self, user_id: i64) -> Result<Box<dyn UserLedger>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let user = guard
            .users
            .get(&user_id)
            .cloned()
            .ok_or(StoreError::UserNotFound(user_id))?;
        let working = (*guard).clone();

        Ok(Box::new(MemoryLedger {
            guard,
            working,
            user,
        }))
    }
}

struct MemoryLedger {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    user: UserAccount,
}

#[async_trait]
impl UserLedger for MemoryLedger {
    fn user(&self) -> &UserAccount {
        &self.user
    }

    async fn open_invoices(&mut self) -> Result<Vec<Invoice>, StoreError> {
        let mut open: Vec<Invoice> = self
            .working
            .invoices
            .values()
            .filter(|i| i.user_id == self.user.id && i.status != InvoiceStatus::Paid)
            .cloned()
            .collect();
        open.sort_by(|a, b| a.period.cmp(&b.period).then(a.id.cmp(&b.id)));
        Ok(open)
    }

    async fn insert_payment(&mut self, payment: NewPayment) -> Result<Payment, StoreError> {
        let id = self.working.payments.len() as i64 + 1;
        let payment = Payment::from_new(id, payment, Utc::now());
        self.working.payments.push(payment.clone());
        Ok(payment)
    }

    async fn save_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError> {
        let stored = self
            .working
            .invoices
            .get_mut(&invoice.id)
            .ok_or(StoreError::InvoiceNotFound(invoice.id))?;
        stored.amount_paid = invoice.amount_paid;
        stored.status = invoice.status;
        Ok(())
    }

    async fn add_credit(&mut self, amount: Decimal) -> Result<Decimal, StoreError> {
        let user = self
            .working
            .users
            .get_mut(&self.user.id)
            .ok_or(StoreError::UserNotFound(self.user.id))?;
        user.credit_balance += amount;
        self.user.credit_balance = user.credit_balance;
        Ok(user.credit_balance)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryLedger {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }
}
