//! PostgreSQL billing store
//!
//! Each ledger is a transaction holding a `FOR UPDATE` lock on the user
//! row, so two allocations for the same user run one after the other.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};

use super::store::{BillingStore, StoreError, UserAccount, UserLedger};
use crate::domain::{Invoice, InvoiceStatus, NewPayment, Payment};

/// Billing store backed by PostgreSQL
#[derive(Debug, Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn begin(&self, user_id: i64) -> Result<Box<dyn UserLedger>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(i64, String, Decimal)> = sqlx::query_as(
            r#"
            SELECT id, name, credit_balance
            FROM users
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let (id, name, credit_balance) = row.ok_or(StoreError::UserNotFound(user_id))?;

        Ok(Box::new(PgUserLedger {
            tx,
            user: UserAccount {
                id,
                name,
                credit_balance,
            },
        }))
    }
}

struct PgUserLedger {
    tx: Transaction<'static, Postgres>,
    user: UserAccount,
}

#[async_trait]
impl UserLedger for PgUserLedger {
    fn user(&self) -> &UserAccount {
        &self.user
    }

    async fn open_invoices(&mut self) -> Result<Vec<Invoice>, StoreError> {
        let rows: Vec<(i64, i64, NaiveDate, Decimal, Decimal, String)> = sqlx::query_as(
            r#"
            SELECT id, user_id, period, amount_due, amount_paid, status
            FROM invoices
            WHERE user_id = $1 AND status <> 'paid'
            ORDER BY period ASC, id ASC
            FOR UPDATE
            "#,
        )
        .bind(self.user.id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, user_id, period, amount_due, amount_paid, status)| Invoice {
                id,
                user_id,
                period,
                amount_due,
                amount_paid,
                status: InvoiceStatus::from(status),
            })
            .collect())
    }

    async fn insert_payment(&mut self, payment: NewPayment) -> Result<Payment, StoreError> {
        let (id, created_at): (i64, DateTime<Utc>) = sqlx::query_as(
            r#"
            INSERT INTO payments
                (user_id, invoice_id, reference, amount, id_number, bank, phone, payment_date, image_path)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, created_at
            "#,
        )
        .bind(payment.user_id)
        .bind(payment.invoice_id)
        .bind(&payment.reference)
        .bind(payment.amount_usd)
        .bind(&payment.id_number)
        .bind(&payment.bank)
        .bind(&payment.phone)
        .bind(payment.payment_date)
        .bind(&payment.image_path)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(Payment::from_new(id, payment, created_at))
    }

    async fn save_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE invoices
            SET amount_paid = $2, status = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(invoice.id)
        .bind(invoice.amount_paid)
        .bind(invoice.status.as_str())
        .execute(&mut *self.tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(StoreError::InvoiceNotFound(invoice.id));
        }
        Ok(())
    }

    async fn add_credit(&mut self, amount: Decimal) -> Result<Decimal, StoreError> {
        let balance: Decimal = sqlx::query_scalar(
            r#"
            UPDATE users
            SET credit_balance = credit_balance + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING credit_balance
            "#,
        )
        .bind(self.user.id)
        .bind(amount)
        .fetch_one(&mut *self.tx)
        .await?;

        self.user.credit_balance = balance;
        Ok(balance)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
