//! Payment Allocator
//!
//! Converts a bolívar payment to USD and settles the user's open invoices
//! oldest first. Whatever is left becomes credit.

use rust_decimal::Decimal;
use std::sync::Arc;

use crate::billing::BillingStore;
use crate::domain::{DomainError, NewPayment, Rate};
use crate::error::AppError;

use super::{AllocationResult, AppliedInvoice, RecordPaymentCommand};

/// Handler for recording payments
#[derive(Clone)]
pub struct PaymentAllocator {
    store: Arc<dyn BillingStore>,
}

impl PaymentAllocator {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Record `command` at `rate` (Bs per USD).
    ///
    /// A missing or non-positive rate is rejected before anything is
    /// written. All writes happen in one unit of work on the user.
    pub async fn allocate(
        &self,
        command: RecordPaymentCommand,
        rate: Option<Decimal>,
    ) -> Result<AllocationResult, AppError> {
        let rate = rate
            .and_then(|r| Rate::new(r).ok())
            .ok_or(DomainError::RateUnavailable)?;

        let amount_usd = command.amount.to_usd(rate).map_err(|e| {
            DomainError::InvalidAmount(format!("{} Bs at rate {}: {}", command.amount, rate, e))
        })?;
        if amount_usd <= Decimal::ZERO {
            return Err(DomainError::InvalidAmount(format!(
                "{} Bs is less than one cent at rate {}",
                command.amount, rate
            ))
            .into());
        }

        let user_id = command.user_id;
        let payer = &command.payer;
        let mut ledger = self.store.begin(user_id).await?;

        let original_payment = ledger
            .insert_payment(NewPayment::original(user_id, payer, amount_usd))
            .await?;

        let invoices = ledger.open_invoices().await?;
        let mut remaining = amount_usd;
        let mut applied_invoices = Vec::new();

        for mut invoice in invoices {
            if remaining <= Decimal::ZERO {
                break;
            }

            let owed = invoice.outstanding();
            if owed <= Decimal::ZERO {
                continue;
            }

            let applied = owed.min(remaining);
            ledger
                .insert_payment(NewPayment::applied(user_id, payer, invoice.id, applied))
                .await?;

            invoice.apply(applied)?;
            remaining -= applied;
            ledger.save_invoice(&invoice).await?;

            tracing::debug!(
                user_id = user_id,
                invoice_id = invoice.id,
                applied = %applied,
                status = %invoice.status,
                "Payment applied to invoice"
            );

            applied_invoices.push(AppliedInvoice {
                id: invoice.id,
                period: invoice.period_label(),
                applied_amount_usd: applied,
                applied_amount_bs: rate.to_local(applied),
                status: invoice.status,
            });
        }

        let credit_delta = remaining.max(Decimal::ZERO);
        let credit_balance = if credit_delta > Decimal::ZERO {
            ledger.add_credit(credit_delta).await?
        } else {
            ledger.user().credit_balance
        };

        ledger.commit().await?;

        tracing::info!(
            user_id = user_id,
            payment_id = original_payment.id,
            amount_bs = %command.amount,
            amount_usd = %amount_usd,
            rate = %rate,
            invoices = applied_invoices.len(),
            credit_delta = %credit_delta,
            "Payment allocated"
        );

        Ok(AllocationResult {
            original_payment,
            applied_invoices,
            credit_delta,
            credit_balance,
            amount_bs: command.amount.value(),
            amount_usd,
            rate: rate.value(),
        })
    }
}
