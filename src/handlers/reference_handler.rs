//! Reference Checker
//!
//! Confirms that a payer-submitted bank reference matches a real movement
//! of the expected amount.

use rust_decimal::Decimal;
use std::sync::Arc;

use crate::bnc::{BankGateway, BncError, ReferenceQuery, ReferenceValidation};

/// What the bank said about a reference
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceOutcome {
    /// Movement found with the expected amount
    Confirmed(ReferenceValidation),
    /// No such movement
    NotFound,
    /// Movement found but for a different amount
    AmountMismatch {
        found: Option<Decimal>,
        expected: Decimal,
    },
    /// No working key; retry later
    KeyUnavailable,
    /// Bank unreachable or reply unusable
    Failed,
}

impl ReferenceOutcome {
    pub fn from_result(result: Result<ReferenceValidation, BncError>, expected: Decimal) -> Self {
        match result {
            Ok(validation) if !validation.movement_exists => ReferenceOutcome::NotFound,
            Ok(validation) if validation.matches(expected) => ReferenceOutcome::Confirmed(validation),
            Ok(validation) => ReferenceOutcome::AmountMismatch {
                found: validation.amount,
                expected,
            },
            Err(BncError::MissingWorkingKey) => ReferenceOutcome::KeyUnavailable,
            Err(_) => ReferenceOutcome::Failed,
        }
    }

    /// Whether the payer should be offered a manual report
    pub fn offers_report(&self) -> bool {
        matches!(
            self,
            ReferenceOutcome::NotFound | ReferenceOutcome::AmountMismatch { .. }
        )
    }
}

/// Handler for reference validation
#[derive(Clone)]
pub struct ReferenceChecker {
    gateway: Arc<BankGateway>,
}

impl ReferenceChecker {
    pub fn new(gateway: Arc<BankGateway>) -> Self {
        Self { gateway }
    }

    pub async fn check(&self, query: &ReferenceQuery) -> ReferenceOutcome {
        let result = self.gateway.validate_reference(query).await;
        if let Err(ref e) = result {
            tracing::error!(reference = %query.reference, error = %e, "Reference validation failed");
        }
        ReferenceOutcome::from_result(result, query.amount)
    }
}
