//! Payments
//!
//! Payer identity and the payment records written for each allocation.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::DomainError;

/// Suffix attached to the reference of invoice-linked slices
pub const APPLIED_REFERENCE_SUFFIX: &str = " (applied to invoice)";

/// Document type prefix of a Venezuelan id number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Nationality {
    /// Venezuelan
    V,
    /// Foreign resident
    E,
    /// Legal entity (RIF)
    J,
}

impl FromStr for Nationality {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "V" => Ok(Nationality::V),
            "E" => Ok(Nationality::E),
            "J" => Ok(Nationality::J),
            other => Err(DomainError::InvalidPayment(format!(
                "nationality must be one of V, E, J (got {})",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Nationality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let letter = match self {
            Nationality::V => "V",
            Nationality::E => "E",
            Nationality::J => "J",
        };
        f.write_str(letter)
    }
}

/// Who paid and through which bank. Shared by every record of one payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayerDetails {
    pub reference: Option<String>,
    /// Stored as `"{nationality}-{number}"`
    pub id_number: String,
    pub bank: String,
    pub phone: String,
    pub payment_date: NaiveDate,
    pub image_path: Option<String>,
}

impl PayerDetails {
    pub fn new(
        nationality: Nationality,
        id_number: &str,
        bank: impl Into<String>,
        phone: impl Into<String>,
        payment_date: NaiveDate,
    ) -> Self {
        Self {
            reference: None,
            id_number: format!("{}-{}", nationality, id_number.trim()),
            bank: bank.into(),
            phone: phone.into(),
            payment_date,
            image_path: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_image_path(mut self, path: impl Into<String>) -> Self {
        self.image_path = Some(path.into());
        self
    }

    /// Reference used on an invoice-linked slice
    pub fn applied_reference(&self) -> String {
        format!(
            "{}{}",
            self.reference.as_deref().unwrap_or_default(),
            APPLIED_REFERENCE_SUFFIX
        )
    }
}

/// A payment row about to be inserted
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub user_id: i64,
    /// `None` marks the canonical record holding the whole payment
    pub invoice_id: Option<i64>,
    pub reference: Option<String>,
    pub amount_usd: Decimal,
    pub id_number: String,
    pub bank: String,
    pub phone: String,
    pub payment_date: NaiveDate,
    pub image_path: Option<String>,
}

impl NewPayment {
    /// The record for the full converted amount
    pub fn original(user_id: i64, payer: &PayerDetails, amount_usd: Decimal) -> Self {
        Self {
            user_id,
            invoice_id: None,
            reference: payer.reference.clone(),
            amount_usd,
            id_number: payer.id_number.clone(),
            bank: payer.bank.clone(),
            phone: payer.phone.clone(),
            payment_date: payer.payment_date,
            image_path: payer.image_path.clone(),
        }
    }

    /// A slice of the payment that funded `invoice_id`
    pub fn applied(user_id: i64, payer: &PayerDetails, invoice_id: i64, amount_usd: Decimal) -> Self {
        Self {
            user_id,
            invoice_id: Some(invoice_id),
            reference: Some(payer.applied_reference()),
            amount_usd,
            id_number: payer.id_number.clone(),
            bank: payer.bank.clone(),
            phone: payer.phone.clone(),
            payment_date: payer.payment_date,
            image_path: None,
        }
    }
}

/// A stored payment row. Never updated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub user_id: i64,
    pub invoice_id: Option<i64>,
    pub reference: Option<String>,
    pub amount_usd: Decimal,
    pub id_number: String,
    pub bank: String,
    pub phone: String,
    pub payment_date: NaiveDate,
    pub image_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn from_new(id: i64, new: NewPayment, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id: new.user_id,
            invoice_id: new.invoice_id,
            reference: new.reference,
            amount_usd: new.amount_usd,
            id_number: new.id_number,
            bank: new.bank,
            phone: new.phone,
            payment_date: new.payment_date,
            image_path: new.image_path,
            created_at,
        }
    }
}
