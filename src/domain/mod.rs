//! Domain module
//!
//! Core domain types and business logic.

pub mod error;
pub mod invoice;
pub mod money;
pub mod payment;

pub use error::DomainError;
pub use invoice::{Invoice, InvoiceStatus};
pub use money::{round_cents, Amount, AmountError, Rate, CENT};
pub use payment::{Nationality, NewPayment, PayerDetails, Payment};
