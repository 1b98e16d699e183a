//! bnc_billing Library
//!
//! Re-exports modules for integration testing and external use.

pub mod api;
pub mod billing;
pub mod bnc;
pub mod cache;
pub mod domain;
pub mod handlers;

pub mod config;
pub mod db;
mod error;

pub use config::{BncConfig, Config};
pub use error::{AppError, ErrorResponse};
pub use domain::{Amount, AmountError, DomainError, Invoice, InvoiceStatus, Payment, Rate};
