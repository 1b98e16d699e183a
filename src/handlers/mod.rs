//! Command Handlers module
//!
//! Handlers that orchestrate the billing operations: payment allocation
//! and bank reference checks.

mod commands;
mod payment_handler;
mod reference_handler;


pub use commands::*;
pub use payment_handler::PaymentAllocator;
pub use reference_handler::{ReferenceChecker, ReferenceOutcome};
