//! Billing storage
//!
//! Users, invoices and payments as seen by the allocation core.

mod memory;
mod postgres;
mod store;

pub use memory::MemoryBillingStore;
pub use postgres::PgBillingStore;
pub use store::{BillingStore, StoreError, UserAccount, UserLedger};
