//! API module
//!
//! HTTP API endpoints and middleware.

pub mod middleware;
pub mod routes;

use std::sync::Arc;

use crate::bnc::{BankGateway, RateCache};
use crate::handlers::{PaymentAllocator, ReferenceChecker};

pub use routes::create_router;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub rates: Arc<RateCache>,
    pub gateway: Arc<BankGateway>,
    pub allocator: PaymentAllocator,
    pub references: ReferenceChecker,
}

impl AppState {
    pub fn new(rates: Arc<RateCache>, gateway: Arc<BankGateway>, allocator: PaymentAllocator) -> Self {
        let references = ReferenceChecker::new(gateway.clone());
        Self {
            rates,
            gateway,
            allocator,
            references,
        }
    }
}
