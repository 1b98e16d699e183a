//! BNC integration
//!
//! Payload cryptography, daily working keys, the encrypted bank gateway
//! and the BCV rate cache.

pub mod client;
pub mod crypto;
pub mod error;
pub mod gateway;
pub mod rates;
pub mod session;

pub use client::{BankClient, BankResponse, LogOnIssuer};
pub use error::BncError;
pub use gateway::{Bank, BankGateway, ReferenceQuery, ReferenceValidation};
pub use rates::{ExchangeRate, PydolarveProvider, RateCache, RateProvider, RateSource};
pub use session::{
    KeyIssuer, MemoryWorkingKeyRepository, PgWorkingKeyRepository, SessionKeyStore,
    WorkingKeyRecord, WorkingKeyRepository,
};
