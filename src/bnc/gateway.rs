//! Bank gateway
//!
//! Endpoint-level operations on top of [`BankClient`], all signed and
//! encrypted with the current working key from [`SessionKeyStore`].

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::client::{BankClient, BankResponse};
use super::rates::{decimal_from_json, ExchangeRate, RateProvider, RateSource};
use super::session::SessionKeyStore;
use super::BncError;
use crate::domain::CENT;

const HISTORY_ENDPOINT: &str = "Position/History";
const VALIDATE_ENDPOINT: &str = "Position/Validate";
const BANKS_ENDPOINT: &str = "Services/Banks";
const BCV_ENDPOINT: &str = "Services/BCVRates";

#[derive(Debug, Serialize)]
struct HistoryRequest<'a> {
    #[serde(rename = "ClientID")]
    client_id: &'a str,
    #[serde(rename = "AccountNumber")]
    account_number: &'a str,
    #[serde(rename = "ChildClientID")]
    child_client_id: &'a str,
    #[serde(rename = "BranchID")]
    branch_id: &'a str,
}

#[derive(Debug, Serialize)]
struct ValidateRequest<'a> {
    #[serde(rename = "ClientID")]
    client_id: &'a str,
    #[serde(rename = "AccountNumber")]
    account_number: &'a str,
    #[serde(rename = "Reference")]
    reference: &'a str,
    #[serde(rename = "Amount", with = "rust_decimal::serde::float")]
    amount: Decimal,
    #[serde(rename = "DateMovement")]
    date_movement: String,
    #[serde(rename = "ChildClientID", skip_serializing_if = "Option::is_none")]
    child_client_id: Option<&'a str>,
    #[serde(rename = "BranchID", skip_serializing_if = "Option::is_none")]
    branch_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct BanksRequest<'a> {
    #[serde(rename = "ClientID")]
    client_id: &'a str,
    #[serde(rename = "ChildClientID")]
    child_client_id: &'a str,
    #[serde(rename = "BranchID")]
    branch_id: &'a str,
}

#[derive(Debug, Serialize)]
struct BcvRequest<'a> {
    #[serde(rename = "ClientGUID")]
    client_guid: &'a str,
    #[serde(rename = "Reference")]
    reference: String,
}

#[derive(Debug, Deserialize)]
struct BcvReply {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    value: Option<Value>,
}

/// A movement to look for in the account
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceQuery {
    pub account_number: String,
    pub reference: String,
    pub amount: Decimal,
    pub date: NaiveDate,
}

/// Decrypted answer of the reference validation endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceValidation {
    #[serde(rename = "MovementExists", default)]
    pub movement_exists: bool,
    #[serde(rename = "Amount", default, with = "rust_decimal::serde::float_option")]
    pub amount: Option<Decimal>,
    #[serde(flatten)]
    pub details: serde_json::Map<String, Value>,
}

impl ReferenceValidation {
    /// Movement exists and its amount is within a cent of `expected`
    pub fn matches(&self, expected: Decimal) -> bool {
        self.movement_exists
            && self
                .amount
                .map(|amount| (amount - expected).abs() < CENT)
                .unwrap_or(false)
    }
}

/// Bank directory entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bank {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Code")]
    pub code: String,
    #[serde(rename = "Services", default)]
    pub services: Value,
}

/// Bank operations authenticated with the daily working key
pub struct BankGateway {
    client: BankClient,
    keys: Arc<SessionKeyStore>,
}

impl BankGateway {
    pub fn new(client: BankClient, keys: Arc<SessionKeyStore>) -> Self {
        Self { client, keys }
    }

    /// Account configured as default for history and validation
    pub fn default_account(&self) -> Option<&str> {
        self.client.config().account_number.as_deref()
    }

    /// Encrypt `body` with the working key, POST it to `endpoint` and decrypt the reply
    pub async fn send<B: Serialize + ?Sized + Sync>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<BankResponse, BncError> {
        let key = match self.keys.get_working_key().await {
            Some(key) => key,
            None => {
                tracing::error!(endpoint = endpoint, "No BNC working key available");
                return Err(BncError::MissingWorkingKey);
            }
        };
        self.client.post_encrypted(endpoint, body, &key).await
    }

    /// Movement history of `account_number`
    pub async fn history(&self, account_number: &str) -> Result<Value, BncError> {
        let config = self.client.config();
        let body = HistoryRequest {
            client_id: &config.client_id,
            account_number,
            child_client_id: "",
            branch_id: "",
        };
        Ok(self.send(HISTORY_ENDPOINT, &body).await?.json)
    }

    /// Look up a movement by reference, amount and date
    pub async fn validate_reference(&self, query: &ReferenceQuery) -> Result<ReferenceValidation, BncError> {
        let config = self.client.config();
        let body = ValidateRequest {
            client_id: &config.client_id,
            account_number: &query.account_number,
            reference: &query.reference,
            amount: query.amount,
            date_movement: query.date.format("%Y-%m-%d").to_string(),
            child_client_id: None,
            branch_id: None,
        };
        let response = self.send(VALIDATE_ENDPOINT, &body).await?;
        let validation: ReferenceValidation = serde_json::from_value(response.json)?;

        tracing::info!(
            reference = %query.reference,
            movement_exists = validation.movement_exists,
            amount = ?validation.amount,
            expected = %query.amount,
            "Reference validated against BNC"
        );
        Ok(validation)
    }

    /// Banks participating in the bank's payment services
    pub async fn banks(&self) -> Result<Vec<Bank>, BncError> {
        let config = self.client.config();
        let body = BanksRequest {
            client_id: &config.client_id,
            child_client_id: "",
            branch_id: "",
        };
        let response = self.send(BANKS_ENDPOINT, &body).await?;
        Ok(serde_json::from_value(response.json)?)
    }

    /// BCV rate as published by the bank
    pub async fn bcv_rate(&self) -> Result<ExchangeRate, BncError> {
        let config = self.client.config();
        let body = BcvRequest {
            client_guid: &config.client_guid,
            reference: self.client.reference(),
        };
        let reply: BcvReply = self.client.post_plain(BCV_ENDPOINT, &body).await?;

        let status = reply.status.unwrap_or_default();
        if status != "OK" {
            return Err(BncError::Rejected {
                status,
                message: reply.message.unwrap_or_default(),
            });
        }

        let value = reply.value.unwrap_or(Value::Null);
        let rate = decimal_from_json(&value["PriceRateBCV"])
            .filter(|rate| *rate > Decimal::ZERO)
            .ok_or_else(|| BncError::Malformed("PriceRateBCV missing".to_string()))?;
        let date = match &value["dtRate"] {
            Value::String(date) => date.clone(),
            Value::Null => return Err(BncError::Malformed("dtRate missing".to_string())),
            other => other.to_string(),
        };

        Ok(ExchangeRate {
            value: rate,
            observed_at: date,
            source: RateSource::Fallback,
        })
    }
}

#[async_trait]
impl RateProvider for BankGateway {
    fn name(&self) -> &'static str {
        "bnc"
    }

    async fn fetch_rate(&self) -> Option<ExchangeRate> {
        match self.bcv_rate().await {
            Ok(rate) => Some(rate),
            Err(e) => {
                tracing::error!(error = %e, "BCV rate from BNC unavailable");
                None
            }
        }
    }
}
