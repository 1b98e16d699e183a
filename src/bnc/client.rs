//! Low-level bank client
//!
//! Builds the encrypted request envelope, posts it and unwraps the
//! encrypted reply. Knows nothing about which key is current; callers
//! pass the key to use.

use async_trait::async_trait;
use chrono::FixedOffset;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::crypto::{self, preview};
use super::session::KeyIssuer;
use super::BncError;
use crate::cache::{bank_reference, Clock};
use crate::config::BncConfig;

/// Timeout for every bank endpoint
pub const BANK_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest body excerpt written to logs
const LOG_BODY_LIMIT: usize = 300;

/// Request envelope sent to every encrypted endpoint
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    #[serde(rename = "ClientGUID")]
    pub client_guid: &'a str,
    #[serde(rename = "Reference")]
    pub reference: String,
    #[serde(rename = "Value")]
    pub value: String,
    #[serde(rename = "Validation")]
    pub validation: String,
    #[serde(rename = "swTestOperation")]
    pub sw_test_operation: bool,
}

/// Reply of an encrypted endpoint
#[derive(Debug, Deserialize)]
pub struct EncryptedReply {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
}

/// HTTP status plus decrypted body
#[derive(Debug, Clone)]
pub struct BankResponse {
    pub status: StatusCode,
    pub json: Value,
}

/// 200 and 202 (accepted) both count as success
pub fn is_success(status: StatusCode) -> bool {
    status == StatusCode::OK || status == StatusCode::ACCEPTED
}

fn excerpt(body: &str) -> &str {
    match body.char_indices().nth(LOG_BODY_LIMIT) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// Shared HTTP plumbing for the bank API
#[derive(Clone)]
pub struct BankClient {
    http: reqwest::Client,
    config: BncConfig,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
}

impl BankClient {
    pub fn new(config: BncConfig, clock: Arc<dyn Clock>, offset: FixedOffset) -> Self {
        let http = reqwest::Client::builder()
            .timeout(BANK_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            config,
            clock,
            offset,
        }
    }

    pub fn config(&self) -> &BncConfig {
        &self.config
    }

    /// `YmdHis` reference for the next request
    pub fn reference(&self) -> String {
        bank_reference(self.clock.as_ref(), self.offset)
    }

    /// Build the envelope for `body` encrypted under `key`
    pub fn envelope<B: Serialize + ?Sized>(&self, body: &B, key: &str) -> Result<Envelope<'_>, BncError> {
        Ok(Envelope {
            client_guid: &self.config.client_guid,
            reference: self.reference(),
            value: crypto::encrypt(body, key)?,
            validation: crypto::sign(body)?,
            sw_test_operation: false,
        })
    }

    /// POST an encrypted body and decrypt the reply's `value` with the same key
    pub async fn post_encrypted<B: Serialize + ?Sized + Sync>(
        &self,
        endpoint: &str,
        body: &B,
        key: &str,
    ) -> Result<BankResponse, BncError> {
        let url = self.config.endpoint_url(endpoint);
        let envelope = self.envelope(body, key)?;

        tracing::debug!(
            endpoint = endpoint,
            reference = %envelope.reference,
            working_key = %preview(key),
            "Sending BNC request"
        );

        let response = self.http.post(&url).json(&envelope).send().await.map_err(|e| {
            tracing::error!(endpoint = endpoint, error = %e, "BNC request failed");
            BncError::Http(e)
        })?;

        let status = response.status();
        let text = response.text().await?;

        if !is_success(status) {
            tracing::error!(
                endpoint = endpoint,
                status = status.as_u16(),
                body = excerpt(&text),
                "BNC returned non-success status"
            );
            return Err(BncError::UnexpectedStatus(status.as_u16()));
        }

        let reply: EncryptedReply = serde_json::from_str(&text).map_err(|e| {
            tracing::error!(endpoint = endpoint, error = %e, body = excerpt(&text), "BNC reply is not JSON");
            BncError::Malformed(e.to_string())
        })?;

        let ciphertext = match reply.value {
            Some(Value::String(ciphertext)) if !ciphertext.is_empty() => ciphertext,
            _ => {
                tracing::error!(
                    endpoint = endpoint,
                    status = reply.status.as_deref().unwrap_or(""),
                    message = reply.message.as_deref().unwrap_or(""),
                    "BNC reply has no encrypted value"
                );
                return Err(BncError::MissingValue);
            }
        };

        let json: Value = crypto::decrypt(&ciphertext, key).map_err(|e| {
            tracing::error!(
                endpoint = endpoint,
                error = %e,
                ciphertext = %preview(&ciphertext),
                working_key = %preview(key),
                "Could not decrypt BNC reply"
            );
            BncError::Crypto(e)
        })?;

        Ok(BankResponse { status, json })
    }

    /// POST a plain JSON body and parse the reply
    pub async fn post_plain<B, R>(&self, endpoint: &str, body: &B) -> Result<R, BncError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let url = self.config.endpoint_url(endpoint);
        let response = self.http.post(&url).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status != StatusCode::OK {
            tracing::error!(
                endpoint = endpoint,
                status = status.as_u16(),
                body = excerpt(&text),
                "BNC returned non-OK status"
            );
            return Err(BncError::UnexpectedStatus(status.as_u16()));
        }

        Ok(serde_json::from_str(&text)?)
    }
}

#[derive(Serialize)]
struct LogOnRequest<'a> {
    #[serde(rename = "ClientGUID")]
    client_guid: &'a str,
}

#[derive(Deserialize)]
struct LogOnValue {
    #[serde(rename = "WorkingKey")]
    working_key: String,
}

/// Obtains the daily working key through `Auth/LogOn`, encrypted with the master key
#[derive(Clone)]
pub struct LogOnIssuer {
    client: BankClient,
}

impl LogOnIssuer {
    pub const ENDPOINT: &'static str = "Auth/LogOn";

    pub fn new(client: BankClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KeyIssuer for LogOnIssuer {
    async fn issue(&self) -> Result<String, BncError> {
        let config = self.client.config();
        let body = LogOnRequest {
            client_guid: &config.client_guid,
        };

        let response = self
            .client
            .post_encrypted(Self::ENDPOINT, &body, &config.master_key)
            .await?;

        let value: LogOnValue = serde_json::from_value(response.json)?;
        if value.working_key.trim().is_empty() {
            return Err(BncError::Malformed("empty WorkingKey".to_string()));
        }
        Ok(value.working_key)
    }
}
