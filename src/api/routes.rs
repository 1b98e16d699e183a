//! API Routes
//!
//! HTTP endpoint definitions.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::bnc::{Bank, ExchangeRate, ReferenceQuery};
use crate::domain::{Amount, DomainError, Nationality, PayerDetails, Rate};
use crate::error::AppError;
use crate::handlers::{AllocationResult, AppliedInvoice, RecordPaymentCommand, ReferenceOutcome};

use super::AppState;

const MAX_REFERENCE_LEN: usize = 255;
const MAX_ID_NUMBER_LEN: usize = 20;
const MAX_BANK_LEN: usize = 100;
const MAX_PHONE_LEN: usize = 20;

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub account: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub success: bool,
    pub error: Option<String>,
    pub data: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateReferenceQuery {
    #[serde(default)]
    pub payment_date: Option<String>,
    #[serde(default)]
    pub expected_amount: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ValidateReferenceResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "showReportLink", skip_serializing_if = "Option::is_none")]
    pub show_report_link: Option<bool>,
}

impl ValidateReferenceResponse {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            show_report_link: None,
        }
    }

}

impl From<ReferenceOutcome> for ValidateReferenceResponse {
    fn from(outcome: ReferenceOutcome) -> Self {
        let show_report_link = outcome.offers_report().then_some(true);
        let response = match outcome {
            ReferenceOutcome::Confirmed(validation) => Self {
                success: true,
                data: serde_json::to_value(validation).ok(),
                message: None,
                show_report_link: None,
            },
            ReferenceOutcome::NotFound => Self::failure(
                "The reference was not found in the bank. You can report the payment manually.",
            ),
            ReferenceOutcome::AmountMismatch { found, expected } => {
                let found = found
                    .map(|f| format!("{:.2}", f))
                    .unwrap_or_else(|| "unknown".to_string());
                Self::failure(format!(
                    "The amount of the movement ({}) does not match the expected amount ({:.2}). \
                     You can report the payment manually.",
                    found, expected
                ))
            }
            ReferenceOutcome::KeyUnavailable => {
                Self::failure("Could not connect to the bank, please try again")
            }
            ReferenceOutcome::Failed => {
                Self::failure("Could not validate the reference, please try again")
            }
        };
        Self {
            show_report_link,
            ..response
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BanksResponse {
    pub success: bool,
    pub data: Option<Vec<Bank>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub user_id: Option<i64>,
    #[serde(default)]
    pub reference: Option<String>,
    pub amount: Decimal,
    pub nationality: String,
    pub id_number: String,
    pub bank: String,
    pub phone: String,
    /// `YYYY-MM-DD`
    pub payment_date: String,
    /// Path of an already uploaded receipt
    #[serde(default)]
    pub image_path: Option<String>,
}

impl PaymentRequest {
    /// Check every field and build the allocation command
    pub fn into_command(self) -> Result<RecordPaymentCommand, AppError> {
        let user_id = self
            .user_id
            .ok_or_else(|| AppError::InvalidRequest("user_id is required".to_string()))?;

        let amount = Amount::new(self.amount).map_err(DomainError::from)?;
        let nationality = Nationality::from_str(&self.nationality)?;

        let id_number = required("id_number", &self.id_number, MAX_ID_NUMBER_LEN)?;
        if !id_number.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid("id_number must contain digits only"));
        }
        let bank = required("bank", &self.bank, MAX_BANK_LEN)?;
        let phone = required("phone", &self.phone, MAX_PHONE_LEN)?;
        let payment_date = NaiveDate::parse_from_str(self.payment_date.trim(), "%Y-%m-%d")
            .map_err(|_| invalid("payment_date must be a date in YYYY-MM-DD format"))?;

        let mut payer = PayerDetails::new(nationality, id_number, bank, phone, payment_date);

        if let Some(reference) = self.reference.as_deref().map(str::trim) {
            if reference.chars().count() > MAX_REFERENCE_LEN {
                return Err(invalid(format!(
                    "reference may not be longer than {} characters",
                    MAX_REFERENCE_LEN
                )));
            }
            if !reference.is_empty() {
                payer = payer.with_reference(reference);
            }
        }
        if let Some(path) = self.image_path.as_deref().map(str::trim) {
            if !path.is_empty() {
                payer = payer.with_image_path(path);
            }
        }

        Ok(RecordPaymentCommand::new(user_id, amount, payer))
    }
}

fn invalid(message: impl Into<String>) -> AppError {
    AppError::Domain(DomainError::InvalidPayment(message.into()))
}

fn required<'a>(field: &str, value: &'a str, max_len: usize) -> Result<&'a str, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(invalid(format!("{} is required", field)));
    }
    if value.chars().count() > max_len {
        return Err(invalid(format!(
            "{} may not be longer than {} characters",
            field, max_len
        )));
    }
    Ok(value)
}

#[derive(Debug, Serialize)]
pub struct PaymentData {
    pub original_payment_bs: Decimal,
    pub original_payment_usd: Decimal,
    pub bcv_rate_used: Decimal,
    pub current_credit_balance_usd: Decimal,
    pub current_credit_balance_bs: Decimal,
    pub applied_invoices: Vec<AppliedInvoice>,
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub success: bool,
    pub message: String,
    pub data: PaymentData,
}

impl From<AllocationResult> for PaymentResponse {
    fn from(result: AllocationResult) -> Self {
        let message = result.message();
        let credit_bs = Rate::new(result.rate)
            .map(|rate| rate.to_local(result.credit_balance))
            .unwrap_or_default();

        Self {
            success: true,
            message,
            data: PaymentData {
                original_payment_bs: result.amount_bs,
                original_payment_usd: result.amount_usd,
                bcv_rate_used: result.rate,
                current_credit_balance_usd: result.credit_balance,
                current_credit_balance_bs: credit_bs,
                applied_invoices: result.applied_invoices,
            },
        }
    }
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/api/bcv", get(get_bcv_rate))
        .route("/api/bnc/history", get(get_history))
        .route("/api/bnc/validate-reference/:reference", get(validate_reference))
        .route("/api/banks", get(get_banks))
        .route("/payments", post(record_payment))
}

// =========================================================================
// GET /api/bcv
// =========================================================================

/// Current BCV rate, or `null` when no source answers
async fn get_bcv_rate(State(state): State<AppState>) -> Json<Option<ExchangeRate>> {
    Json(state.rates.get_rate().await)
}

// =========================================================================
// GET /api/bnc/history
// =========================================================================

async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> (StatusCode, Json<HistoryResponse>) {
    let account = query
        .account
        .filter(|a| !a.trim().is_empty())
        .or_else(|| state.gateway.default_account().map(str::to_string));

    let Some(account) = account else {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(HistoryResponse {
                success: false,
                error: Some("The account number is required".to_string()),
                data: None,
            }),
        );
    };

    match state.gateway.history(account.trim()).await {
        Ok(data) => (
            StatusCode::OK,
            Json(HistoryResponse {
                success: true,
                error: None,
                data: Some(data),
            }),
        ),
        Err(e) => {
            tracing::error!(error = %e, "BNC history request failed");
            let error = if e.is_missing_key() {
                "Could not connect to the bank, please try again"
            } else {
                "Could not retrieve the account history"
            };
            (
                StatusCode::OK,
                Json(HistoryResponse {
                    success: false,
                    error: Some(error.to_string()),
                    data: None,
                }),
            )
        }
    }
}

// =========================================================================
// GET /api/bnc/validate-reference/:reference
// =========================================================================

async fn validate_reference(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    Query(query): Query<ValidateReferenceQuery>,
) -> (StatusCode, Json<ValidateReferenceResponse>) {
    let reference = reference.trim().to_string();
    if reference.is_empty() || reference.chars().count() > MAX_REFERENCE_LEN {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ValidateReferenceResponse::failure("The reference is invalid")),
        );
    }

    let date = query
        .payment_date
        .as_deref()
        .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok());
    let Some(date) = date else {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ValidateReferenceResponse::failure(
                "payment_date must be a date in YYYY-MM-DD format",
            )),
        );
    };

    let amount = query
        .expected_amount
        .as_deref()
        .and_then(|a| Decimal::from_str(a.trim()).ok())
        .filter(|a| *a > Decimal::ZERO);
    let Some(amount) = amount else {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ValidateReferenceResponse::failure(
                "expected_amount must be a positive number",
            )),
        );
    };

    let Some(account) = state.gateway.default_account() else {
        tracing::error!("Reference validation requested but BNC_ACCOUNT_NUMBER is not set");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ValidateReferenceResponse::failure(
                "Reference validation is not available",
            )),
        );
    };

    let query = ReferenceQuery {
        account_number: account.to_string(),
        reference,
        amount,
        date,
    };

    let outcome = state.references.check(&query).await;
    (StatusCode::OK, Json(ValidateReferenceResponse::from(outcome)))
}

// =========================================================================
// GET /api/banks
// =========================================================================

async fn get_banks(State(state): State<AppState>) -> Json<BanksResponse> {
    match state.gateway.banks().await {
        Ok(banks) => Json(BanksResponse {
            success: true,
            data: Some(banks),
            message: None,
        }),
        Err(e) => {
            tracing::error!(error = %e, "BNC bank list request failed");
            Json(BanksResponse {
                success: false,
                data: None,
                message: Some("Could not retrieve the bank list".to_string()),
            })
        }
    }
}

// =========================================================================
// POST /payments
// =========================================================================

/// Record a payment and allocate it to the user's invoices
async fn record_payment(
    State(state): State<AppState>,
    payload: Result<Json<PaymentRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = payload.map_err(|e| AppError::InvalidRequest(e.body_text()))?;
    let command = request.into_command()?;

    // Rate is read before anything is written; allocate rejects a missing one
    let rate = state.rates.get_rate().await.map(|r| r.value);
    let result = state.allocator.allocate(command, rate).await?;

    Ok((StatusCode::CREATED, Json(PaymentResponse::from(result))).into_response())
}
