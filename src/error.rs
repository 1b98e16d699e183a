//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::billing::StoreError;
use crate::bnc::BncError;
use crate::domain::DomainError;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    // Upstream bank errors
    #[error(transparent)]
    Bnc(#[from] BncError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str, Option<String>) {
        match self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }

            // Domain errors - map to appropriate HTTP status
            AppError::Domain(domain_err) => match domain_err {
                DomainError::RateUnavailable => {
                    (StatusCode::SERVICE_UNAVAILABLE, "rate_unavailable", None)
                }
                DomainError::InvalidAmount(msg) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "invalid_amount", Some(msg.clone()))
                }
                DomainError::InvalidPayment(msg) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "invalid_payment", Some(msg.clone()))
                }
                DomainError::InvoiceOverpaid { invoice_id, .. } => {
                    tracing::error!(invoice_id, "Invoice allocation out of range: {}", domain_err);
                    (StatusCode::INTERNAL_SERVER_ERROR, "allocation_error", None)
                }
            },

            AppError::Store(store_err) => match store_err {
                StoreError::UserNotFound(id) => {
                    (StatusCode::NOT_FOUND, "user_not_found", Some(id.to_string()))
                }
                StoreError::InvoiceNotFound(id) => {
                    (StatusCode::NOT_FOUND, "invoice_not_found", Some(id.to_string()))
                }
                StoreError::Database(e) => {
                    tracing::error!("Database error: {:?}", e);
                    (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
                }
            },

            // 503 / 502 upstream
            AppError::Bnc(e) if e.is_missing_key() => {
                (StatusCode::SERVICE_UNAVAILABLE, "working_key_unavailable", None)
            }
            AppError::Bnc(e) => {
                tracing::error!("Bank error: {}", e);
                (StatusCode::BAD_GATEWAY, "bank_error", None)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = self.status_and_code();

        // Server-side failures never leak internals to the client
        let error = if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            "An error occurred, please try again".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error,
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}
