//! Error handling module
//!
//! Centralized HTTP error type and response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::audit_store::AuditStoreError;
use crate::balance_store::BalanceStoreError;
use crate::channel::ChannelError;
use crate::domain::DomainError;
use crate::handlers::TransferError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Missing required header: {0}")]
    MissingHeader(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Account already exists: {0}")]
    AccountExists(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    // Server errors (5xx)
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Balance store error: {0}")]
    BalanceStore(BalanceStoreError),

    #[error("Audit store error: {0}")]
    AuditStore(#[from] AuditStoreError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl From<BalanceStoreError> for AppError {
    fn from(err: BalanceStoreError) -> Self {
        match err {
            BalanceStoreError::AccountNotFound(number) => AppError::AccountNotFound(number.to_string()),
            BalanceStoreError::DuplicateAccount(number) => AppError::AccountExists(number.to_string()),
            e if e.is_transient() => AppError::ServiceUnavailable(e.to_string()),
            e => AppError::BalanceStore(e),
        }
    }
}

impl From<ChannelError> for AppError {
    fn from(err: ChannelError) -> Self {
        AppError::ServiceUnavailable(err.to_string())
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

fn domain_status(err: &DomainError) -> (StatusCode, &'static str) {
    match err {
        DomainError::InvalidAmount(_) => (StatusCode::BAD_REQUEST, "invalid_amount"),
        DomainError::InvalidCurrency(_) => (StatusCode::BAD_REQUEST, "invalid_currency"),
        DomainError::InvalidAccountNumber(_) => {
            (StatusCode::BAD_REQUEST, "invalid_account_number")
        }
        DomainError::InvalidAccountType(_) => (StatusCode::BAD_REQUEST, "invalid_account_type"),
        DomainError::UnknownTransactionType(_) => {
            (StatusCode::BAD_REQUEST, "unknown_transaction_type")
        }
        DomainError::MissingField(_) | DomainError::UnexpectedField(_) => {
            (StatusCode::BAD_REQUEST, "invalid_request")
        }
        DomainError::SameAccountTransfer => (StatusCode::BAD_REQUEST, "same_account_transfer"),
        DomainError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }
            AppError::MissingHeader(header) => {
                (StatusCode::UNAUTHORIZED, "missing_header", Some(header.clone()))
            }

            // 403 Forbidden
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", Some(msg.clone())),

            // 404 Not Found
            AppError::AccountNotFound(number) => {
                (StatusCode::NOT_FOUND, "account_not_found", Some(number.clone()))
            }
            AppError::RecordNotFound(id) => {
                (StatusCode::NOT_FOUND, "record_not_found", Some(id.clone()))
            }

            // 409 Conflict
            AppError::AccountExists(number) => {
                (StatusCode::CONFLICT, "account_exists", Some(number.clone()))
            }

            AppError::Domain(domain_err) => {
                let (status, code) = domain_status(domain_err);
                (status, code, None)
            }

            AppError::Transfer(transfer_err) => match transfer_err {
                TransferError::InvalidAmount(msg) => {
                    (StatusCode::BAD_REQUEST, "invalid_amount", Some(msg.clone()))
                }
                TransferError::SameAccount => {
                    (StatusCode::BAD_REQUEST, "same_account_transfer", None)
                }
                TransferError::Invalid(domain_err) => {
                    let (status, code) = domain_status(domain_err);
                    (status, code, None)
                }
                TransferError::InsufficientFunds { available, .. } => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "insufficient_funds",
                    Some(format!("available balance {available}")),
                ),
                TransferError::AccountNotFound(number) => {
                    (StatusCode::NOT_FOUND, "account_not_found", Some(number.to_string()))
                }
                TransferError::CurrencyMismatch(msg) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "currency_mismatch", Some(msg.clone()))
                }
                TransferError::Forbidden(msg) => {
                    (StatusCode::FORBIDDEN, "forbidden", Some(msg.clone()))
                }
                TransferError::Unavailable(msg) => {
                    tracing::warn!("Transfer unavailable: {}", msg);
                    (StatusCode::SERVICE_UNAVAILABLE, "retry_later", None)
                }
                TransferError::Internal(msg) => {
                    tracing::error!("Transfer internal error: {}", msg);
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
                }
            },

            // 503 Service Unavailable
            AppError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", Some(msg.clone()))
            }

            // 500 Internal Server Error
            AppError::BalanceStore(e) => {
                tracing::error!("Balance store error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::AuditStore(e) => {
                tracing::error!("Audit store error: {:?}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "audit_store_unavailable", None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
            AppError::Config(e) => {
                tracing::error!("Config error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", None)
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}
