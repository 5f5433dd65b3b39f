//! API Routes
//!
//! HTTP endpoint definitions.

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AppState;
use crate::domain::{
    Account, AccountNumber, AccountType, Currency, LedgerRecord, NewAccount, OperationContext,
};
use crate::error::{AppError, AppResult};
use crate::handlers::{
    SubmissionReceipt, SubmitTransactionCommand, TransferCommand, TransferReceipt,
};

const DEFAULT_HISTORY_LIMIT: i64 = 50;
const MAX_HISTORY_LIMIT: i64 = 500;

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub account_type: String,
    pub currency: String,
    #[serde(default)]
    pub account_number: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AccountListResponse {
    pub owner_id: Uuid,
    pub accounts: Vec<Account>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub account_number: String,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    DEFAULT_HISTORY_LIMIT
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub account_number: AccountNumber,
    pub records: Vec<LedgerRecord>,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/accounts", post(create_account).get(list_accounts))
        .route("/accounts/:account_number", get(get_account))
        .route("/transfers", post(transfer))
        .route("/transactions", post(submit_transaction))
        // Static segment wins over the :record_id capture
        .route("/transactions/history", get(transaction_history))
        .route("/transactions/:record_id", get(get_record))
}

fn principal(context: &OperationContext) -> AppResult<Uuid> {
    context
        .request_user_id
        .ok_or_else(|| AppError::MissingHeader("X-Request-User-Id".to_string()))
}

/// Load an account the principal owns
async fn owned_account(
    state: &AppState,
    principal: Uuid,
    number: &AccountNumber,
) -> AppResult<Account> {
    let account = state
        .balances
        .find_account(number)
        .await?
        .ok_or_else(|| AppError::AccountNotFound(number.to_string()))?;

    if !account.is_owned_by(principal) {
        return Err(AppError::Forbidden(
            "account does not belong to the requesting user".to_string(),
        ));
    }
    Ok(account)
}

// =========================================================================
// POST /accounts
// =========================================================================

async fn create_account(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<Account>), AppError> {
    let owner_id = principal(&context)?;

    let new = NewAccount {
        owner_id,
        account_number: request
            .account_number
            .as_deref()
            .map(AccountNumber::new)
            .transpose()?,
        account_type: request.account_type.parse::<AccountType>()?,
        currency: Currency::new(&request.currency)?,
    };

    let account = state.balances.create_account(new).await?;

    tracing::info!(
        owner_id = %owner_id,
        account_number = %account.account_number,
        currency = %account.currency,
        correlation_id = ?context.correlation_id,
        "Account opened"
    );

    Ok((StatusCode::CREATED, Json(account)))
}

// =========================================================================
// GET /accounts
// =========================================================================

async fn list_accounts(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
) -> Result<Json<AccountListResponse>, AppError> {
    let owner_id = principal(&context)?;
    let accounts = state.balances.accounts_for_owner(owner_id).await?;

    Ok(Json(AccountListResponse { owner_id, accounts }))
}

// =========================================================================
// GET /accounts/:account_number
// =========================================================================

async fn get_account(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(account_number): Path<String>,
) -> Result<Json<Account>, AppError> {
    let number = AccountNumber::new(&account_number)?;
    let account = owned_account(&state, principal(&context)?, &number).await?;
    Ok(Json(account))
}

// =========================================================================
// POST /transfers
// =========================================================================

async fn transfer(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Json(command): Json<TransferCommand>,
) -> Result<Json<TransferReceipt>, AppError> {
    let receipt = state.transfers.execute_as(command, &context).await?;
    Ok(Json(receipt))
}

// =========================================================================
// POST /transactions
// =========================================================================

async fn submit_transaction(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Json(command): Json<SubmitTransactionCommand>,
) -> Result<(StatusCode, Json<SubmissionReceipt>), AppError> {
    let receipt = state.submitter.submit(command, &context).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

// =========================================================================
// GET /transactions/history
// =========================================================================

async fn transaction_history(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    let number = AccountNumber::new(&query.account_number)?;
    owned_account(&state, principal(&context)?, &number).await?;

    let limit = query.limit.clamp(1, MAX_HISTORY_LIMIT);
    let records = state.audit.find_by_account(&number, limit).await?;

    Ok(Json(HistoryResponse {
        account_number: number,
        records,
    }))
}

// =========================================================================
// GET /transactions/:record_id
// =========================================================================

async fn get_record(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(record_id): Path<Uuid>,
) -> Result<Json<LedgerRecord>, AppError> {
    let owner_id = principal(&context)?;

    let record = state
        .audit
        .find_by_id(record_id)
        .await?
        .ok_or_else(|| AppError::RecordNotFound(record_id.to_string()))?;

    let owned = state.balances.accounts_for_owner(owner_id).await?;
    if !owned.iter().any(|account| record.involves(&account.account_number)) {
        // Indistinguishable from a missing record
        return Err(AppError::RecordNotFound(record_id.to_string()));
    }

    Ok(Json(record))
}
