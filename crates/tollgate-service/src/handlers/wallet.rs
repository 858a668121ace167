//! Wallet provisioning, balance, and transaction handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rust_decimal::Decimal;
use tollgate_core::{CreditTransaction, Plan, TransactionId, UserId, Wallet};
use tollgate_store::Store;

use crate::auth::{AuthUser, ServiceAuth};
use crate::error::ApiError;
use crate::state::AppState;

// ============================================================================
// Wallet
// ============================================================================

/// Wallet response.
#[derive(Debug, Serialize)]
pub struct WalletResponse {
    /// Owning user.
    pub user_id: String,
    /// Subscription plan.
    pub plan: String,
    /// Current credit balance.
    pub balance: i64,
    /// Monthly credit allowance.
    pub monthly_quota: i64,
    /// End of the current period, if periodic.
    pub period_end: Option<String>,
    /// Subscription status.
    pub status: String,
    /// Creation timestamp.
    pub created_at: String,
}

impl From<&Wallet> for WalletResponse {
    fn from(wallet: &Wallet) -> Self {
        Self {
            user_id: wallet.user_id.to_string(),
            plan: wallet.plan.as_str().to_string(),
            balance: wallet.balance,
            monthly_quota: wallet.monthly_quota,
            period_end: wallet.period_end.map(|end| end.to_rfc3339()),
            status: format!("{:?}", wallet.status).to_lowercase(),
            created_at: wallet.created_at.to_rfc3339(),
        }
    }
}

/// Wallet provisioning request.
#[derive(Debug, Deserialize)]
pub struct CreateWalletRequest {
    /// The user to provision.
    pub user_id: UserId,
    /// Subscription plan.
    pub plan: Plan,
    /// Monthly quota override; defaults per plan.
    pub monthly_quota: Option<i64>,
    /// End of the first subscription period, if periodic.
    pub period_end: Option<DateTime<Utc>>,
}

const fn default_quota(plan: Plan) -> i64 {
    match plan {
        Plan::Starter => 500,
        Plan::Pro => 2_000,
        Plan::Studio => 10_000,
    }
}

/// Provision a wallet for a user (service auth).
pub async fn create_wallet(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Json(req): Json<CreateWalletRequest>,
) -> Result<Json<WalletResponse>, ApiError> {
    if state.store.get_wallet(&req.user_id)?.is_some() {
        return Err(ApiError::Conflict(format!(
            "wallet already exists: {}",
            req.user_id
        )));
    }

    let quota = req.monthly_quota.unwrap_or_else(|| default_quota(req.plan));
    if quota < 0 {
        return Err(ApiError::BadRequest("monthly_quota must be >= 0".into()));
    }

    let wallet = Wallet::new(req.user_id, req.plan, quota, req.period_end);
    state.store.put_wallet(&wallet)?;
    tracing::info!(
        user_id = %req.user_id,
        plan = req.plan.as_str(),
        quota,
        "wallet provisioned"
    );

    Ok(Json(WalletResponse::from(&wallet)))
}

/// Get the calling user's wallet.
pub async fn get_wallet(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<WalletResponse>, ApiError> {
    let wallet = state
        .store
        .get_wallet(&auth.user_id)?
        .ok_or_else(|| ApiError::NotFound("wallet not found".into()))?;

    Ok(Json(WalletResponse::from(&wallet)))
}

// ============================================================================
// Transactions
// ============================================================================

/// Transaction list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    /// Maximum number of transactions to return (default: 50).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// Transaction response.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    /// Transaction ID (the upstream request id for usage debits).
    pub id: String,
    /// Credit delta (negative = usage debit, positive = grant).
    pub delta: i64,
    /// USD amount the transaction represents.
    pub usd_spend: String,
    /// Model or grant label.
    pub model: String,
    /// Timestamp.
    pub created_at: String,
}

impl From<&CreditTransaction> for TransactionResponse {
    fn from(tx: &CreditTransaction) -> Self {
        Self {
            id: tx.tx_id.to_string(),
            delta: tx.delta,
            usd_spend: tx.usd_spend.to_string(),
            model: tx.model_name.clone(),
            created_at: tx.created_at.to_rfc3339(),
        }
    }
}

/// List transactions response.
#[derive(Debug, Serialize)]
pub struct ListTransactionsResponse {
    /// Transactions (newest first).
    pub transactions: Vec<TransactionResponse>,
    /// Whether there are more transactions.
    pub has_more: bool,
}

/// List the calling user's transaction history.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<ListTransactionsResponse>, ApiError> {
    state
        .store
        .get_wallet(&auth.user_id)?
        .ok_or_else(|| ApiError::NotFound("wallet not found".into()))?;

    // Fetch one more than requested to determine has_more
    let limit = query.limit.min(100);
    let transactions =
        state
            .store
            .list_transactions_by_user(&auth.user_id, limit + 1, query.offset)?;

    let has_more = transactions.len() > limit;
    let transactions: Vec<_> = transactions
        .iter()
        .take(limit)
        .map(TransactionResponse::from)
        .collect();

    Ok(Json(ListTransactionsResponse {
        transactions,
        has_more,
    }))
}

// ============================================================================
// Credit Grants
// ============================================================================

/// Credit grant request.
#[derive(Debug, Deserialize)]
pub struct AddCreditsRequest {
    /// The user to credit.
    pub user_id: UserId,
    /// Credits to grant (must be positive).
    pub credits: i64,
    /// Grant label for the ledger row.
    #[serde(default = "default_grant_label")]
    pub label: String,
    /// Caller-supplied idempotency key (e.g. a payment-order id). A grant
    /// replayed under the same id is applied only once.
    #[serde(default)]
    pub tx_id: Option<String>,
}

fn default_grant_label() -> String {
    "credit grant".to_string()
}

/// Credit grant response.
#[derive(Debug, Serialize)]
pub struct AddCreditsResponse {
    /// Balance after the grant.
    pub new_balance: i64,
}

/// Grant credits to a user (service auth).
pub async fn add_credits(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Json(req): Json<AddCreditsRequest>,
) -> Result<Json<AddCreditsResponse>, ApiError> {
    if req.credits <= 0 {
        return Err(ApiError::BadRequest("credits must be positive".into()));
    }

    let ledger = state.gate.ledger();
    let new_balance = match req.tx_id {
        Some(raw) => {
            let tx_id = TransactionId::from_request_id(raw)
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            ledger.insert_transaction(
                req.user_id,
                tx_id,
                req.credits,
                Decimal::ZERO,
                &req.label,
            )?
        }
        None => ledger.credit(&req.user_id, req.credits, &req.label)?,
    };

    Ok(Json(AddCreditsResponse { new_balance }))
}

// ============================================================================
// Price Table
// ============================================================================

/// Price table invalidation response.
#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    /// Whether a cached table was dropped.
    pub invalidated: bool,
}

/// Drop the cached price table (service auth).
///
/// A no-op when the spend-log cost source is active.
pub async fn invalidate_price_table(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
) -> Json<InvalidateResponse> {
    match &state.oracle {
        Some(oracle) => {
            oracle.invalidate().await;
            Json(InvalidateResponse { invalidated: true })
        }
        None => Json(InvalidateResponse { invalidated: false }),
    }
}
