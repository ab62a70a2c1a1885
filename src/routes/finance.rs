// routes/finance.rs
// Providers, financial accounts, and the transaction ledger.

use axum::{
    extract::{Json, Path, Query, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::error::AppError;
use crate::models::ProviderType;
use crate::session::SessionUser;
use crate::state::{
    AppState, NewFinancialAccount, NewTransaction, add_transaction, adjust_balance,
    create_financial_account, create_provider, delete_financial_account, get_financial_account,
    get_transaction, list_financial_accounts, list_providers, list_transactions,
    rename_financial_account,
};

use super::{parse_object_id, success};

#[derive(Deserialize)]
pub struct NewProviderRequest {
    pub name: String,
    pub provider_type: ProviderType,
}

pub async fn provider_create(
    _session: SessionUser,
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewProviderRequest>,
) -> Result<Response, AppError> {
    let provider_id = create_provider(&state, &body.name, body.provider_type).await?;
    Ok(success("provider created", json!({ "provider_id": provider_id })).into_response())
}

#[derive(Deserialize)]
pub struct ProvidersQuery {
    pub provider_type: Option<String>,
}

pub async fn providers_index(
    _session: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProvidersQuery>,
) -> Result<Response, AppError> {
    let provider_type = parse_provider_type(query.provider_type.as_deref())?;
    let providers = list_providers(&state, provider_type).await?;
    Ok(success("providers", providers).into_response())
}

pub async fn account_create(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(business_id): Path<String>,
    Json(body): Json<NewFinancialAccount>,
) -> Result<Response, AppError> {
    let business_id = parse_object_id(&business_id, "business")?;
    let scope = session.scope(&state, &business_id).await?;
    let account = create_financial_account(&state, &scope.business_id, scope.role, body).await?;
    Ok(success("account created", account).into_response())
}

pub async fn accounts_index(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(business_id): Path<String>,
    Query(query): Query<ProvidersQuery>,
) -> Result<Response, AppError> {
    let business_id = parse_object_id(&business_id, "business")?;
    let scope = session.scope(&state, &business_id).await?;
    let provider_type = parse_provider_type(query.provider_type.as_deref())?;
    let accounts = list_financial_accounts(&state, &scope.business_id, provider_type).await?;
    Ok(success("accounts", accounts).into_response())
}

pub async fn account_get(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Path((business_id, shortened_code)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let business_id = parse_object_id(&business_id, "business")?;
    let scope = session.scope(&state, &business_id).await?;
    let account = get_financial_account(&state, &scope.business_id, &shortened_code).await?;
    Ok(success("account", account).into_response())
}

#[derive(Deserialize)]
pub struct RenameRequest {
    pub account_name: String,
}

pub async fn account_rename(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Path((business_id, shortened_code)): Path<(String, String)>,
    Json(body): Json<RenameRequest>,
) -> Result<Response, AppError> {
    let business_id = parse_object_id(&business_id, "business")?;
    let scope = session.scope(&state, &business_id).await?;
    rename_financial_account(
        &state,
        &scope.business_id,
        scope.role,
        &shortened_code,
        &body.account_name,
    )
    .await?;
    Ok(success("account renamed", json!({})).into_response())
}

pub async fn account_delete(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Path((business_id, shortened_code)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let business_id = parse_object_id(&business_id, "business")?;
    let scope = session.scope(&state, &business_id).await?;
    delete_financial_account(&state, &scope.business_id, scope.role, &shortened_code).await?;
    Ok(success("account deleted", json!({})).into_response())
}

#[derive(Deserialize)]
pub struct AdjustBalanceRequest {
    pub amount: f64,
}

pub async fn account_adjust(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Path((business_id, shortened_code)): Path<(String, String)>,
    Json(body): Json<AdjustBalanceRequest>,
) -> Result<Response, AppError> {
    let business_id = parse_object_id(&business_id, "business")?;
    let scope = session.scope(&state, &business_id).await?;
    adjust_balance(
        &state,
        &scope.business_id,
        scope.role,
        &shortened_code,
        body.amount,
    )
    .await?;
    Ok(success("balance adjusted", json!({})).into_response())
}

pub async fn transaction_create(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Path((business_id, shortened_code)): Path<(String, String)>,
    Json(body): Json<NewTransaction>,
) -> Result<Response, AppError> {
    let business_id = parse_object_id(&business_id, "business")?;
    let scope = session.scope(&state, &business_id).await?;
    let transaction_id = add_transaction(
        &state,
        &scope.business_id,
        scope.role,
        &shortened_code,
        body,
    )
    .await?;
    Ok(success(
        "transaction recorded",
        json!({ "transaction_id": transaction_id }),
    )
    .into_response())
}

#[derive(Deserialize)]
pub struct TransactionsQuery {
    pub account_id: Option<String>,
}

pub async fn transactions_index(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(business_id): Path<String>,
    Query(query): Query<TransactionsQuery>,
) -> Result<Response, AppError> {
    let business_id = parse_object_id(&business_id, "business")?;
    let scope = session.scope(&state, &business_id).await?;
    let account_id = match query.account_id.as_deref() {
        Some(raw) => Some(parse_object_id(raw, "account")?),
        None => None,
    };
    let transactions =
        list_transactions(&state, &scope.business_id, account_id.as_ref()).await?;
    Ok(success("transactions", transactions).into_response())
}

pub async fn transaction_get(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Path((business_id, transaction_id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let business_id = parse_object_id(&business_id, "business")?;
    let transaction_id = parse_object_id(&transaction_id, "transaction")?;
    let scope = session.scope(&state, &business_id).await?;
    let transaction = get_transaction(&state, &scope.business_id, &transaction_id).await?;
    Ok(success("transaction", transaction).into_response())
}

fn parse_provider_type(raw: Option<&str>) -> Result<Option<ProviderType>, AppError> {
    match raw {
        Some("cash") => Ok(Some(ProviderType::Cash)),
        Some("bank") => Ok(Some(ProviderType::Bank)),
        Some("ewallet") => Ok(Some(ProviderType::Ewallet)),
        Some(other) => Err(AppError::Validation(format!(
            "unknown provider type {other:?}"
        ))),
        None => Ok(None),
    }
}
