// Financial accounts and the append-only transaction ledger. Account codes
// come from the same gap-reusing allocator as document ordinals; balances
// share the non-negative guard style of the inventory ledger.

use futures::stream::TryStreamExt;
use mongodb::bson::{DateTime, doc, oid::ObjectId};
use serde::Deserialize;
use std::time::SystemTime;

use crate::error::AppError;
use crate::models::{
    BankAccountType, BusinessRole, EwalletAccountType, FinancialAccount, FinancialProvider,
    LedgerTransaction, ProviderType, TransactionType,
};

use super::{
    AppState, is_duplicate_key, second_phase,
    sequence::{ALLOC_MAX_RETRIES, account_ordinal, format_account_code, next_free_number},
};

/// Providers are system-wide reference data, not tenant-scoped.
pub async fn create_provider(
    state: &AppState,
    name: &str,
    provider_type: ProviderType,
) -> Result<ObjectId, AppError> {
    if name.trim().is_empty() {
        return Err(AppError::Validation("provider name is required".into()));
    }
    if provider_type == ProviderType::Cash {
        return Err(AppError::Validation(
            "cash accounts have no provider".into(),
        ));
    }

    let existing = state
        .financial_providers
        .find_one(doc! { "name": name, "provider_type": provider_type_str(provider_type) })
        .await?;
    if existing.is_some() {
        return Err(AppError::Conflict("provider already exists".into()));
    }

    let res = state
        .financial_providers
        .insert_one(FinancialProvider {
            id: None,
            name: name.to_string(),
            provider_type,
        })
        .await?;
    res.inserted_id
        .as_object_id()
        .ok_or(AppError::NotFound("inserted provider id"))
}

pub async fn list_providers(
    state: &AppState,
    provider_type: Option<ProviderType>,
) -> Result<Vec<FinancialProvider>, AppError> {
    let filter = match provider_type {
        Some(t) => doc! { "provider_type": provider_type_str(t) },
        None => doc! {},
    };
    let mut cursor = state.financial_providers.find(filter).await?;
    let mut providers = Vec::new();
    while let Some(provider) = cursor.try_next().await? {
        providers.push(provider);
    }
    Ok(providers)
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewFinancialAccount {
    pub account_name: String,
    pub provider_type: ProviderType,
    pub provider_id: Option<ObjectId>,
    pub account_number: Option<String>,
    pub bank_account_type: Option<BankAccountType>,
    pub ewallet_account_type: Option<EwalletAccountType>,
}

/// Creates an account and mints its shortened code from the per-type series
/// (CSH001, BNK001, ...), reusing the lowest freed ordinal first. Balance
/// starts at zero; funds arrive through transactions.
pub async fn create_financial_account(
    state: &AppState,
    business_id: &ObjectId,
    caller_role: BusinessRole,
    input: NewFinancialAccount,
) -> Result<FinancialAccount, AppError> {
    if !caller_role.can_write() {
        return Err(AppError::Unauthorized("viewers cannot create accounts"));
    }
    if input.account_name.trim().is_empty() {
        return Err(AppError::Validation("account name is required".into()));
    }

    // Per-type shape rules, checked before any lookup.
    match input.provider_type {
        ProviderType::Cash => {
            if input.provider_id.is_some()
                || input.account_number.is_some()
                || input.bank_account_type.is_some()
                || input.ewallet_account_type.is_some()
            {
                return Err(AppError::Validation(
                    "cash accounts carry no provider details".into(),
                ));
            }
        }
        ProviderType::Bank => {
            if input.bank_account_type.is_none() || input.account_number.is_none() {
                return Err(AppError::Validation(
                    "bank accounts require an account number and bank account type".into(),
                ));
            }
            if input.ewallet_account_type.is_some() {
                return Err(AppError::Validation(
                    "bank accounts carry no e-wallet account type".into(),
                ));
            }
        }
        ProviderType::Ewallet => {
            if input.ewallet_account_type.is_none() {
                return Err(AppError::Validation(
                    "e-wallet accounts require an e-wallet account type".into(),
                ));
            }
            if input.bank_account_type.is_some() {
                return Err(AppError::Validation(
                    "e-wallet accounts carry no bank account type".into(),
                ));
            }
        }
    }

    // Bank and e-wallet accounts must reference a provider of their own type.
    let provider_id = match input.provider_type {
        ProviderType::Cash => None,
        _ => {
            let provider_id = input
                .provider_id
                .ok_or_else(|| AppError::Validation("provider is required".into()))?;
            let provider = state
                .financial_providers
                .find_one(doc! { "_id": provider_id })
                .await?
                .ok_or(AppError::NotFound("financial provider"))?;
            if provider.provider_type != input.provider_type {
                return Err(AppError::Validation(
                    "provider type does not match account type".into(),
                ));
            }
            Some(provider_id)
        }
    };

    for _ in 0..ALLOC_MAX_RETRIES {
        let mut used = Vec::new();
        let mut cursor = state
            .financial_accounts
            .find(doc! {
                "business_id": business_id,
                "provider_type": provider_type_str(input.provider_type),
            })
            .await?;
        while let Some(existing) = cursor.try_next().await? {
            if let Some(ordinal) = account_ordinal(&existing.shortened_code) {
                used.push(ordinal);
            }
        }

        let account = FinancialAccount {
            id: None,
            business_id: *business_id,
            shortened_code: format_account_code(input.provider_type, next_free_number(&used)),
            account_name: input.account_name.clone(),
            provider_type: input.provider_type,
            balance: 0.0,
            provider_id,
            account_number: input.account_number.clone(),
            bank_account_type: input.bank_account_type,
            ewallet_account_type: input.ewallet_account_type,
        };
        match state.financial_accounts.insert_one(&account).await {
            Ok(_) => {
                tracing::debug!(code = %account.shortened_code, "financial account created");
                return Ok(account);
            }
            Err(err) if is_duplicate_key(&err) => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Err(AppError::AllocationContended)
}

/// Shortened-code prefix routes to the provider type without a lookup.
pub async fn get_financial_account(
    state: &AppState,
    business_id: &ObjectId,
    shortened_code: &str,
) -> Result<FinancialAccount, AppError> {
    let provider_type = ProviderType::from_code(shortened_code)
        .ok_or_else(|| AppError::Validation("unknown account code prefix".into()))?;
    state
        .financial_accounts
        .find_one(doc! {
            "business_id": business_id,
            "provider_type": provider_type_str(provider_type),
            "shortened_code": shortened_code,
        })
        .await?
        .ok_or(AppError::NotFound("financial account"))
}

pub async fn list_financial_accounts(
    state: &AppState,
    business_id: &ObjectId,
    provider_type: Option<ProviderType>,
) -> Result<Vec<FinancialAccount>, AppError> {
    let filter = match provider_type {
        Some(t) => doc! { "business_id": business_id, "provider_type": provider_type_str(t) },
        None => doc! { "business_id": business_id },
    };
    let mut cursor = state.financial_accounts.find(filter).await?;
    let mut accounts = Vec::new();
    while let Some(account) = cursor.try_next().await? {
        accounts.push(account);
    }
    Ok(accounts)
}

pub async fn rename_financial_account(
    state: &AppState,
    business_id: &ObjectId,
    caller_role: BusinessRole,
    shortened_code: &str,
    account_name: &str,
) -> Result<(), AppError> {
    if !caller_role.can_write() {
        return Err(AppError::Unauthorized("viewers cannot rename accounts"));
    }
    if account_name.trim().is_empty() {
        return Err(AppError::Validation("account name is required".into()));
    }

    let res = state
        .financial_accounts
        .update_one(
            doc! { "business_id": business_id, "shortened_code": shortened_code },
            doc! { "$set": { "account_name": account_name } },
        )
        .await?;
    if res.matched_count == 0 {
        return Err(AppError::NotFound("financial account"));
    }
    Ok(())
}

/// Deletes the account record only. Its transactions stay in the ledger with
/// a dangling account reference; history is never rewritten.
pub async fn delete_financial_account(
    state: &AppState,
    business_id: &ObjectId,
    caller_role: BusinessRole,
    shortened_code: &str,
) -> Result<(), AppError> {
    if !caller_role.can_write() {
        return Err(AppError::Unauthorized("viewers cannot delete accounts"));
    }
    let res = state
        .financial_accounts
        .delete_one(doc! { "business_id": business_id, "shortened_code": shortened_code })
        .await?;
    if res.deleted_count == 0 {
        return Err(AppError::NotFound("financial account"));
    }
    Ok(())
}

/// Applies a signed amount to an account balance under the non-negative
/// guard. A rejected decrement distinguishes a vanished account from an
/// overdraw.
async fn apply_balance_delta(
    state: &AppState,
    business_id: &ObjectId,
    account_id: &ObjectId,
    delta: f64,
) -> Result<(), AppError> {
    let filter = if delta < 0.0 {
        doc! {
            "_id": account_id,
            "business_id": business_id,
            "balance": { "$gte": -delta },
        }
    } else {
        doc! { "_id": account_id, "business_id": business_id }
    };

    let res = state
        .financial_accounts
        .update_one(filter, doc! { "$inc": { "balance": delta } })
        .await?;
    if res.matched_count == 0 {
        let still_there = state
            .financial_accounts
            .find_one(doc! { "_id": account_id, "business_id": business_id })
            .await?;
        return match still_there {
            Some(_) => Err(AppError::NegativeBalance),
            None => Err(AppError::NotFound("financial account")),
        };
    }
    Ok(())
}

/// Direct signed balance adjustment without a ledger record.
pub async fn adjust_balance(
    state: &AppState,
    business_id: &ObjectId,
    caller_role: BusinessRole,
    shortened_code: &str,
    amount: f64,
) -> Result<(), AppError> {
    if !caller_role.can_write() {
        return Err(AppError::Unauthorized("viewers cannot adjust balances"));
    }

    let account = get_financial_account(state, business_id, shortened_code).await?;
    let account_id = account.id.ok_or(AppError::NotFound("financial account"))?;
    apply_balance_delta(state, business_id, &account_id, amount).await
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTransaction {
    pub transaction_type: TransactionType,
    pub amount: f64,
    pub comment: Option<String>,
    pub document_reference: Option<String>,
}

/// Records a transaction against an account. The balance moves first under
/// a non-negative guard; the ledger insert is the second phase, so a failure
/// there surfaces as `PartialCommit` with the balance already moved.
pub async fn add_transaction(
    state: &AppState,
    business_id: &ObjectId,
    caller_role: BusinessRole,
    shortened_code: &str,
    input: NewTransaction,
) -> Result<ObjectId, AppError> {
    if !caller_role.can_write() {
        return Err(AppError::Unauthorized("viewers cannot record transactions"));
    }
    if input.amount <= 0.0 {
        return Err(AppError::Validation(
            "transaction amount must be positive".into(),
        ));
    }

    let account = get_financial_account(state, business_id, shortened_code).await?;
    let account_id = account.id.ok_or(AppError::NotFound("financial account"))?;

    let delta = match input.transaction_type {
        TransactionType::Income => input.amount,
        TransactionType::Expense => -input.amount,
    };
    apply_balance_delta(state, business_id, &account_id, delta).await?;

    let insert = second_phase(
        "account balance",
        "transaction record",
        state
            .transactions
            .insert_one(LedgerTransaction {
                id: None,
                business_id: *business_id,
                financial_account_id: account_id,
                document_reference: input.document_reference,
                transaction_type: input.transaction_type,
                amount: input.amount,
                comment: input.comment.unwrap_or_else(|| "-".into()),
                created_at: DateTime::from_system_time(SystemTime::now()),
            })
            .await,
    )?;

    insert
        .inserted_id
        .as_object_id()
        .ok_or(AppError::NotFound("inserted transaction id"))
}

pub async fn get_transaction(
    state: &AppState,
    business_id: &ObjectId,
    transaction_id: &ObjectId,
) -> Result<LedgerTransaction, AppError> {
    state
        .transactions
        .find_one(doc! { "_id": transaction_id, "business_id": business_id })
        .await?
        .ok_or(AppError::NotFound("transaction"))
}

pub async fn list_transactions(
    state: &AppState,
    business_id: &ObjectId,
    account_id: Option<&ObjectId>,
) -> Result<Vec<LedgerTransaction>, AppError> {
    let filter = match account_id {
        Some(id) => doc! { "business_id": business_id, "financial_account_id": id },
        None => doc! { "business_id": business_id },
    };
    let mut cursor = state.transactions.find(filter).await?;
    let mut transactions = Vec::new();
    while let Some(transaction) = cursor.try_next().await? {
        transactions.push(transaction);
    }
    Ok(transactions)
}

fn provider_type_str(provider_type: ProviderType) -> &'static str {
    match provider_type {
        ProviderType::Cash => "cash",
        ProviderType::Bank => "bank",
        ProviderType::Ewallet => "ewallet",
    }
}
