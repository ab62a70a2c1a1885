// state module: AppState, initialization, and re-exports of submodules.
//
// All tenant-scoped collections carry a `business_id` field and every
// operation takes the tenant id as an explicit parameter; data is
// partitioned, schemas are not. The unique indexes created here are the
// write-time authority behind the sequence allocator's uniqueness checks.

use anyhow::Result;
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::doc,
    options::IndexOptions,
};
use std::env;

use crate::error::AppError;
use crate::models::{
    Business, Document, FinancialAccount, FinancialProvider, Item, LedgerTransaction, Session,
    User,
};

pub mod sequence;

mod documents;
mod finance;
mod inventory;
mod membership;
mod sessions;

pub use documents::*;
pub use finance::*;
pub use inventory::*;
pub use membership::*;
pub use sessions::*;

pub const SESSION_TTL_SECONDS: u64 = 60 * 60 * 24; // 1 day
pub const JOIN_CODE_TTL_SECONDS: u64 = 2 * 60;
pub const DRAFT_RETENTION_DAYS: i64 = 30;

#[derive(Clone)]
pub struct AppState {
    pub users: Collection<User>,
    pub businesses: Collection<Business>,
    pub sessions: Collection<Session>,
    pub financial_providers: Collection<FinancialProvider>,
    pub items: Collection<Item>,
    pub documents: Collection<Document>,
    pub financial_accounts: Collection<FinancialAccount>,
    pub transactions: Collection<LedgerTransaction>,
}

pub async fn init_state() -> Result<AppState> {
    let uri = env::var("MONGODB_URI").unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
    let db_name = env::var("MONGODB_DB").unwrap_or_else(|_| "bizledger".to_string());

    let client = Client::with_uri_str(uri).await?;
    let db = client.database(&db_name);

    ensure_indexes(&db).await?;

    Ok(AppState {
        users: db.collection::<User>("users"),
        businesses: db.collection::<Business>("businesses"),
        sessions: db.collection::<Session>("sessions"),
        financial_providers: db.collection::<FinancialProvider>("financial_providers"),
        items: db.collection::<Item>("items"),
        documents: db.collection::<Document>("documents"),
        financial_accounts: db.collection::<FinancialAccount>("financial_accounts"),
        transactions: db.collection::<LedgerTransaction>("transactions"),
    })
}

async fn ensure_indexes(db: &Database) -> Result<()> {
    let unique = IndexOptions::builder().unique(true).build();

    db.collection::<User>("users")
        .create_index(
            IndexModel::builder()
                .keys(doc! { "email": 1 })
                .options(unique.clone())
                .build(),
        )
        .await?;

    db.collection::<Business>("businesses")
        .create_index(
            IndexModel::builder()
                .keys(doc! { "name": 1, "branch": 1 })
                .options(unique.clone())
                .build(),
        )
        .await?;

    db.collection::<Item>("items")
        .create_index(
            IndexModel::builder()
                .keys(doc! { "business_id": 1, "name": 1 })
                .options(unique.clone())
                .build(),
        )
        .await?;

    // Document codes are permanently unique per (tenant, type). Concurrent
    // allocations of the same gap are rejected here and retried.
    db.collection::<Document>("documents")
        .create_index(
            IndexModel::builder()
                .keys(doc! { "business_id": 1, "document_type": 1, "document_code": 1 })
                .options(unique.clone())
                .build(),
        )
        .await?;

    db.collection::<FinancialAccount>("financial_accounts")
        .create_index(
            IndexModel::builder()
                .keys(doc! { "business_id": 1, "provider_type": 1, "shortened_code": 1 })
                .options(unique.clone())
                .build(),
        )
        .await?;

    db.collection::<Session>("sessions")
        .create_index(
            IndexModel::builder()
                .keys(doc! { "token": 1 })
                .options(unique)
                .build(),
        )
        .await?;

    Ok(())
}

/// True when a write was rejected by a unique index.
pub(crate) fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};
    match &*err.kind {
        ErrorKind::Write(WriteFailure::WriteError(write_err)) => write_err.code == 11000,
        ErrorKind::Command(command_err) => command_err.code == 11000,
        _ => false,
    }
}

/// Wraps the result of the second write of a two-phase pair. Phase one has
/// already committed, so a failure here is a `PartialCommit` that names both
/// steps; the caller (or an operator) resumes from the pending step instead
/// of rerunning the whole operation.
pub(crate) fn second_phase<T>(
    committed: &'static str,
    pending: &'static str,
    result: mongodb::error::Result<T>,
) -> Result<T, AppError> {
    result.map_err(|err| {
        tracing::error!(committed, pending, error = %err, "second phase of two-record write failed");
        AppError::PartialCommit {
            committed,
            pending,
            detail: err.to_string(),
        }
    })
}

/// Same as `second_phase` but for updates that matched no document: the
/// mirrored record is missing, which is the detectable inconsistency the
/// two-phase contract promises to surface.
pub(crate) fn second_phase_missing(
    committed: &'static str,
    pending: &'static str,
) -> AppError {
    tracing::error!(committed, pending, "second phase of two-record write matched no document");
    AppError::PartialCommit {
        committed,
        pending,
        detail: "mirrored record not found".to_string(),
    }
}
