// routes/mod.rs
// Public re-exports of all route handlers.

pub mod auth;
pub mod business;
pub mod documents;
pub mod finance;
pub mod items;

pub use auth::{login, logout, register};
pub use business::{
    business_create, business_get, business_index, join_code_issue, join_redeem, member_demote,
    member_leave, member_promote_accountant, member_promote_admin, members_index,
};
pub use documents::{
    document_advance, document_create, document_delete, document_get, document_settle,
    document_update, documents_index,
};
pub use finance::{
    account_adjust, account_create, account_delete, account_get, account_rename, accounts_index,
    provider_create, providers_index, transaction_create, transaction_get, transactions_index,
};
pub use items::{item_adjust, item_create, item_delete, item_get, item_update, items_index};

use axum::Json;
use mongodb::bson::oid::ObjectId;
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::AppError;

/// Response envelope shared by every handler.
pub(crate) fn success(message: &str, content: impl Serialize) -> Json<Value> {
    Json(json!({
        "status": "success",
        "message": message,
        "content": content,
    }))
}

pub(crate) fn parse_object_id(raw: &str, what: &str) -> Result<ObjectId, AppError> {
    ObjectId::parse_str(raw).map_err(|_| AppError::Validation(format!("invalid {what} id")))
}
