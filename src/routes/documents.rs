// routes/documents.rs
// Document lifecycle endpoints. Creation and update take raw JSON first so
// the line-item field sets can be checked for homogeneity before
// deserialization fills in defaults.

use axum::{
    extract::{Json, Path, Query, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::AppError;
use crate::models::DocumentType;
use crate::session::SessionUser;
use crate::state::{
    AppState, DocumentUpdate, NewDocument, advance_document, create_document, delete_document,
    get_document, list_documents, settle_document, update_document,
};

use super::{parse_object_id, success};

/// Every line item in one payload must carry the same field set. A mixed
/// batch is a malformed request, rejected before any deserialization
/// default can paper over the difference.
fn check_line_item_shape(body: &Value) -> Result<(), AppError> {
    let Some(lines) = body.get("line_items").and_then(Value::as_array) else {
        return Ok(());
    };

    let mut first: Option<BTreeSet<&str>> = None;
    for line in lines {
        let Some(object) = line.as_object() else {
            return Err(AppError::Validation("line items must be objects".into()));
        };
        let keys: BTreeSet<&str> = object.keys().map(String::as_str).collect();
        match &first {
            None => first = Some(keys),
            Some(expected) if *expected == keys => {}
            Some(_) => {
                return Err(AppError::Validation(
                    "line items must share one field set".into(),
                ));
            }
        }
    }
    Ok(())
}

pub async fn document_create(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(business_id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response, AppError> {
    let business_id = parse_object_id(&business_id, "business")?;
    let scope = session.scope(&state, &business_id).await?;

    check_line_item_shape(&body)?;
    let input: NewDocument = serde_json::from_value(body)
        .map_err(|err| AppError::Validation(format!("malformed document payload: {err}")))?;

    let document = create_document(
        &state,
        &scope.business_id,
        &scope.user_id,
        scope.role,
        input,
    )
    .await?;
    Ok(success("document created", document).into_response())
}

#[derive(Deserialize)]
pub struct DocumentsQuery {
    pub document_type: Option<String>,
}

pub async fn documents_index(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(business_id): Path<String>,
    Query(query): Query<DocumentsQuery>,
) -> Result<Response, AppError> {
    let business_id = parse_object_id(&business_id, "business")?;
    let scope = session.scope(&state, &business_id).await?;

    let document_type = match query.document_type.as_deref() {
        Some("quotation") => Some(DocumentType::Quotation),
        Some("invoice") => Some(DocumentType::Invoice),
        Some("receipt") => Some(DocumentType::Receipt),
        Some("purchase_order") => Some(DocumentType::PurchaseOrder),
        Some(other) => {
            return Err(AppError::Validation(format!(
                "unknown document type {other:?}"
            )));
        }
        None => None,
    };

    let documents = list_documents(&state, &scope.business_id, document_type).await?;
    Ok(success("documents", documents).into_response())
}

pub async fn document_get(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Path((business_id, document_code)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let business_id = parse_object_id(&business_id, "business")?;
    let scope = session.scope(&state, &business_id).await?;
    let document = get_document(&state, &scope.business_id, &document_code).await?;
    Ok(success("document", document).into_response())
}

pub async fn document_advance(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Path((business_id, document_code)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let business_id = parse_object_id(&business_id, "business")?;
    let scope = session.scope(&state, &business_id).await?;
    let status = advance_document(&state, &scope.business_id, scope.role, &document_code).await?;
    Ok(success(
        "document advanced",
        json!({ "document_status": status.as_str() }),
    )
    .into_response())
}

pub async fn document_settle(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Path((business_id, document_code)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let business_id = parse_object_id(&business_id, "business")?;
    let scope = session.scope(&state, &business_id).await?;
    settle_document(&state, &scope.business_id, scope.role, &document_code).await?;
    Ok(success("document settled", json!({})).into_response())
}

pub async fn document_update(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Path((business_id, document_code)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<Response, AppError> {
    let business_id = parse_object_id(&business_id, "business")?;
    let scope = session.scope(&state, &business_id).await?;

    check_line_item_shape(&body)?;
    let update: DocumentUpdate = serde_json::from_value(body)
        .map_err(|err| AppError::Validation(format!("malformed document payload: {err}")))?;

    update_document(
        &state,
        &scope.business_id,
        scope.role,
        &document_code,
        update,
    )
    .await?;
    Ok(success("document updated", json!({})).into_response())
}

pub async fn document_delete(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Path((business_id, document_code)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let business_id = parse_object_id(&business_id, "business")?;
    let scope = session.scope(&state, &business_id).await?;
    delete_document(&state, &scope.business_id, scope.role, &document_code).await?;
    Ok(success("document deleted", json!({})).into_response())
}
