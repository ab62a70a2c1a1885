// Document lifecycle: creation, numbering, and the status state machine
// draft -> wait_for_response -> completed (quotations and receipts skip the
// response phase). Settlement is the only transition that touches the
// inventory ledger, and it runs inventory first, status second.

use chrono::{DateTime as ChronoDateTime, Utc};
use futures::stream::TryStreamExt;
use mongodb::bson::{DateTime, Regex, doc, oid::ObjectId};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::{Duration, SystemTime};

use crate::error::AppError;
use crate::models::{
    AuthorInfo, BusinessInfo, BusinessRole, ContactInfo, Document, DocumentStatus, DocumentType,
    LineItem,
};

use super::{
    AppState, DRAFT_RETENTION_DAYS, StockDelta, apply_stock_deltas, is_duplicate_key,
    second_phase, second_phase_missing,
    sequence::{ALLOC_MAX_RETRIES, daily_ordinal, format_daily_code, format_explicit_code, next_free_number},
};

#[derive(Debug, Clone, Deserialize)]
pub struct NewDocument {
    pub document_type: DocumentType,
    /// Manually chosen number; bypasses the daily series but must still be
    /// unique within (tenant, type).
    pub document_number: Option<u64>,
    pub create_date: ChronoDateTime<Utc>,
    pub expire_date: ChronoDateTime<Utc>,
    pub contact_info: ContactInfo,
    pub line_items: Vec<LineItem>,
    pub remark: Option<String>,
    pub quotation_ref: Option<String>,
    pub invoice_ref: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentUpdate {
    pub create_date: ChronoDateTime<Utc>,
    pub expire_date: ChronoDateTime<Utc>,
    pub contact_info: ContactInfo,
    pub line_items: Vec<LineItem>,
    pub remark: Option<String>,
}

/// Invoice payment terms, in whole days between creation and expiry.
/// Recomputed on every draft edit from the edited dates.
pub fn credit_days(create: ChronoDateTime<Utc>, expire: ChronoDateTime<Utc>) -> i64 {
    (expire - create).num_days()
}

fn validate_dates(
    create: ChronoDateTime<Utc>,
    expire: ChronoDateTime<Utc>,
) -> Result<(), AppError> {
    if expire < create {
        return Err(AppError::Validation(
            "expire date must not precede create date".into(),
        ));
    }
    Ok(())
}

/// Returns the document total, the sum of line totals.
fn validate_line_items(line_items: &[LineItem]) -> Result<f64, AppError> {
    if line_items.is_empty() {
        return Err(AppError::Validation("at least one line item is required".into()));
    }
    for line in line_items {
        if line.quantity < 1 {
            return Err(AppError::Validation(
                "line item quantity must be at least 1".into(),
            ));
        }
        if line.price_per_unit < 0.0 || line.total_cost < 0.0 || line.tax_rate < 0.0 {
            return Err(AppError::Validation(
                "line item amounts must be non-negative".into(),
            ));
        }
    }
    Ok(line_items.iter().map(|l| l.total_cost).sum())
}

/// Every referenced item must belong to this tenant. A document may list the
/// same item on several lines, so existence is counted over distinct ids.
async fn ensure_items_exist(
    state: &AppState,
    business_id: &ObjectId,
    line_items: &[LineItem],
) -> Result<(), AppError> {
    let distinct: BTreeSet<ObjectId> = line_items.iter().map(|l| l.item_id).collect();
    let item_ids: Vec<ObjectId> = distinct.into_iter().collect();
    let mut found = 0usize;
    let mut cursor = state
        .items
        .find(doc! { "_id": { "$in": &item_ids }, "business_id": business_id })
        .await?;
    while cursor.try_next().await?.is_some() {
        found += 1;
    }
    if found < item_ids.len() {
        return Err(AppError::NotFound("line item"));
    }
    Ok(())
}

pub async fn create_document(
    state: &AppState,
    business_id: &ObjectId,
    author_id: &ObjectId,
    caller_role: BusinessRole,
    input: NewDocument,
) -> Result<Document, AppError> {
    if !caller_role.can_write() {
        return Err(AppError::Unauthorized("viewers cannot create documents"));
    }

    validate_dates(input.create_date, input.expire_date)?;
    let total_cost = validate_line_items(&input.line_items)?;

    ensure_items_exist(state, business_id, &input.line_items).await?;

    let business = super::get_business(state, business_id).await?;
    let author = state
        .users
        .find_one(doc! { "_id": author_id })
        .await?
        .ok_or(AppError::NotFound("author"))?;

    let business_info = BusinessInfo {
        name: format!("{} ({})", business.name, business.branch),
        address: business.address,
        tax_id: business.tax_id,
        logo_url: business.logo_url,
        phone: business.phone,
    };
    let author_info = AuthorInfo {
        user_id: *author_id,
        name: author.username,
        email: author.email,
    };

    let credit = match input.document_type {
        DocumentType::Invoice => Some(credit_days(input.create_date, input.expire_date)),
        _ => None,
    };
    let quotation_ref = match input.document_type {
        DocumentType::Invoice => Some(input.quotation_ref.unwrap_or_else(|| "-".into())),
        _ => None,
    };
    let invoice_ref = match input.document_type {
        DocumentType::Receipt => Some(input.invoice_ref.unwrap_or_else(|| "-".into())),
        _ => None,
    };

    let draft_expire_at = DateTime::from_system_time(
        SystemTime::now() + Duration::from_secs(DRAFT_RETENTION_DAYS as u64 * 24 * 60 * 60),
    );

    let build = |document_code: String| Document {
        id: None,
        business_id: *business_id,
        document_type: input.document_type,
        document_code,
        document_status: DocumentStatus::Draft,
        business_info: business_info.clone(),
        author_info: author_info.clone(),
        contact_info: input.contact_info.clone(),
        remark: input.remark.clone().unwrap_or_else(|| "-".into()),
        line_items: input.line_items.clone(),
        total_cost,
        create_date: DateTime::from_chrono(input.create_date),
        expire_date: DateTime::from_chrono(input.expire_date),
        draft_expire_at: Some(draft_expire_at),
        response_received_at: None,
        credit_days: credit,
        quotation_ref: quotation_ref.clone(),
        invoice_ref: invoice_ref.clone(),
    };

    if let Some(number) = input.document_number {
        if number > 99_999_999_999 {
            return Err(AppError::Validation(
                "document number exceeds eleven digits".into(),
            ));
        }
        let code = format_explicit_code(input.document_type, number);
        let document = build(code);
        return match state.documents.insert_one(&document).await {
            Ok(_) => Ok(document),
            Err(err) if is_duplicate_key(&err) => {
                Err(AppError::Conflict("document number is taken".into()))
            }
            Err(err) => Err(err.into()),
        };
    }

    // Daily series: recompute the gap and re-insert on a write-time
    // collision, the unique index being the actual check.
    let day = input.create_date.date_naive();
    let series_prefix = format!(
        "^{}{}",
        input.document_type.prefix(),
        day.format("%Y%m%d")
    );
    for _ in 0..ALLOC_MAX_RETRIES {
        let mut used = Vec::new();
        let mut cursor = state
            .documents
            .find(doc! {
                "business_id": business_id,
                "document_type": doc_type_str(input.document_type),
                "document_code": Regex { pattern: series_prefix.clone(), options: String::new() },
            })
            .await?;
        while let Some(existing) = cursor.try_next().await? {
            if let Some(ordinal) = daily_ordinal(&existing.document_code) {
                used.push(ordinal);
            }
        }

        let ordinal = next_free_number(&used);
        let document = build(format_daily_code(input.document_type, day, ordinal));
        match state.documents.insert_one(&document).await {
            Ok(_) => {
                tracing::debug!(code = %document.document_code, "document created");
                return Ok(document);
            }
            Err(err) if is_duplicate_key(&err) => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Err(AppError::AllocationContended)
}

/// draft -> wait_for_response for invoices and purchase orders,
/// draft -> completed for quotations and receipts. Clears the draft
/// retention timestamp either way.
pub async fn advance_document(
    state: &AppState,
    business_id: &ObjectId,
    caller_role: BusinessRole,
    document_code: &str,
) -> Result<DocumentStatus, AppError> {
    if !caller_role.can_write() {
        return Err(AppError::Unauthorized("viewers cannot advance documents"));
    }

    let document = get_document(state, business_id, document_code).await?;
    if document.document_status != DocumentStatus::Draft {
        return Err(AppError::Invariant(
            "only draft documents can be advanced".into(),
        ));
    }

    let target = document.document_type.advance_target();
    let res = state
        .documents
        .update_one(
            doc! {
                "business_id": business_id,
                "document_code": document_code,
                "document_status": DocumentStatus::Draft.as_str(),
            },
            doc! {
                "$set": { "document_status": target.as_str() },
                "$unset": { "draft_expire_at": "" },
            },
        )
        .await?;
    if res.matched_count == 0 {
        return Err(AppError::Conflict("document changed concurrently".into()));
    }
    Ok(target)
}

/// wait_for_response -> completed. Invoices decrement stock after verifying
/// every line has cover; purchase orders add stock unconditionally. The
/// inventory write commits first; a status write failure afterwards is a
/// `PartialCommit`.
pub async fn settle_document(
    state: &AppState,
    business_id: &ObjectId,
    caller_role: BusinessRole,
    document_code: &str,
) -> Result<(), AppError> {
    if !caller_role.can_write() {
        return Err(AppError::Unauthorized("viewers cannot settle documents"));
    }

    let document = get_document(state, business_id, document_code).await?;
    if !document.document_type.settles_inventory() {
        return Err(AppError::Invariant(
            "this document type does not settle inventory".into(),
        ));
    }
    if document.document_status != DocumentStatus::WaitForResponse {
        return Err(AppError::Invariant(
            "only documents waiting for a response can be settled".into(),
        ));
    }

    let sign: i64 = match document.document_type {
        DocumentType::Invoice => -1,
        DocumentType::PurchaseOrder => 1,
        _ => unreachable!("settles_inventory checked above"),
    };
    let deltas: Vec<StockDelta> = document
        .line_items
        .iter()
        .map(|line| StockDelta {
            item_id: line.item_id,
            delta: sign * line.quantity,
        })
        .collect();

    // Phase one: the invariant-checking inventory write.
    apply_stock_deltas(state, business_id, &deltas).await?;

    // Phase two: the derivative status write.
    let res = second_phase(
        "inventory deltas",
        "document status",
        state
            .documents
            .update_one(
                doc! {
                    "business_id": business_id,
                    "document_code": document_code,
                    "document_status": DocumentStatus::WaitForResponse.as_str(),
                },
                doc! { "$set": {
                    "document_status": DocumentStatus::Completed.as_str(),
                    "response_received_at": DateTime::from_system_time(SystemTime::now()),
                } },
            )
            .await,
    )?;
    if res.matched_count == 0 {
        return Err(second_phase_missing("inventory deltas", "document status"));
    }

    tracing::info!(code = document_code, "document settled");
    Ok(())
}

/// Replaces the editable fields of a draft. Invoice credit is recomputed
/// from the edited dates.
pub async fn update_document(
    state: &AppState,
    business_id: &ObjectId,
    caller_role: BusinessRole,
    document_code: &str,
    update: DocumentUpdate,
) -> Result<(), AppError> {
    if !caller_role.can_write() {
        return Err(AppError::Unauthorized("viewers cannot edit documents"));
    }

    let document = get_document(state, business_id, document_code).await?;
    if document.document_status != DocumentStatus::Draft {
        return Err(AppError::Invariant(
            "only draft documents can be edited".into(),
        ));
    }

    validate_dates(update.create_date, update.expire_date)?;
    let total_cost = validate_line_items(&update.line_items)?;
    ensure_items_exist(state, business_id, &update.line_items).await?;

    let line_items: Vec<_> = update
        .line_items
        .iter()
        .map(|l| {
            doc! {
                "item_id": l.item_id,
                "name": &l.name,
                "quantity": l.quantity,
                "price_per_unit": l.price_per_unit,
                "tax_rate": l.tax_rate,
                "total_cost": l.total_cost,
            }
        })
        .collect();

    let mut set = doc! {
        "contact_info": {
            "business_name": &update.contact_info.business_name,
            "name": &update.contact_info.name,
            "address": &update.contact_info.address,
            "tax_id": &update.contact_info.tax_id,
            "phone": &update.contact_info.phone,
            "email": &update.contact_info.email,
        },
        "line_items": line_items,
        "total_cost": total_cost,
        "remark": update.remark.unwrap_or_else(|| "-".into()),
        "create_date": DateTime::from_chrono(update.create_date),
        "expire_date": DateTime::from_chrono(update.expire_date),
    };
    if document.document_type == DocumentType::Invoice {
        set.insert(
            "credit_days",
            credit_days(update.create_date, update.expire_date),
        );
    }

    let res = state
        .documents
        .update_one(
            doc! {
                "business_id": business_id,
                "document_code": document_code,
                "document_status": DocumentStatus::Draft.as_str(),
            },
            doc! { "$set": set },
        )
        .await?;
    if res.matched_count == 0 {
        return Err(AppError::Conflict("document left draft concurrently".into()));
    }
    Ok(())
}

pub async fn delete_document(
    state: &AppState,
    business_id: &ObjectId,
    caller_role: BusinessRole,
    document_code: &str,
) -> Result<(), AppError> {
    if !caller_role.can_write() {
        return Err(AppError::Unauthorized("viewers cannot delete documents"));
    }

    let document = get_document(state, business_id, document_code).await?;
    if document.document_status != DocumentStatus::Draft {
        return Err(AppError::Invariant(
            "only draft documents can be deleted".into(),
        ));
    }

    let res = state
        .documents
        .delete_one(doc! {
            "business_id": business_id,
            "document_code": document_code,
            "document_status": DocumentStatus::Draft.as_str(),
        })
        .await?;
    if res.deleted_count == 0 {
        return Err(AppError::Conflict("document left draft concurrently".into()));
    }
    Ok(())
}

/// Code prefix routes to the document type without a lookup.
pub async fn get_document(
    state: &AppState,
    business_id: &ObjectId,
    document_code: &str,
) -> Result<Document, AppError> {
    let doc_type = DocumentType::from_code(document_code)
        .ok_or_else(|| AppError::Validation("unknown document code prefix".into()))?;
    state
        .documents
        .find_one(doc! {
            "business_id": business_id,
            "document_type": doc_type_str(doc_type),
            "document_code": document_code,
        })
        .await?
        .ok_or(AppError::NotFound("document"))
}

pub async fn list_documents(
    state: &AppState,
    business_id: &ObjectId,
    document_type: Option<DocumentType>,
) -> Result<Vec<Document>, AppError> {
    let filter = match document_type {
        Some(t) => doc! { "business_id": business_id, "document_type": doc_type_str(t) },
        None => doc! { "business_id": business_id },
    };
    let mut cursor = state.documents.find(filter).await?;
    let mut documents = Vec::new();
    while let Some(document) = cursor.try_next().await? {
        documents.push(document);
    }
    Ok(documents)
}

fn doc_type_str(doc_type: DocumentType) -> &'static str {
    match doc_type {
        DocumentType::Quotation => "quotation",
        DocumentType::Invoice => "invoice",
        DocumentType::Receipt => "receipt",
        DocumentType::PurchaseOrder => "purchase_order",
    }
}
