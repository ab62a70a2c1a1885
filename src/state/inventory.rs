// Inventory ledger: on-hand quantities per item within a business.
// Quantity is never observed negative; batch settlement is all-or-nothing.

use futures::stream::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId};

use crate::error::AppError;
use crate::models::{BusinessRole, Item, ItemType};

use super::{AppState, is_duplicate_key};

/// One signed quantity adjustment within a settlement batch.
#[derive(Debug, Clone)]
pub struct StockDelta {
    pub item_id: ObjectId,
    pub delta: i64,
}

/// Applies a batch of signed deltas to `quantity_on_hand`, all or nothing.
///
/// Every delta is verified against a fresh read before any item is touched;
/// the writes themselves are additionally guarded so a concurrent decrement
/// between verify and write cannot push an item below zero. If a guard
/// rejects a write mid-batch, the already-applied deltas are reversed and
/// the batch fails with `InsufficientStock` naming the offending item.
pub async fn apply_stock_deltas(
    state: &AppState,
    business_id: &ObjectId,
    deltas: &[StockDelta],
) -> Result<(), AppError> {
    // Verify the whole batch first: no item may be mutated if any single
    // delta would violate the non-negative invariant.
    for delta in deltas {
        let item = state
            .items
            .find_one(doc! { "_id": delta.item_id, "business_id": business_id })
            .await?
            .ok_or(AppError::NotFound("item"))?;
        if item.quantity_on_hand + delta.delta < 0 {
            return Err(AppError::InsufficientStock {
                item_id: delta.item_id,
            });
        }
    }

    let mut applied: Vec<&StockDelta> = Vec::new();
    for delta in deltas {
        let filter = if delta.delta < 0 {
            doc! {
                "_id": delta.item_id,
                "business_id": business_id,
                "quantity_on_hand": { "$gte": -delta.delta },
            }
        } else {
            doc! { "_id": delta.item_id, "business_id": business_id }
        };

        match state
            .items
            .update_one(filter, doc! { "$inc": { "quantity_on_hand": delta.delta } })
            .await
        {
            Ok(res) if res.matched_count == 1 => applied.push(delta),
            Ok(_) => {
                // Lost a race since the verify pass; undo and reject.
                return rollback(
                    state,
                    business_id,
                    &applied,
                    AppError::InsufficientStock {
                        item_id: delta.item_id,
                    },
                )
                .await;
            }
            Err(err) => {
                return rollback(state, business_id, &applied, AppError::Storage(err)).await;
            }
        }
    }

    Ok(())
}

/// Reverses already-applied deltas after a mid-batch failure. A failed
/// reversal leaves the ledger half-adjusted, which is surfaced as
/// `PartialCommit` so the caller can compensate instead of retrying blind.
async fn rollback(
    state: &AppState,
    business_id: &ObjectId,
    applied: &[&StockDelta],
    cause: AppError,
) -> Result<(), AppError> {
    for delta in applied.iter().rev() {
        if let Err(err) = state
            .items
            .update_one(
                doc! { "_id": delta.item_id, "business_id": business_id },
                doc! { "$inc": { "quantity_on_hand": -delta.delta } },
            )
            .await
        {
            tracing::error!(item = %delta.item_id, error = %err, "stock rollback failed");
            return Err(AppError::PartialCommit {
                committed: "partial stock deltas",
                pending: "stock delta rollback",
                detail: err.to_string(),
            });
        }
    }
    Err(cause)
}

#[allow(clippy::too_many_arguments)]
pub async fn create_item(
    state: &AppState,
    business_id: &ObjectId,
    caller_role: BusinessRole,
    name: &str,
    description: &str,
    item_type: ItemType,
    quantity: i64,
    price: f64,
    unit: &str,
    img_url: Option<String>,
) -> Result<ObjectId, AppError> {
    if !caller_role.can_write() {
        return Err(AppError::Unauthorized("viewers cannot create items"));
    }
    if name.trim().is_empty() {
        return Err(AppError::Validation("item name is required".into()));
    }
    if price < 0.0 {
        return Err(AppError::Validation("price must be non-negative".into()));
    }
    if quantity < 0 {
        return Err(AppError::Validation("quantity must be non-negative".into()));
    }

    // Services have no stock to track and no unit.
    let (quantity, unit) = match item_type {
        ItemType::Service => (1, "-".to_string()),
        ItemType::Goods => (quantity, unit.to_string()),
    };

    let res = state
        .items
        .insert_one(Item {
            id: None,
            business_id: *business_id,
            name: name.to_string(),
            description: description.to_string(),
            item_type,
            quantity_on_hand: quantity,
            price,
            unit,
            img_url: img_url.unwrap_or_else(|| "-".to_string()),
        })
        .await
        .map_err(|err| {
            if is_duplicate_key(&err) {
                AppError::Conflict("item name already exists".into())
            } else {
                AppError::Storage(err)
            }
        })?;

    res.inserted_id
        .as_object_id()
        .ok_or(AppError::NotFound("inserted item id"))
}

#[allow(clippy::too_many_arguments)]
pub async fn update_item(
    state: &AppState,
    business_id: &ObjectId,
    caller_role: BusinessRole,
    item_id: &ObjectId,
    name: &str,
    description: &str,
    price: f64,
    unit: &str,
    img_url: Option<String>,
) -> Result<(), AppError> {
    if !caller_role.can_write() {
        return Err(AppError::Unauthorized("viewers cannot update items"));
    }
    if name.trim().is_empty() {
        return Err(AppError::Validation("item name is required".into()));
    }
    if price < 0.0 {
        return Err(AppError::Validation("price must be non-negative".into()));
    }

    let item = get_item(state, business_id, item_id).await?;
    let unit = match item.item_type {
        ItemType::Service => "-".to_string(),
        ItemType::Goods => unit.to_string(),
    };

    let duplicate = state
        .items
        .find_one(doc! {
            "business_id": business_id,
            "name": name,
            "_id": { "$ne": item_id },
        })
        .await?;
    if duplicate.is_some() {
        return Err(AppError::Conflict("item name already exists".into()));
    }

    state
        .items
        .update_one(
            doc! { "_id": item_id, "business_id": business_id },
            doc! { "$set": {
                "name": name,
                "description": description,
                "price": price,
                "unit": unit,
                "img_url": img_url.unwrap_or_else(|| "-".to_string()),
            } },
        )
        .await?;
    Ok(())
}

/// Direct signed adjustment of a single item's on-hand quantity, guarded
/// against going negative.
pub async fn adjust_quantity(
    state: &AppState,
    business_id: &ObjectId,
    caller_role: BusinessRole,
    item_id: &ObjectId,
    delta: i64,
) -> Result<(), AppError> {
    if !caller_role.can_write() {
        return Err(AppError::Unauthorized("viewers cannot adjust stock"));
    }

    // Existence first so a missing item is NotFound, not InsufficientStock.
    let _ = get_item(state, business_id, item_id).await?;

    apply_stock_deltas(
        state,
        business_id,
        &[StockDelta {
            item_id: *item_id,
            delta,
        }],
    )
    .await
}

pub async fn delete_item(
    state: &AppState,
    business_id: &ObjectId,
    caller_role: BusinessRole,
    item_id: &ObjectId,
) -> Result<(), AppError> {
    if !caller_role.can_write() {
        return Err(AppError::Unauthorized("viewers cannot delete items"));
    }
    state
        .items
        .delete_one(doc! { "_id": item_id, "business_id": business_id })
        .await?;
    Ok(())
}

pub async fn get_item(
    state: &AppState,
    business_id: &ObjectId,
    item_id: &ObjectId,
) -> Result<Item, AppError> {
    state
        .items
        .find_one(doc! { "_id": item_id, "business_id": business_id })
        .await?
        .ok_or(AppError::NotFound("item"))
}

pub async fn list_items(
    state: &AppState,
    business_id: &ObjectId,
    item_types: Option<&[ItemType]>,
) -> Result<Vec<Item>, AppError> {
    let filter = match item_types {
        Some(types) => {
            let names: Vec<&str> = types
                .iter()
                .map(|t| match t {
                    ItemType::Goods => "goods",
                    ItemType::Service => "service",
                })
                .collect();
            doc! { "business_id": business_id, "item_type": { "$in": names } }
        }
        None => doc! { "business_id": business_id },
    };

    let mut cursor = state.items.find(filter).await?;
    let mut items = Vec::new();
    while let Some(item) = cursor.try_next().await? {
        items.push(item);
    }
    Ok(items)
}
