// routes/items.rs
// Inventory item CRUD and direct stock adjustment.

use axum::{
    extract::{Json, Path, Query, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::error::AppError;
use crate::models::ItemType;
use crate::session::SessionUser;
use crate::state::{
    AppState, adjust_quantity, create_item, delete_item, get_item, list_items, update_item,
};

use super::{parse_object_id, success};

#[derive(Deserialize)]
pub struct NewItemRequest {
    pub name: String,
    pub description: Option<String>,
    pub item_type: ItemType,
    #[serde(default)]
    pub quantity: i64,
    pub price: f64,
    pub unit: Option<String>,
    pub img_url: Option<String>,
}

pub async fn item_create(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(business_id): Path<String>,
    Json(body): Json<NewItemRequest>,
) -> Result<Response, AppError> {
    let business_id = parse_object_id(&business_id, "business")?;
    let scope = session.scope(&state, &business_id).await?;
    let item_id = create_item(
        &state,
        &scope.business_id,
        scope.role,
        &body.name,
        body.description.as_deref().unwrap_or("-"),
        body.item_type,
        body.quantity,
        body.price,
        body.unit.as_deref().unwrap_or("-"),
        body.img_url,
    )
    .await?;
    Ok(success("item created", json!({ "item_id": item_id })).into_response())
}

#[derive(Deserialize)]
pub struct ItemsQuery {
    pub item_type: Option<String>,
}

pub async fn items_index(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(business_id): Path<String>,
    Query(query): Query<ItemsQuery>,
) -> Result<Response, AppError> {
    let business_id = parse_object_id(&business_id, "business")?;
    let scope = session.scope(&state, &business_id).await?;

    let types = match query.item_type.as_deref() {
        Some("goods") => Some(vec![ItemType::Goods]),
        Some("service") => Some(vec![ItemType::Service]),
        Some(other) => {
            return Err(AppError::Validation(format!("unknown item type {other:?}")));
        }
        None => None,
    };

    let items = list_items(&state, &scope.business_id, types.as_deref()).await?;
    Ok(success("items", items).into_response())
}

pub async fn item_get(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Path((business_id, item_id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let business_id = parse_object_id(&business_id, "business")?;
    let item_id = parse_object_id(&item_id, "item")?;
    let scope = session.scope(&state, &business_id).await?;
    let item = get_item(&state, &scope.business_id, &item_id).await?;
    Ok(success("item", item).into_response())
}

#[derive(Deserialize)]
pub struct UpdateItemRequest {
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub unit: Option<String>,
    pub img_url: Option<String>,
}

pub async fn item_update(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Path((business_id, item_id)): Path<(String, String)>,
    Json(body): Json<UpdateItemRequest>,
) -> Result<Response, AppError> {
    let business_id = parse_object_id(&business_id, "business")?;
    let item_id = parse_object_id(&item_id, "item")?;
    let scope = session.scope(&state, &business_id).await?;
    update_item(
        &state,
        &scope.business_id,
        scope.role,
        &item_id,
        &body.name,
        body.description.as_deref().unwrap_or("-"),
        body.price,
        body.unit.as_deref().unwrap_or("-"),
        body.img_url,
    )
    .await?;
    Ok(success("item updated", json!({})).into_response())
}

#[derive(Deserialize)]
pub struct AdjustRequest {
    pub delta: i64,
}

pub async fn item_adjust(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Path((business_id, item_id)): Path<(String, String)>,
    Json(body): Json<AdjustRequest>,
) -> Result<Response, AppError> {
    let business_id = parse_object_id(&business_id, "business")?;
    let item_id = parse_object_id(&item_id, "item")?;
    let scope = session.scope(&state, &business_id).await?;
    adjust_quantity(&state, &scope.business_id, scope.role, &item_id, body.delta).await?;
    Ok(success("quantity adjusted", json!({})).into_response())
}

pub async fn item_delete(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Path((business_id, item_id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let business_id = parse_object_id(&business_id, "business")?;
    let item_id = parse_object_id(&item_id, "item")?;
    let scope = session.scope(&state, &business_id).await?;
    delete_item(&state, &scope.business_id, scope.role, &item_id).await?;
    Ok(success("item deleted", json!({})).into_response())
}
