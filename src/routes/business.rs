// routes/business.rs
// Business creation, roster listing, join codes, and role transitions.

use axum::{
    extract::{Json, Path, Query, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::error::AppError;
use crate::models::BusinessRole;
use crate::session::SessionUser;
use crate::state::{
    AppState, create_business, demote_to_viewer, get_business, issue_join_code, leave_business,
    list_members, list_user_businesses, promote_to_accountant, promote_to_admin, redeem_join_code,
};

use super::{parse_object_id, success};

#[derive(Deserialize)]
pub struct NewBusinessRequest {
    pub name: String,
    pub branch: Option<String>,
    pub address: String,
    pub phone: String,
    pub tax_id: String,
    pub registration_number: Option<String>,
    pub logo_url: Option<String>,
}

pub async fn business_create(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewBusinessRequest>,
) -> Result<Response, AppError> {
    let business_id = create_business(
        &state,
        session.user_id(),
        &body.name,
        body.branch.as_deref(),
        &body.address,
        &body.phone,
        &body.tax_id,
        body.registration_number.as_deref().unwrap_or("-"),
        body.logo_url,
    )
    .await?;
    Ok(success("business created", json!({ "business_id": business_id })).into_response())
}

pub async fn business_index(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
) -> Result<Response, AppError> {
    let businesses = list_user_businesses(&state, session.user_id()).await?;
    Ok(success("businesses", businesses).into_response())
}

pub async fn business_get(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(business_id): Path<String>,
) -> Result<Response, AppError> {
    let business_id = parse_object_id(&business_id, "business")?;
    let scope = session.scope(&state, &business_id).await?;
    let business = get_business(&state, &scope.business_id).await?;
    Ok(success("business", business).into_response())
}

#[derive(Deserialize)]
pub struct MembersQuery {
    /// Comma-separated role names, e.g. `admin,accountant`.
    pub roles: Option<String>,
}

pub async fn members_index(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(business_id): Path<String>,
    Query(query): Query<MembersQuery>,
) -> Result<Response, AppError> {
    let business_id = parse_object_id(&business_id, "business")?;
    let scope = session.scope(&state, &business_id).await?;

    let roles = match query.roles.as_deref() {
        Some(raw) => {
            let mut roles = Vec::new();
            for name in raw.split(',') {
                roles.push(parse_role(name.trim())?);
            }
            Some(roles)
        }
        None => None,
    };

    let members = list_members(&state, &scope.business_id, roles.as_deref()).await?;
    Ok(success("members", members).into_response())
}

pub async fn join_code_issue(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(business_id): Path<String>,
) -> Result<Response, AppError> {
    let business_id = parse_object_id(&business_id, "business")?;
    let scope = session.scope(&state, &business_id).await?;
    let join_code = issue_join_code(&state, &scope.business_id, scope.role).await?;
    Ok(success(
        "join code issued",
        json!({
            "code": join_code.code,
            "expires_at": join_code.expires_at.try_to_rfc3339_string().unwrap_or_default(),
        }),
    )
    .into_response())
}

#[derive(Deserialize)]
pub struct JoinRequest {
    pub code: String,
}

pub async fn join_redeem(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Json(body): Json<JoinRequest>,
) -> Result<Response, AppError> {
    let outcome = redeem_join_code(&state, session.user_id(), &body.code).await?;
    Ok(success("joined business", outcome).into_response())
}

pub async fn member_promote_accountant(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Path((business_id, member_number)): Path<(String, u32)>,
) -> Result<Response, AppError> {
    let business_id = parse_object_id(&business_id, "business")?;
    let scope = session.scope(&state, &business_id).await?;
    promote_to_accountant(&state, &scope.business_id, scope.role, member_number).await?;
    Ok(success("member promoted to accountant", json!({})).into_response())
}

pub async fn member_promote_admin(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Path((business_id, member_number)): Path<(String, u32)>,
) -> Result<Response, AppError> {
    let business_id = parse_object_id(&business_id, "business")?;
    let scope = session.scope(&state, &business_id).await?;
    promote_to_admin(&state, &scope.business_id, scope.role, member_number).await?;
    Ok(success("admin handed over", json!({})).into_response())
}

pub async fn member_demote(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Path((business_id, member_number)): Path<(String, u32)>,
) -> Result<Response, AppError> {
    let business_id = parse_object_id(&business_id, "business")?;
    let scope = session.scope(&state, &business_id).await?;
    demote_to_viewer(&state, &scope.business_id, scope.role, member_number).await?;
    Ok(success("member demoted to viewer", json!({})).into_response())
}

pub async fn member_leave(
    session: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(business_id): Path<String>,
) -> Result<Response, AppError> {
    let business_id = parse_object_id(&business_id, "business")?;
    let scope = session.scope(&state, &business_id).await?;
    leave_business(&state, &scope.business_id, &scope.user_id).await?;
    Ok(success("left business", json!({})).into_response())
}

fn parse_role(name: &str) -> Result<BusinessRole, AppError> {
    match name {
        "admin" => Ok(BusinessRole::Admin),
        "accountant" => Ok(BusinessRole::Accountant),
        "viewer" => Ok(BusinessRole::Viewer),
        other => Err(AppError::Validation(format!("unknown role {other:?}"))),
    }
}
