// routes/auth.rs
// POST /register, POST /login -> sets the session cookie, POST /logout.

use axum::{
    extract::{Json, State},
    http::{HeaderValue, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::error::AppError;
use crate::session::{SESSION_COOKIE_NAME, SessionUser};
use crate::state::{
    AppState, SESSION_TTL_SECONDS, create_session, create_user, delete_session, get_user_by_email,
};

use super::success;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterRequest>,
) -> Result<Response, AppError> {
    let user_id = create_user(&state, &body.email, &body.username).await?;
    Ok(success("user registered", json!({ "user_id": user_id })).into_response())
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> Result<Response, AppError> {
    let user = get_user_by_email(&state, &body.email)
        .await?
        .ok_or(AppError::NotFound("user"))?;
    let user_id = user.id.ok_or(AppError::NotFound("user id"))?;

    let token = create_session(&state, &user_id).await?;
    let cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={SESSION_TTL_SECONDS}"
    );

    let mut response = success(
        "logged in",
        json!({ "user_id": user_id, "username": user.username }),
    )
    .into_response();
    if let Ok(header_value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().append(SET_COOKIE, header_value);
    }
    Ok(response)
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    session: SessionUser,
) -> Result<Response, AppError> {
    delete_session(&state, session.token()).await?;

    let cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    let mut response = success("logged out", json!({})).into_response();
    if let Ok(header_value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().append(SET_COOKIE, header_value);
    }
    Ok(response)
}
