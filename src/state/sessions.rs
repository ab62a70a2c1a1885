use data_encoding::BASE32_NOPAD;
use mongodb::bson::{DateTime, doc, oid::ObjectId};
use rand::RngCore;
use std::time::{Duration, SystemTime};

use crate::error::AppError;
use crate::models::{Session, User};

use super::{AppState, SESSION_TTL_SECONDS};

/// Issues a fresh bearer token for the user, revoking any prior sessions.
pub async fn create_session(state: &AppState, user_id: &ObjectId) -> Result<String, AppError> {
    let _ = state
        .sessions
        .delete_many(doc! { "user_id": user_id })
        .await;

    let mut token_bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut token_bytes);
    let token = BASE32_NOPAD.encode(&token_bytes);

    let expires_at =
        DateTime::from_system_time(SystemTime::now() + Duration::from_secs(SESSION_TTL_SECONDS));

    state
        .sessions
        .insert_one(Session {
            id: None,
            token: token.clone(),
            user_id: *user_id,
            expires_at,
        })
        .await?;

    Ok(token)
}

/// Resolves a token to its user, lazily deleting the session if expired.
pub async fn find_user_by_session(
    state: &AppState,
    token: &str,
) -> Result<Option<User>, AppError> {
    if let Some(session) = state.sessions.find_one(doc! { "token": token }).await? {
        if session.expires_at.to_system_time() <= SystemTime::now() {
            let _ = state.sessions.delete_one(doc! { "token": token }).await;
            return Ok(None);
        }
        Ok(state
            .users
            .find_one(doc! { "_id": session.user_id })
            .await?)
    } else {
        Ok(None)
    }
}

pub async fn delete_session(state: &AppState, token: &str) -> Result<(), AppError> {
    let _ = state.sessions.delete_one(doc! { "token": token }).await?;
    Ok(())
}
