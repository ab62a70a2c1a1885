// session.rs
// Session middleware to protect routes and extractor to access session data.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, StatusCode, header::COOKIE, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;

use mongodb::bson::oid::ObjectId;

use crate::error::AppError;
use crate::models::{BusinessRole, User};
use crate::state::{AppState, find_user_by_session, resolve_role};

pub const SESSION_COOKIE_NAME: &str = "session";

#[derive(Clone)]
pub struct SessionData {
    pub user_id: ObjectId,
    pub user: User,
    pub token: String,
}

pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, Response> {
    let tokens = extract_cookies(request.headers(), SESSION_COOKIE_NAME);
    if tokens.is_empty() {
        return Err(unauthorized_response());
    }

    // Try all cookies with the session name until one is valid
    let mut found = None;
    for token in tokens {
        match find_user_by_session(&state, &token).await {
            Ok(Some(user)) => {
                found = Some((user, token));
                break;
            }
            Ok(None) => continue,
            Err(_) => {
                return Err(
                    (StatusCode::INTERNAL_SERVER_ERROR, "session lookup failed").into_response()
                );
            }
        }
    }

    if let Some((user, token)) = found {
        let Some(user_id) = user.id else {
            return Err(unauthorized_response());
        };
        request.extensions_mut().insert(SessionData {
            user_id,
            user,
            token,
        });
        Ok(next.run(request).await)
    } else {
        Err(unauthorized_response())
    }
}

pub struct SessionUser(pub SessionData);

impl SessionUser {
    pub fn user(&self) -> &User {
        &self.0.user
    }

    pub fn token(&self) -> &str {
        &self.0.token
    }

    pub fn user_id(&self) -> &ObjectId {
        &self.0.user_id
    }

    /// Roster-authoritative tenant scope for this caller. The mirrored
    /// `business_roles` on the user record is not consulted.
    pub async fn scope(
        &self,
        state: &AppState,
        business_id: &ObjectId,
    ) -> Result<BusinessScope, AppError> {
        let role = resolve_role(state, business_id, self.user_id())
            .await?
            .ok_or(AppError::Unauthorized("not a member of this business"))?;
        Ok(BusinessScope {
            business_id: *business_id,
            user_id: self.0.user_id,
            role,
        })
    }
}

/// A caller bound to one tenant with their resolved roster role. Every
/// tenant-scoped handler goes through this before touching state.
#[derive(Debug, Clone, Copy)]
pub struct BusinessScope {
    pub business_id: ObjectId,
    pub user_id: ObjectId,
    pub role: BusinessRole,
}

#[allow(refining_impl_trait)]
impl<S> FromRequestParts<S> for SessionUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> BoxFuture<'static, Result<Self, Self::Rejection>> {
        let data = parts
            .extensions
            .get::<SessionData>()
            .cloned()
            .ok_or_else(unauthorized_response);

        Box::pin(async move {
            match data {
                Ok(session) => Ok(SessionUser(session)),
                Err(resp) => Err(resp),
            }
        })
    }
}

fn unauthorized_response() -> Response {
    (StatusCode::UNAUTHORIZED, "unauthorized").into_response()
}

fn extract_cookies(headers: &HeaderMap, name: &str) -> Vec<String> {
    headers
        .get_all(COOKIE)
        .into_iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let mut split = pair.trim().splitn(2, '=');
            let key = split.next()?.trim();
            let value = split.next()?.trim();
            if key == name {
                Some(value.to_owned())
            } else {
                None
            }
        })
        .collect()
}
