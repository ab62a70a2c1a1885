#[path = "common/mod.rs"]
mod common;

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    middleware,
    routing::{get, post},
};
use serde_json::{Value, json};
use tower::ServiceExt; // for oneshot

use bizledger::{
    routes,
    session::{SESSION_COOKIE_NAME, require_session},
    state::AppState,
};

fn build_app(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/logout", post(routes::logout))
        .route(
            "/businesses",
            get(routes::business_index).post(routes::business_create),
        )
        .route("/businesses/{business_id}", get(routes::business_get))
        .route("/businesses/{business_id}/members", get(routes::members_index))
        .route("/businesses/{business_id}/join-code", post(routes::join_code_issue))
        .route("/join", post(routes::join_redeem))
        .route(
            "/businesses/{business_id}/items",
            get(routes::items_index).post(routes::item_create),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ));

    Router::new()
        .route("/register", post(routes::register))
        .route("/login", post(routes::login))
        .merge(protected)
        .with_state(state)
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    cookie: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value, Option<String>) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = cookie {
        builder = builder.header(header::COOKIE, format!("{SESSION_COOKIE_NAME}={token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| {
            raw.split(';')
                .next()
                .and_then(|pair| pair.split_once('='))
                .map(|(_, token)| token.to_string())
        });
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        json!(null)
    } else {
        serde_json::from_slice(&bytes).unwrap_or(json!(null))
    };
    (status, value, set_cookie)
}

async fn login(app: &Router, email: &str, username: &str) -> String {
    let (status, _, _) = send(
        app,
        "POST",
        "/register",
        None,
        Some(json!({ "email": email, "username": username })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, token) = send(
        app,
        "POST",
        "/login",
        None,
        Some(json!({ "email": email })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    token.expect("login sets the session cookie")
}

#[tokio::test]
async fn protected_routes_require_a_session() {
    let ctx = match common::setup_state().await {
        Some(s) => s,
        None => return,
    };
    let app = build_app(Arc::new(ctx.state.clone()));

    let (status, _, _) = send(&app, "GET", "/businesses", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = send(&app, "GET", "/businesses", Some("bogus"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    common::teardown(Some(ctx)).await;
}

#[tokio::test]
async fn business_and_membership_flow_over_http() {
    let ctx = match common::setup_state().await {
        Some(s) => s,
        None => return,
    };
    let app = build_app(Arc::new(ctx.state.clone()));

    let admin = login(&app, "admin@http.test", "admin").await;
    let viewer = login(&app, "viewer@http.test", "viewer").await;

    let (status, body, _) = send(
        &app,
        "POST",
        "/businesses",
        Some(&admin),
        Some(json!({
            "name": "Http Co",
            "address": "1 Wire road",
            "phone": "0812345678",
            "tax_id": "1234567890123",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    let business_id = body["content"]["business_id"]["$oid"]
        .as_str()
        .expect("business id in response")
        .to_string();

    let (status, body, _) = send(
        &app,
        "POST",
        &format!("/businesses/{business_id}/join-code"),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let code = body["content"]["code"].as_str().unwrap().to_string();

    let (status, body, _) = send(
        &app,
        "POST",
        "/join",
        Some(&viewer),
        Some(json!({ "code": code })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"]["member_number"], 2);

    let (status, body, _) = send(
        &app,
        "GET",
        &format!("/businesses/{business_id}/members"),
        Some(&viewer),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"].as_array().unwrap().len(), 2);

    // Viewers hit the role gate on writes: 403 with the error envelope.
    let (status, body, _) = send(
        &app,
        "POST",
        &format!("/businesses/{business_id}/items"),
        Some(&viewer),
        Some(json!({
            "name": "Widget",
            "item_type": "goods",
            "quantity": 5,
            "price": 10.0,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["status"], "error");
    assert_eq!(body["kind"], "unauthorized");

    // The admin can create the item.
    let (status, _, _) = send(
        &app,
        "POST",
        &format!("/businesses/{business_id}/items"),
        Some(&admin),
        Some(json!({
            "name": "Widget",
            "item_type": "goods",
            "quantity": 5,
            "price": 10.0,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // A stranger with a session but no roster slot gets the same gate.
    let stranger = login(&app, "stranger@http.test", "stranger").await;
    let (status, body, _) = send(
        &app,
        "GET",
        &format!("/businesses/{business_id}"),
        Some(&stranger),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "unauthorized");

    common::teardown(Some(ctx)).await;
}

#[tokio::test]
async fn logout_invalidates_the_session() {
    let ctx = match common::setup_state().await {
        Some(s) => s,
        None => return,
    };
    let app = build_app(Arc::new(ctx.state.clone()));

    let token = login(&app, "bye@http.test", "bye").await;
    let (status, _, _) = send(&app, "GET", "/businesses", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(&app, "POST", "/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(&app, "GET", "/businesses", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    common::teardown(Some(ctx)).await;
}
