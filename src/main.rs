// main.rs
// Axum server wiring: initializes MongoDB state, builds the router, and
// serves on :8080.
//
// Public endpoints:
// - POST /register             -> create a user account
// - POST /login                -> start a session, sets the session cookie
// Everything else requires a session; tenant-scoped routes are nested under
// /businesses/{business_id} and resolve the caller's roster role per request.

use axum::{
    Router, middleware,
    routing::{get, post},
};
use dotenvy::dotenv;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use bizledger::{routes, session, state};

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let state = Arc::new(
        state::init_state()
            .await
            .expect("failed to initialize MongoDB state"),
    );

    let protected = Router::new()
        .route("/logout", post(routes::logout))
        .route(
            "/businesses",
            get(routes::business_index).post(routes::business_create),
        )
        .route("/businesses/{business_id}", get(routes::business_get))
        .route("/businesses/{business_id}/members", get(routes::members_index))
        .route(
            "/businesses/{business_id}/members/{member_number}/promote",
            post(routes::member_promote_accountant),
        )
        .route(
            "/businesses/{business_id}/members/{member_number}/promote-admin",
            post(routes::member_promote_admin),
        )
        .route(
            "/businesses/{business_id}/members/{member_number}/demote",
            post(routes::member_demote),
        )
        .route("/businesses/{business_id}/join-code", post(routes::join_code_issue))
        .route("/businesses/{business_id}/leave", post(routes::member_leave))
        .route("/join", post(routes::join_redeem))
        .route(
            "/businesses/{business_id}/items",
            get(routes::items_index).post(routes::item_create),
        )
        .route(
            "/businesses/{business_id}/items/{item_id}",
            get(routes::item_get),
        )
        .route(
            "/businesses/{business_id}/items/{item_id}/update",
            post(routes::item_update),
        )
        .route(
            "/businesses/{business_id}/items/{item_id}/adjust",
            post(routes::item_adjust),
        )
        .route(
            "/businesses/{business_id}/items/{item_id}/delete",
            post(routes::item_delete),
        )
        .route(
            "/businesses/{business_id}/documents",
            get(routes::documents_index).post(routes::document_create),
        )
        .route(
            "/businesses/{business_id}/documents/{document_code}",
            get(routes::document_get),
        )
        .route(
            "/businesses/{business_id}/documents/{document_code}/advance",
            post(routes::document_advance),
        )
        .route(
            "/businesses/{business_id}/documents/{document_code}/settle",
            post(routes::document_settle),
        )
        .route(
            "/businesses/{business_id}/documents/{document_code}/update",
            post(routes::document_update),
        )
        .route(
            "/businesses/{business_id}/documents/{document_code}/delete",
            post(routes::document_delete),
        )
        .route(
            "/providers",
            get(routes::providers_index).post(routes::provider_create),
        )
        .route(
            "/businesses/{business_id}/accounts",
            get(routes::accounts_index).post(routes::account_create),
        )
        .route(
            "/businesses/{business_id}/accounts/{shortened_code}",
            get(routes::account_get),
        )
        .route(
            "/businesses/{business_id}/accounts/{shortened_code}/rename",
            post(routes::account_rename),
        )
        .route(
            "/businesses/{business_id}/accounts/{shortened_code}/adjust",
            post(routes::account_adjust),
        )
        .route(
            "/businesses/{business_id}/accounts/{shortened_code}/delete",
            post(routes::account_delete),
        )
        .route(
            "/businesses/{business_id}/accounts/{shortened_code}/transactions",
            post(routes::transaction_create),
        )
        .route(
            "/businesses/{business_id}/transactions",
            get(routes::transactions_index),
        )
        .route(
            "/businesses/{business_id}/transactions/{transaction_id}",
            get(routes::transaction_get),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            session::require_session,
        ));

    let app = Router::new()
        .route("/register", post(routes::register))
        .route("/login", post(routes::login))
        .merge(protected)
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    tracing::info!("listening on http://{addr}");
    let listener = TcpListener::bind(addr).await.expect("failed to bind");
    axum::serve(listener, app).await.expect("server error");
}
