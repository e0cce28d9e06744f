//! HTTP routes.

pub mod admin;
pub mod reviews;
pub mod stores;
pub mod types;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use canteen_core::query::normalize_search;
use canteen_core::{Caller, ModerationStatus, PageRequest};
use tower::ServiceBuilder;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::auth::attach_caller;
use crate::error::ApiError;
use crate::idempotency::idempotency_gate;
use crate::model::{Review, Store};
use crate::AppState;
use types::{HealthResponse, ListQuery};

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: crate::get_version().to_string(),
    })
}

/// Build the full application router.
pub fn router(state: Arc<AppState>) -> Router {
    let gate = from_fn_with_state(state.clone(), idempotency_gate);

    Router::new()
        .route("/health", get(health_check))
        .route(
            "/stores",
            post(stores::create_store)
                .route_layer(gate.clone())
                .get(stores::list_stores),
        )
        .route("/stores/:id", get(stores::get_store))
        .route(
            "/stores/:id/reviews",
            post(stores::submit_review)
                .route_layer(gate.clone())
                .get(stores::list_reviews),
        )
        .route(
            "/stores/:id/reviews/:review_id",
            axum::routing::patch(stores::update_review).delete(stores::delete_review),
        )
        .route(
            "/reviews",
            post(reviews::submit_review)
                .route_layer(gate)
                .get(reviews::list_reviews),
        )
        .route("/reviews/me", get(reviews::my_reviews))
        .route("/reviews/:id", get(reviews::get_review))
        .route(
            "/reviews/:id/images",
            post(reviews::upload_image)
                .layer(DefaultBodyLimit::max(state.config.max_upload_bytes)),
        )
        .route("/admin/reviews/pending", get(admin::pending_reviews))
        .route("/admin/stores/pending", get(admin::pending_stores))
        .route("/admin/reviews/:id/status", put(admin::moderate_review))
        .route("/admin/stores/:id/status", put(admin::moderate_store))
        .route(
            "/admin/reviews/:id",
            axum::routing::delete(admin::delete_review),
        )
        .route("/admin/stores/:id", axum::routing::delete(admin::delete_store))
        .layer(from_fn_with_state(state.clone(), attach_caller))
        .nest_service("/uploads", ServeDir::new(&state.config.upload_dir))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Parse a path id; malformed ids are reported as not found.
pub(crate) fn parse_id(raw: &str, what: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::not_found(what))
}

pub(crate) fn page_request(query: &ListQuery) -> PageRequest {
    PageRequest::parse(
        query.page.as_deref(),
        query.page_size.as_deref().or(query.limit.as_deref()),
    )
}

/// Unknown statuses are ignored like any other malformed list parameter.
pub(crate) fn requested_status(query: &ListQuery) -> Option<ModerationStatus> {
    query.status.as_deref().and_then(|s| s.parse().ok())
}

pub(crate) fn search_term(query: &ListQuery) -> Option<String> {
    normalize_search(query.q.as_deref())
}

/// Approved stores are public; others are visible to their creator and
/// administrators only.
pub(crate) fn store_visible(store: &Store, caller: &Caller) -> bool {
    store.status == ModerationStatus::Approved || caller.is_admin() || caller.is(store.created_by)
}

/// Approved reviews are public; others are visible to their author and
/// administrators only.
pub(crate) fn review_visible(review: &Review, caller: &Caller) -> bool {
    review.status == ModerationStatus::Approved
        || caller.is_admin()
        || caller.is(review.author_id)
}
