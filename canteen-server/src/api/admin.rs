//! Administrator endpoints. Every handler takes an [`AdminUser`], so
//! anonymous callers get 401 and regular users 403.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use canteen_core::{Decision, ModerationStatus, PageInfo, Sort};
use tracing::info;

use super::reviews::list_page;
use super::types::{ListQuery, ModerationRequest, Page, ReviewResponse, StoreResponse};
use super::{page_request, parse_id, search_term};
use crate::auth::AdminUser;
use crate::db::reviews::ReviewFilter;
use crate::db::stores::{self, StoreFilter};
use crate::effects::spawn_effects;
use crate::error::ApiError;
use crate::moderation;
use crate::submission::{self, Remover};
use crate::AppState;

pub async fn pending_reviews(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<ReviewResponse>>, ApiError> {
    let filter = ReviewFilter {
        statuses: vec![ModerationStatus::Pending],
        author_id: None,
        store_id: None,
        search: search_term(&query),
        sort: Sort::parse(query.sort.as_deref(), query.order.as_deref()),
        page: page_request(&query),
    };
    list_page(&state, filter).await
}

pub async fn pending_stores(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<StoreResponse>>, ApiError> {
    let filter = StoreFilter {
        statuses: vec![ModerationStatus::Pending],
        search: search_term(&query),
        category: None,
        sort: Sort::parse(query.sort.as_deref(), query.order.as_deref()),
        page: page_request(&query),
    };
    let page = filter.page;
    let (found, total) = state
        .db
        .run("search_stores", move |conn| stores::search(conn, &filter))
        .await?;
    Ok(Json(Page::new(found, PageInfo::new(page, total))))
}

pub async fn moderate_review(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    Path(id): Path<String>,
    payload: Result<Json<ModerationRequest>, JsonRejection>,
) -> Result<Json<ReviewResponse>, ApiError> {
    let review_id = parse_id(&id, "review")?;
    let Json(body) = payload?;
    let decision = Decision::from_request(body.status, body.reason.as_deref())?;

    let committed = moderation::moderate_review(&state.db, review_id, decision).await?;
    info!("Admin {} set review {} to {}", admin.id, review_id, committed.value.status);
    spawn_effects(&state.effects(), committed.effects);
    Ok(Json(committed.value.into()))
}

pub async fn moderate_store(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    Path(id): Path<String>,
    payload: Result<Json<ModerationRequest>, JsonRejection>,
) -> Result<Json<StoreResponse>, ApiError> {
    let store_id = parse_id(&id, "store")?;
    let Json(body) = payload?;
    let decision = Decision::from_request(body.status, body.reason.as_deref())?;

    let store = moderation::moderate_store(&state.db, store_id, decision).await?;
    info!("Admin {} set store {} to {}", admin.id, store_id, store.status);
    Ok(Json(store.into()))
}

pub async fn delete_review(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let review_id = parse_id(&id, "review")?;
    let committed = submission::delete_review(&state.db, Remover::Admin, None, review_id).await?;
    spawn_effects(&state.effects(), committed.effects);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_store(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let store_id = parse_id(&id, "store")?;
    let committed = moderation::delete_store(&state.db, store_id).await?;
    spawn_effects(&state.effects(), committed.effects);
    Ok(StatusCode::NO_CONTENT)
}
