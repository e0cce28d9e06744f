use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use canteen_core::query::scope_statuses;
use canteen_core::{PageInfo, Sort};
use uuid::Uuid;

use super::types::{
    CreateStoreRequest, ListQuery, Page, ReviewBody, ReviewResponse, StoreResponse,
    UpdateReviewRequest,
};
use super::{page_request, parse_id, requested_status, search_term, store_visible};
use crate::auth::{AuthUser, CurrentCaller};
use crate::db::reviews::ReviewFilter;
use crate::db::stores::{self, StoreFilter};
use crate::effects::spawn_effects;
use crate::error::ApiError;
use crate::model::Store;
use crate::submission::{self, Remover, ReviewDraft, ReviewPatch, StoreDraft};
use crate::AppState;

/// Load a live store the caller may see; anything else is 404.
pub(crate) async fn visible_store(
    state: &AppState,
    caller: &canteen_core::Caller,
    store_id: Uuid,
) -> Result<Store, ApiError> {
    state
        .db
        .run("find_store", move |conn| stores::find_by_id(conn, store_id))
        .await?
        .filter(|store| store_visible(store, caller))
        .ok_or_else(|| ApiError::not_found("store"))
}

pub async fn create_store(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    payload: Result<Json<CreateStoreRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<StoreResponse>), ApiError> {
    let Json(body) = payload?;
    let store = submission::create_store(
        &state.db,
        user.id,
        user.caller.is_admin(),
        StoreDraft {
            name: body.name,
            address: body.address,
            category: body.category,
            phone: body.phone,
            description: body.description,
        },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(store.into())))
}

pub async fn list_stores(
    State(state): State<Arc<AppState>>,
    CurrentCaller(caller): CurrentCaller,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<StoreResponse>>, ApiError> {
    let filter = StoreFilter {
        statuses: scope_statuses(&caller, requested_status(&query)),
        search: search_term(&query),
        category: query
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string),
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

pub async fn get_store(
    State(state): State<Arc<AppState>>,
    CurrentCaller(caller): CurrentCaller,
    Path(id): Path<String>,
) -> Result<Json<StoreResponse>, ApiError> {
    let store = visible_store(&state, &caller, parse_id(&id, "store")?).await?;
    Ok(Json(store.into()))
}

pub async fn list_reviews(
    State(state): State<Arc<AppState>>,
    CurrentCaller(caller): CurrentCaller,
    Path(id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<ReviewResponse>>, ApiError> {
    let store = visible_store(&state, &caller, parse_id(&id, "store")?).await?;
    let filter = ReviewFilter {
        statuses: scope_statuses(&caller, requested_status(&query)),
        author_id: None,
        store_id: Some(store.id),
        search: search_term(&query),
        sort: Sort::parse(query.sort.as_deref(), query.order.as_deref()),
        page: page_request(&query),
    };
    super::reviews::list_page(&state, filter).await
}

pub async fn submit_review(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
    payload: Result<Json<ReviewBody>, JsonRejection>,
) -> Result<(StatusCode, Json<ReviewResponse>), ApiError> {
    let store_id = parse_id(&id, "store")?;
    let Json(body) = payload?;
    let review = submission::submit_review(
        &state.db,
        user.id,
        store_id,
        ReviewDraft {
            title: body.title,
            content: body.content,
            rating: body.rating,
        },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(review.into())))
}

pub async fn update_review(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((id, review_id)): Path<(String, String)>,
    payload: Result<Json<UpdateReviewRequest>, JsonRejection>,
) -> Result<Json<ReviewResponse>, ApiError> {
    let store_id = parse_id(&id, "store")?;
    let review_id = parse_id(&review_id, "review")?;
    let Json(body) = payload?;

    let committed = submission::update_review(
        &state.db,
        user.id,
        Some(store_id),
        review_id,
        ReviewPatch {
            title: body.title,
            content: body.content,
            rating: body.rating,
        },
    )
    .await?;
    spawn_effects(&state.effects(), committed.effects);
    Ok(Json(committed.value.into()))
}

pub async fn delete_review(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((id, review_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let store_id = parse_id(&id, "store")?;
    let review_id = parse_id(&review_id, "review")?;

    let committed =
        submission::delete_review(&state.db, Remover::Author(user.id), Some(store_id), review_id)
            .await?;
    spawn_effects(&state.effects(), committed.effects);
    Ok(StatusCode::NO_CONTENT)
}
