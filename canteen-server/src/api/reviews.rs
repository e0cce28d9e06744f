use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use canteen_core::query::scope_statuses;
use canteen_core::{ModerationStatus, PageInfo, Sort};

use super::stores::visible_store;
use super::types::{
    AutoCreateResponse, ImageResponse, ListQuery, Page, ReviewResponse, SubmitReviewQuery,
    SubmitReviewRequest,
};
use super::{page_request, parse_id, requested_status, review_visible, search_term};
use crate::auth::{AuthUser, CurrentCaller};
use crate::db::reviews::{self, ReviewFilter};
use crate::error::ApiError;
use crate::submission::{self, ReviewDraft};
use crate::AppState;

/// Run a review listing and wrap it in a page.
pub(crate) async fn list_page(
    state: &AppState,
    filter: ReviewFilter,
) -> Result<Json<Page<ReviewResponse>>, ApiError> {
    let page = filter.page;
    let (found, total) = state
        .db
        .run("list_reviews", move |conn| reviews::list(conn, &filter))
        .await?;
    Ok(Json(Page::new(found, PageInfo::new(page, total))))
}

/// `POST /reviews`. With `?autoCreate=true` the store is looked up by name
/// and address and created if missing; otherwise `store_id` is required.
pub async fn submit_review(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<SubmitReviewQuery>,
    payload: Result<Json<SubmitReviewRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload?;
    let draft = ReviewDraft {
        title: body.review.title,
        content: body.review.content,
        rating: body.review.rating,
    };

    if query.auto_create() {
        let created = submission::submit_with_auto_create(
            &state.db,
            user.id,
            body.store_name.as_deref().unwrap_or_default(),
            body.store_address.as_deref().unwrap_or_default(),
            draft,
        )
        .await?;
        let response = AutoCreateResponse {
            store: created.store.into(),
            review: created.review.into(),
            is_new_store: created.is_new_store,
        };
        return Ok((StatusCode::CREATED, Json(response)).into_response());
    }

    let store_id = body.store_id.ok_or_else(|| {
        ApiError::Validation("store_id is required unless autoCreate=true".to_string())
    })?;
    let review = submission::submit_review(&state.db, user.id, store_id, draft).await?;
    Ok((StatusCode::CREATED, Json(ReviewResponse::from(review))).into_response())
}

pub async fn list_reviews(
    State(state): State<Arc<AppState>>,
    CurrentCaller(caller): CurrentCaller,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<ReviewResponse>>, ApiError> {
    let store_id = match query.store_id.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => {
            let store = visible_store(&state, &caller, parse_id(raw, "store")?).await?;
            Some(store.id)
        }
        _ => None,
    };

    let filter = ReviewFilter {
        statuses: scope_statuses(&caller, requested_status(&query)),
        author_id: None,
        store_id,
        search: search_term(&query),
        sort: Sort::parse(query.sort.as_deref(), query.order.as_deref()),
        page: page_request(&query),
    };
    list_page(&state, filter).await
}

/// The caller's own reviews, in every status unless one is requested.
pub async fn my_reviews(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<ReviewResponse>>, ApiError> {
    let statuses = match requested_status(&query) {
        Some(status) => vec![status],
        None => ModerationStatus::ALL.to_vec(),
    };
    let filter = ReviewFilter {
        statuses,
        author_id: Some(user.id),
        store_id: None,
        search: search_term(&query),
        sort: Sort::parse(query.sort.as_deref(), query.order.as_deref()),
        page: page_request(&query),
    };
    list_page(&state, filter).await
}

pub async fn get_review(
    State(state): State<Arc<AppState>>,
    CurrentCaller(caller): CurrentCaller,
    Path(id): Path<String>,
) -> Result<Json<ReviewResponse>, ApiError> {
    let review_id = parse_id(&id, "review")?;
    let review = state
        .db
        .run("find_review", move |conn| reviews::find_by_id(conn, review_id))
        .await?
        .filter(|review| review_visible(review, &caller))
        .ok_or_else(|| ApiError::not_found("review"))?;
    Ok(Json(review.into()))
}

/// Multipart upload; the image is read from the `file` field.
pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ImageResponse>), ApiError> {
    let review_id = parse_id(&id, "review")?;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload").to_string();
        let bytes = field.bytes().await?;
        let image = submission::attach_image(
            &state.db,
            &state.storage,
            user.id,
            review_id,
            &filename,
            &bytes,
        )
        .await?;
        return Ok((StatusCode::CREATED, Json(image.into())));
    }

    Err(ApiError::Validation(
        "multipart field 'file' is required".to_string(),
    ))
}
