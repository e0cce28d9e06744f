//! Idempotency gate for submission endpoints.
//!
//! A request carrying an `Idempotency-Key` header runs at most once per
//! (user, key) while its record is live. Repeats either wait their turn
//! (429 while the first is still running) or get the first response
//! replayed verbatim. Requests without the header pass straight through.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Response, StatusCode};
use axum::middleware::Next;
use axum::response::IntoResponse;
use canteen_core::Caller;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::MAX_JSON_BODY_BYTES;
use crate::db::idempotency::{ClaimOutcome, StoredResponse};
use crate::error::ApiError;
use crate::AppState;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const REPLAYED_HEADER: &str = "idempotent-replayed";
pub const MAX_KEY_LEN: usize = 128;

/// SHA-256 of the raw body, hex encoded.
pub fn hash_body(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn replay(stored: StoredResponse) -> Response<Body> {
    let status = StatusCode::from_u16(stored.status).unwrap_or(StatusCode::OK);
    let mut response = Response::new(Body::from(stored.body));
    *response.status_mut() = status;
    if let Some(value) = stored
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    response
        .headers_mut()
        .insert(REPLAYED_HEADER, HeaderValue::from_static("true"));
    response
}

/// Middleware enforcing at-most-once execution per idempotency key.
pub async fn idempotency_gate(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response<Body> {
    match gate(&state, request, next).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn gate(state: &AppState, request: Request, next: Next) -> Result<Response<Body>, ApiError> {
    let Some(key) = request.headers().get(IDEMPOTENCY_KEY_HEADER) else {
        return Ok(next.run(request).await);
    };
    let key = key
        .to_str()
        .map(str::trim)
        .map_err(|_| ApiError::Validation("Idempotency-Key must be visible ASCII".to_string()))?
        .to_string();
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(ApiError::Validation(format!(
            "Idempotency-Key must be between 1 and {MAX_KEY_LEN} characters"
        )));
    }

    let user_id = request
        .extensions()
        .get::<Caller>()
        .and_then(Caller::user_id)
        .ok_or_else(|| ApiError::Unauthorized("authentication required".to_string()))?;

    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_JSON_BODY_BYTES).await.map_err(|_| {
        ApiError::PayloadTooLarge(format!("request body exceeds {MAX_JSON_BODY_BYTES} bytes"))
    })?;
    let request_hash = hash_body(&bytes);

    let claimed_at = match state
        .db
        .try_claim_idempotency_key(user_id, &key, &request_hash, state.config.idempotency_ttl_secs)
        .await?
    {
        ClaimOutcome::Claimed { claimed_at } => claimed_at,
        ClaimOutcome::InProgress => {
            return Err(ApiError::InProgress(
                "request with this key is already in progress".to_string(),
            ));
        }
        ClaimOutcome::HashMismatch => {
            return Err(ApiError::Validation(
                "Idempotency-Key was already used for a different request".to_string(),
            ));
        }
        ClaimOutcome::Completed(stored) => {
            info!("Replaying response for idempotency key {} of user {}", key, user_id);
            return Ok(replay(stored));
        }
    };

    let response = next.run(Request::from_parts(parts, Body::from(bytes))).await;

    if !response.status().is_success() {
        release(state, user_id, &key, claimed_at).await;
        return Ok(response);
    }

    let (parts, body) = response.into_parts();
    let body = match to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(e) => {
            error!("Failed to buffer response for idempotency key {}: {}", key, e);
            release(state, user_id, &key, claimed_at).await;
            return Err(ApiError::Internal(e.to_string()));
        }
    };

    let stored = StoredResponse {
        status: parts.status.as_u16(),
        content_type: parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: body.to_vec(),
    };
    match state
        .db
        .complete_idempotency_key(user_id, &key, claimed_at, stored)
        .await
    {
        Ok(true) => {}
        Ok(false) => warn!(
            "Idempotency key {} expired and was reclaimed before completion",
            key
        ),
        // The write already committed; the record stays in progress until it
        // expires.
        Err(e) => error!("Failed to complete idempotency key {}: {}", key, e),
    }

    Ok(Response::from_parts(parts, Body::from(body)))
}

/// Release this request's claim. A claim that expired and was taken over is
/// left to its new owner.
async fn release(state: &AppState, user_id: Uuid, key: &str, claimed_at: i64) {
    match state
        .db
        .release_idempotency_key(user_id, key, claimed_at)
        .await
    {
        Ok(true) => {}
        Ok(false) => warn!("Idempotency key {} was reclaimed before release", key),
        Err(e) => warn!("Failed to release idempotency key {}: {}", key, e),
    }
}
