//! Bearer-token authentication.
//!
//! [`attach_caller`] runs on every request and stores a [`Caller`] in the
//! request extensions: `Anonymous` when there is no `Authorization` header,
//! the decoded user otherwise. A header that is present but malformed, or a
//! token that fails verification, is rejected with 401.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use canteen_core::{Caller, Role};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::ApiError;
use crate::AppState;

/// Token claims. `role` is `admin` for administrators; anything else is a
/// regular user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    #[serde(default)]
    pub role: String,
    pub exp: u64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("authorization header must be 'Bearer <token>'")]
    MalformedHeader,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("token user_id is not a UUID")]
    InvalidUserId,
}

/// Verifies HS256 tokens.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Caller, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            debug!("Token rejected: {}", e);
            AuthError::InvalidToken
        })?;
        let id = Uuid::parse_str(&data.claims.user_id).map_err(|_| AuthError::InvalidUserId)?;
        Ok(match Role::from_claim(&data.claims.role) {
            Role::Admin => Caller::admin(id),
            Role::User => Caller::user(id),
        })
    }

    /// Resolve the caller from an optional `Authorization` header value.
    pub fn caller_from_header(&self, header: Option<&str>) -> Result<Caller, AuthError> {
        let Some(value) = header else {
            return Ok(Caller::Anonymous);
        };
        let token = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MalformedHeader)?;
        self.verify(token)
    }
}

/// Middleware: decode the caller and store it in the request extensions.
pub async fn attach_caller(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = match request.headers().get(AUTHORIZATION) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| ApiError::Unauthorized(AuthError::MalformedHeader.to_string()))?,
        ),
        None => None,
    };
    let caller = state
        .tokens
        .caller_from_header(header)
        .map_err(|e| ApiError::Unauthorized(e.to_string()))?;

    request.extensions_mut().insert(caller);
    Ok(next.run(request).await)
}

/// Whoever is calling, possibly anonymous.
#[derive(Debug, Clone, Copy)]
pub struct CurrentCaller(pub Caller);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentCaller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts.extensions.get::<Caller>().copied().unwrap_or_default(),
        ))
    }
}

/// A signed-in caller. Rejects anonymous requests with 401.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: Uuid,
    pub caller: Caller,
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CurrentCaller(caller) = CurrentCaller::from_request_parts(parts, state).await?;
        let id = caller
            .user_id()
            .ok_or_else(|| ApiError::Unauthorized("authentication required".to_string()))?;
        Ok(Self { id, caller })
    }
}

/// An administrator. 401 when anonymous, 403 for regular users.
#[derive(Debug, Clone, Copy)]
pub struct AdminUser {
    pub id: Uuid,
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.caller.is_admin() {
            return Err(ApiError::Forbidden("administrator role required".to_string()));
        }
        Ok(Self { id: user.id })
    }
}
