//! Request and response bodies.

use canteen_core::{ModerationStatus, PageInfo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Review, ReviewImage, Store};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreResponse {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub phone: String,
    pub category: String,
    pub description: String,
    pub status: ModerationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub average_rating: f64,
    pub total_reviews: i64,
    pub created_by: Uuid,
    pub auto_created: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Store> for StoreResponse {
    fn from(store: Store) -> Self {
        Self {
            id: store.id,
            name: store.name,
            address: store.address,
            phone: store.phone,
            category: store.category,
            description: store.description,
            status: store.status,
            rejection_reason: store.rejection_reason,
            average_rating: store.average_rating,
            total_reviews: store.total_reviews,
            created_by: store.created_by,
            auto_created: store.auto_created,
            created_at: store.created_at,
            updated_at: store.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageResponse {
    pub id: Uuid,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

impl From<ReviewImage> for ImageResponse {
    fn from(image: ReviewImage) -> Self {
        Self {
            id: image.id,
            url: image.url,
            created_at: image.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResponse {
    pub id: Uuid,
    pub store_id: Uuid,
    pub author_id: Uuid,
    pub title: String,
    pub content: String,
    pub rating: f64,
    pub status: ModerationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub images: Vec<ImageResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Review> for ReviewResponse {
    fn from(review: Review) -> Self {
        Self {
            id: review.id,
            store_id: review.store_id,
            author_id: review.author_id,
            title: review.title,
            content: review.content,
            rating: review.rating,
            status: review.status,
            rejection_reason: review.rejection_reason,
            images: review.images.into_iter().map(Into::into).collect(),
            created_at: review.created_at,
            updated_at: review.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoCreateResponse {
    pub store: StoreResponse,
    pub review: ReviewResponse,
    pub is_new_store: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new<U: Into<T>>(items: Vec<U>, info: PageInfo) -> Self {
        Self {
            items: items.into_iter().map(Into::into).collect(),
            page: info.page,
            page_size: info.page_size,
            total: info.total,
            total_pages: info.total_pages,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateStoreRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub category: String,
    pub phone: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewBody {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub rating: f64,
}

/// `POST /reviews`: either `store_id`, or (with `?autoCreate=true`)
/// `store_name` and `store_address`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitReviewRequest {
    pub store_id: Option<Uuid>,
    pub store_name: Option<String>,
    pub store_address: Option<String>,
    #[serde(flatten)]
    pub review: ReviewBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateReviewRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub rating: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModerationRequest {
    pub status: ModerationStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReviewQuery {
    #[serde(default)]
    pub auto_create: Option<String>,
}

impl SubmitReviewQuery {
    pub fn auto_create(&self) -> bool {
        self.auto_create
            .as_deref()
            .is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1"))
    }
}

/// Raw list parameters. Everything is a string so malformed values fall
/// back to defaults instead of failing extraction.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub q: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
    /// Alias for `page_size`.
    pub limit: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub status: Option<String>,
    pub category: Option<String>,
    pub store_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}
