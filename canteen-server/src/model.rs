//! Persistent entities.

use canteen_core::ModerationStatus;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct Store {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub phone: String,
    pub category: String,
    pub description: String,
    pub status: ModerationStatus,
    pub rejection_reason: Option<String>,
    /// Mean rating over approved reviews. Derived; see `recompute_aggregate`.
    pub average_rating: f64,
    /// Number of approved reviews. Derived together with `average_rating`.
    pub total_reviews: i64,
    pub created_by: Uuid,
    /// Materialized by a review submission rather than created explicitly.
    pub auto_created: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewStore {
    pub name: String,
    pub address: String,
    pub phone: String,
    pub category: String,
    pub description: String,
    pub status: ModerationStatus,
    pub created_by: Uuid,
    pub auto_created: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Review {
    pub id: Uuid,
    pub store_id: Uuid,
    pub author_id: Uuid,
    pub title: String,
    pub content: String,
    pub rating: f64,
    pub status: ModerationStatus,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Ordered by upload time, then id.
    pub images: Vec<ReviewImage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewReview {
    pub store_id: Uuid,
    pub author_id: Uuid,
    pub title: String,
    pub content: String,
    pub rating: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewImage {
    pub id: Uuid,
    pub review_id: Uuid,
    pub storage_key: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}
