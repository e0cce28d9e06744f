//! Submission orchestrator.
//!
//! Every write that a regular user can trigger goes through here. Each
//! operation validates its input up front, then does its check-then-write
//! inside a single transaction so a failure at any step leaves nothing
//! behind. Work that must happen after commit is returned as effects.

use std::sync::Arc;

use canteen_core::validation::{
    optional_text, require_text, sanitize_filename, validate_rating, MAX_ADDRESS_LEN,
    MAX_CATEGORY_LEN, MAX_CONTENT_LEN, MAX_DESCRIPTION_LEN, MAX_PHONE_LEN, MAX_STORE_NAME_LEN,
    MAX_TITLE_LEN,
};
use canteen_core::{ModerationStatus, ValidationError};
use chrono::Utc;
use rusqlite::Connection;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{reviews, stores, Database, RepositoryError};
use crate::effects::{Committed, Effect};
use crate::model::{NewReview, NewStore, Review, ReviewImage, Store};
use crate::storage::{BlobStorage, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    /// Input that is well-formed but not acceptable in the current state.
    #[error("{0}")]
    Rejected(&'static str),
    #[error("store not found")]
    StoreNotFound,
    #[error("review not found")]
    ReviewNotFound,
    #[error("you have already reviewed this store")]
    DuplicateReview,
    #[error("a store with this name and address already exists")]
    DuplicateStore,
    #[error("only the author may modify this review")]
    NotAuthor,
    #[error("image storage failed: {0}")]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

fn review_conflict(e: RepositoryError) -> SubmissionError {
    match e {
        RepositoryError::Conflict(_) => SubmissionError::DuplicateReview,
        other => other.into(),
    }
}

fn store_conflict(e: RepositoryError) -> SubmissionError {
    match e {
        RepositoryError::Conflict(_) => SubmissionError::DuplicateStore,
        other => other.into(),
    }
}

/// Review fields as submitted.
#[derive(Debug, Clone)]
pub struct ReviewDraft {
    pub title: String,
    pub content: String,
    pub rating: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct ValidReview {
    title: String,
    content: String,
    rating: f64,
}

impl ReviewDraft {
    fn validate(&self) -> Result<ValidReview, ValidationError> {
        Ok(ValidReview {
            rating: validate_rating(self.rating)?,
            title: require_text("title", &self.title, MAX_TITLE_LEN)?,
            content: require_text("content", &self.content, MAX_CONTENT_LEN)?,
        })
    }
}

/// Store fields for explicit creation.
#[derive(Debug, Clone, Default)]
pub struct StoreDraft {
    pub name: String,
    pub address: String,
    pub category: String,
    pub phone: Option<String>,
    pub description: Option<String>,
}

/// Partial update of a review. Missing fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct ReviewPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub rating: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct AutoCreated {
    pub store: Store,
    pub review: Review,
    pub is_new_store: bool,
}

/// Who is removing a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remover {
    Author(Uuid),
    Admin,
}

/// Create a store explicitly. Administrators create it approved; everyone
/// else creates it pending.
pub async fn create_store(
    db: &Database,
    created_by: Uuid,
    as_admin: bool,
    draft: StoreDraft,
) -> Result<Store, SubmissionError> {
    let new = NewStore {
        name: require_text("name", &draft.name, MAX_STORE_NAME_LEN)?,
        address: require_text("address", &draft.address, MAX_ADDRESS_LEN)?,
        category: require_text("category", &draft.category, MAX_CATEGORY_LEN)?,
        phone: optional_text("phone", draft.phone.as_deref(), MAX_PHONE_LEN)?,
        description: optional_text(
            "description",
            draft.description.as_deref(),
            MAX_DESCRIPTION_LEN,
        )?,
        status: if as_admin {
            ModerationStatus::Approved
        } else {
            ModerationStatus::Pending
        },
        created_by,
        auto_created: false,
    };

    let store = db
        .transaction::<_, SubmissionError, _>("create_store", move |tx| {
            if stores::find_by_name_address(tx, &new.name, &new.address)?.is_some() {
                return Err(SubmissionError::DuplicateStore);
            }
            stores::insert(tx, &new, Utc::now()).map_err(store_conflict)
        })
        .await?;

    info!("Store {} created by {} ({})", store.id, created_by, store.status);
    Ok(store)
}

/// Check for an existing review and insert. Must run inside a transaction.
fn insert_review(
    conn: &Connection,
    author_id: Uuid,
    store_id: Uuid,
    review: &ValidReview,
) -> Result<Review, SubmissionError> {
    if reviews::find_by_author_and_store(conn, author_id, store_id)?.is_some() {
        return Err(SubmissionError::DuplicateReview);
    }
    reviews::insert(
        conn,
        &NewReview {
            store_id,
            author_id,
            title: review.title.clone(),
            content: review.content.clone(),
            rating: review.rating,
        },
        Utc::now(),
    )
    .map_err(review_conflict)
}

/// Submit a review for an existing, approved store.
pub async fn submit_review(
    db: &Database,
    author_id: Uuid,
    store_id: Uuid,
    draft: ReviewDraft,
) -> Result<Review, SubmissionError> {
    let valid = draft.validate()?;

    let review = db
        .transaction::<_, SubmissionError, _>("submit_review", move |tx| {
            let store = stores::find_by_id(tx, store_id)?.ok_or(SubmissionError::StoreNotFound)?;
            if store.status != ModerationStatus::Approved {
                return Err(SubmissionError::Rejected("store has not been approved yet"));
            }
            insert_review(tx, author_id, store_id, &valid)
        })
        .await?;

    info!("Review {} submitted for store {} by {}", review.id, store_id, author_id);
    Ok(review)
}

/// Submit a review for a store identified by name and address, creating the
/// store (pending, auto-created) if no live store matches.
///
/// Store creation and review insertion commit together or not at all. An
/// existing store is reused as is.
pub async fn submit_with_auto_create(
    db: &Database,
    author_id: Uuid,
    store_name: &str,
    store_address: &str,
    draft: ReviewDraft,
) -> Result<AutoCreated, SubmissionError> {
    let name = require_text("store_name", store_name, MAX_STORE_NAME_LEN)?;
    let address = require_text("store_address", store_address, MAX_ADDRESS_LEN)?;
    let valid = draft.validate()?;

    let created = db
        .transaction::<_, SubmissionError, _>("submit_with_auto_create", move |tx| {
            let (store, is_new_store) = match stores::find_by_name_address(tx, &name, &address)? {
                Some(store) => (store, false),
                None => {
                    let new = NewStore {
                        name,
                        address,
                        phone: String::new(),
                        category: String::new(),
                        description: String::new(),
                        status: ModerationStatus::Pending,
                        created_by: author_id,
                        auto_created: true,
                    };
                    (stores::insert(tx, &new, Utc::now()).map_err(store_conflict)?, true)
                }
            };
            let review = insert_review(tx, author_id, store.id, &valid)?;
            Ok(AutoCreated {
                store,
                review,
                is_new_store,
            })
        })
        .await?;

    info!(
        "Review {} submitted by {} for {} store {}",
        created.review.id,
        author_id,
        if created.is_new_store { "new" } else { "existing" },
        created.store.id
    );
    Ok(created)
}

/// Load a live review, optionally requiring it to belong to `store_id`.
fn load_review(
    conn: &Connection,
    review_id: Uuid,
    store_id: Option<Uuid>,
) -> Result<Review, SubmissionError> {
    let review = reviews::find_by_id(conn, review_id)?.ok_or(SubmissionError::ReviewNotFound)?;
    if store_id.is_some_and(|id| id != review.store_id) {
        return Err(SubmissionError::ReviewNotFound);
    }
    Ok(review)
}

/// Edit a review. Any edit sends it back to pending and clears the rejection
/// reason; editing an approved review takes it out of the store aggregate.
pub async fn update_review(
    db: &Database,
    author_id: Uuid,
    store_id: Option<Uuid>,
    review_id: Uuid,
    patch: ReviewPatch,
) -> Result<Committed<Review>, SubmissionError> {
    db.transaction::<_, SubmissionError, _>("update_review", move |tx| {
        let current = load_review(tx, review_id, store_id)?;
        if current.author_id != author_id {
            return Err(SubmissionError::NotAuthor);
        }

        let valid = ReviewDraft {
            title: patch.title.unwrap_or(current.title),
            content: patch.content.unwrap_or(current.content),
            rating: patch.rating.unwrap_or(current.rating),
        }
        .validate()?;

        reviews::update_content(
            tx,
            review_id,
            &valid.title,
            &valid.content,
            valid.rating,
            Utc::now(),
        )?;
        let updated = load_review(tx, review_id, None)?;

        let mut effects = Vec::new();
        if current.status == ModerationStatus::Approved {
            effects.push(Effect::RecomputeStoreAggregate {
                store_id: current.store_id,
            });
        }
        Ok(Committed::new(updated, effects))
    })
    .await
}

/// Soft-delete a review and its images. Blob removal and, for an approved
/// review, the aggregate recompute happen after commit.
pub async fn delete_review(
    db: &Database,
    remover: Remover,
    store_id: Option<Uuid>,
    review_id: Uuid,
) -> Result<Committed<()>, SubmissionError> {
    let committed = db
        .transaction::<_, SubmissionError, _>("delete_review", move |tx| {
            let review = load_review(tx, review_id, store_id)?;
            if let Remover::Author(id) = remover {
                if review.author_id != id {
                    return Err(SubmissionError::NotAuthor);
                }
            }

            let keys = reviews::soft_delete(tx, review_id, Utc::now())?
                .ok_or(SubmissionError::ReviewNotFound)?;

            let mut effects = Vec::new();
            if !keys.is_empty() {
                effects.push(Effect::DeleteBlobs { keys });
            }
            if review.status == ModerationStatus::Approved {
                effects.push(Effect::RecomputeStoreAggregate {
                    store_id: review.store_id,
                });
            }
            Ok(Committed::new((), effects))
        })
        .await?;

    info!("Review {} deleted ({:?})", review_id, remover);
    Ok(committed)
}

/// Store an uploaded image and attach it to the author's review.
///
/// The blob is written first; if the row cannot be written afterwards the
/// blob is removed again (best effort).
pub async fn attach_image(
    db: &Database,
    storage: &Arc<dyn BlobStorage>,
    author_id: Uuid,
    review_id: Uuid,
    filename: &str,
    bytes: &[u8],
) -> Result<ReviewImage, SubmissionError> {
    if bytes.is_empty() {
        return Err(SubmissionError::Rejected("uploaded file is empty"));
    }

    let review = db
        .run("find_review", move |conn| reviews::find_by_id(conn, review_id))
        .await?
        .ok_or(SubmissionError::ReviewNotFound)?;
    if review.author_id != author_id {
        return Err(SubmissionError::NotAuthor);
    }

    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let key = format!("{}/{}_{}", review_id, nanos, sanitize_filename(filename));
    let blob = storage.save(&key, bytes).await?;

    let stored_key = blob.key.clone();
    let result = db
        .transaction::<_, SubmissionError, _>("attach_image", move |tx| {
            if reviews::find_by_id(tx, review_id)?.is_none() {
                return Err(SubmissionError::ReviewNotFound);
            }
            Ok(reviews::insert_image(tx, review_id, &blob.key, &blob.url, Utc::now())?)
        })
        .await;

    match result {
        Ok(image) => {
            info!("Image {} attached to review {}", image.id, review_id);
            Ok(image)
        }
        Err(e) => {
            if let Err(cleanup) = storage.delete(&stored_key).await {
                warn!("Failed to remove orphaned blob {}: {}", stored_key, cleanup);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(rating: f64) -> ReviewDraft {
        ReviewDraft {
            title: "  Lunch ".to_string(),
            content: "Good".to_string(),
            rating,
        }
    }

    #[test]
    fn test_draft_validation_trims() {
        let valid = draft(4.0).validate().unwrap();
        assert_eq!(valid.title, "Lunch");
    }

    #[test]
    fn test_draft_validation_rejects_bad_rating_first() {
        let mut d = draft(5.1);
        d.title = String::new();
        assert_eq!(d.validate(), Err(ValidationError::InvalidRating(5.1)));
    }

    #[test]
    fn test_draft_requires_content() {
        let mut d = draft(3.0);
        d.content = "   ".to_string();
        assert_eq!(d.validate(), Err(ValidationError::Required("content")));
    }

    #[tokio::test]
    async fn test_submit_to_pending_store_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let store = create_store(
            &db,
            Uuid::new_v4(),
            false,
            StoreDraft {
                name: "Noodle Bar".to_string(),
                address: "1 Main St".to_string(),
                category: "noodles".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(store.status, ModerationStatus::Pending);

        let err = submit_review(&db, Uuid::new_v4(), store.id, draft(4.0))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmissionError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_submit_to_missing_store() {
        let db = Database::open_in_memory().unwrap();
        let err = submit_review(&db, Uuid::new_v4(), Uuid::new_v4(), draft(4.0))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmissionError::StoreNotFound));
    }

    #[tokio::test]
    async fn test_only_author_may_update() {
        let db = Database::open_in_memory().unwrap();
        let author = Uuid::new_v4();
        let created = submit_with_auto_create(&db, author, "Noodle Bar", "1 Main St", draft(4.0))
            .await
            .unwrap();

        let err = update_review(
            &db,
            Uuid::new_v4(),
            None,
            created.review.id,
            ReviewPatch::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SubmissionError::NotAuthor));

        let err = update_review(
            &db,
            author,
            Some(Uuid::new_v4()),
            created.review.id,
            ReviewPatch::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SubmissionError::ReviewNotFound));
    }

    #[tokio::test]
    async fn test_auto_create_rolls_back_store_when_review_fails() {
        let db = Database::open_in_memory().unwrap();
        db.conn
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER fail_review BEFORE INSERT ON reviews \
                 BEGIN SELECT RAISE(ABORT, 'forced'); END;",
            )
            .unwrap();

        let err =
            submit_with_auto_create(&db, Uuid::new_v4(), "Ghost Kitchen", "Gate 9", draft(4.0))
                .await
                .unwrap_err();
        assert!(matches!(err, SubmissionError::Repository(_)));

        let leftover = db
            .run("find_store", |conn| {
                stores::find_by_name_address(conn, "Ghost Kitchen", "Gate 9")
            })
            .await
            .unwrap();
        assert!(leftover.is_none());
    }

    #[tokio::test]
    async fn test_auto_create_reuses_existing_store() {
        let db = Database::open_in_memory().unwrap();
        let first =
            submit_with_auto_create(&db, Uuid::new_v4(), "Noodle Bar", "1 Main St", draft(4.0))
                .await
                .unwrap();
        assert!(first.is_new_store);
        assert!(first.store.auto_created);

        let second =
            submit_with_auto_create(&db, Uuid::new_v4(), " Noodle Bar ", "1 Main St", draft(2.0))
                .await
                .unwrap();
        assert!(!second.is_new_store);
        assert_eq!(second.store.id, first.store.id);
    }

    #[tokio::test]
    async fn test_empty_upload_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn BlobStorage> =
            Arc::new(crate::storage::LocalStorage::new(dir.path(), "/uploads").unwrap());
        let err = attach_image(&db, &storage, Uuid::new_v4(), Uuid::new_v4(), "a.png", b"")
            .await
            .unwrap_err();
        assert!(matches!(err, SubmissionError::Rejected(_)));
    }
}
