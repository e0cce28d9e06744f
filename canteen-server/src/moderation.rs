//! Administrator actions: moderation decisions and store removal.
//!
//! Decisions go through `canteen_core::transition`; only an actual change is
//! written. Approving a review is the one decision with a follow-up effect.

use canteen_core::{transition, Decision, ModerationError, ModerationStatus, Transition};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::db::{reviews, stores, Database, RepositoryError};
use crate::effects::{Committed, Effect};
use crate::model::{Review, Store};

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error(transparent)]
    Moderation(#[from] ModerationError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Apply `decision` to a review. Re-applying the decision it already carries
/// succeeds without writing or emitting effects.
pub async fn moderate_review(
    db: &Database,
    review_id: Uuid,
    decision: Decision,
) -> Result<Committed<Review>, AdminError> {
    let committed = db
        .transaction::<_, AdminError, _>("moderate_review", move |tx| {
            let review = reviews::find_by_id(tx, review_id)?.ok_or(AdminError::NotFound("review"))?;
            let Transition::Changed {
                status,
                rejection_reason,
            } = transition(review.status, &decision)?
            else {
                return Ok(Committed::pure(review));
            };

            reviews::set_status(tx, review_id, status, rejection_reason.as_deref(), Utc::now())?;
            let updated =
                reviews::find_by_id(tx, review_id)?.ok_or(AdminError::NotFound("review"))?;

            let mut effects = Vec::new();
            if status == ModerationStatus::Approved {
                effects.push(Effect::RecomputeStoreAggregate {
                    store_id: updated.store_id,
                });
            }
            Ok(Committed::new(updated, effects))
        })
        .await?;

    info!("Review {} moderated: {}", review_id, committed.value.status);
    Ok(committed)
}

/// Apply `decision` to a store. Store decisions have no follow-up effects.
pub async fn moderate_store(
    db: &Database,
    store_id: Uuid,
    decision: Decision,
) -> Result<Store, AdminError> {
    let store = db
        .transaction::<_, AdminError, _>("moderate_store", move |tx| {
            let store = stores::find_by_id(tx, store_id)?.ok_or(AdminError::NotFound("store"))?;
            match transition(store.status, &decision)? {
                Transition::Unchanged => Ok(store),
                Transition::Changed {
                    status,
                    rejection_reason,
                } => {
                    stores::set_status(
                        tx,
                        store_id,
                        status,
                        rejection_reason.as_deref(),
                        Utc::now(),
                    )?;
                    stores::find_by_id(tx, store_id)?.ok_or(AdminError::NotFound("store"))
                }
            }
        })
        .await?;

    info!("Store {} moderated: {}", store_id, store.status);
    Ok(store)
}

/// Soft-delete a store with its reviews and images; blobs go after commit.
pub async fn delete_store(db: &Database, store_id: Uuid) -> Result<Committed<()>, AdminError> {
    let keys = db
        .transaction::<_, AdminError, _>("delete_store", move |tx| {
            stores::soft_delete_cascade(tx, store_id, Utc::now())?
                .ok_or(AdminError::NotFound("store"))
        })
        .await?;

    info!("Store {} deleted with {} image(s)", store_id, keys.len());
    let effects = if keys.is_empty() {
        Vec::new()
    } else {
        vec![Effect::DeleteBlobs { keys }]
    };
    Ok(Committed::new((), effects))
}
