//! Post-commit side effects.
//!
//! Services describe follow-up work as `Effect` values and return them next
//! to their result. The HTTP layer hands them to [`spawn_effects`] once the
//! response is decided, so a failing effect never reverts a committed
//! change and never delays the caller.

use std::sync::Arc;

use tracing::{debug, error, info};
use uuid::Uuid;

use crate::db::{stores, Database, RepositoryError};
use crate::storage::{BlobStorage, StorageError};

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Recompute a store's average rating and review count.
    RecomputeStoreAggregate { store_id: Uuid },
    /// Remove blobs whose rows were soft-deleted.
    DeleteBlobs { keys: Vec<String> },
}

/// A value produced by a committed transaction, plus the work to run after.
#[derive(Debug)]
pub struct Committed<T> {
    pub value: T,
    pub effects: Vec<Effect>,
}

impl<T> Committed<T> {
    pub fn new(value: T, effects: Vec<Effect>) -> Self {
        Self { value, effects }
    }

    pub fn pure(value: T) -> Self {
        Self::new(value, Vec::new())
    }
}

#[derive(Debug, thiserror::Error)]
enum EffectError {
    #[error("recompute aggregate for store {store_id}: {source}")]
    Recompute {
        store_id: Uuid,
        #[source]
        source: RepositoryError,
    },
    #[error("delete blob '{key}': {source}")]
    DeleteBlob {
        key: String,
        #[source]
        source: StorageError,
    },
}

/// What effects need to run.
#[derive(Clone)]
pub struct EffectContext {
    pub db: Database,
    pub storage: Arc<dyn BlobStorage>,
}

/// Execute effects in order. Failures are logged and do not stop the rest.
///
/// Returns the number of effects that failed.
pub async fn execute_effects(ctx: &EffectContext, effects: Vec<Effect>) -> usize {
    let mut failures = 0;
    for effect in effects {
        if let Err(errors) = execute_effect(ctx, effect).await {
            for err in &errors {
                error!("Effect execution failed: {}", err);
            }
            failures += 1;
        }
    }
    failures
}

async fn execute_effect(ctx: &EffectContext, effect: Effect) -> Result<(), Vec<EffectError>> {
    match effect {
        Effect::RecomputeStoreAggregate { store_id } => {
            let (average, count) = ctx
                .db
                .run("recompute_store_aggregate", move |conn| {
                    stores::recompute_aggregate(conn, store_id)
                })
                .await
                .map_err(|source| vec![EffectError::Recompute { store_id, source }])?;
            debug!(
                "Recomputed aggregate for store {}: average {:.2} over {} reviews",
                store_id, average, count
            );
            Ok(())
        }

        Effect::DeleteBlobs { keys } => {
            let mut errors = Vec::new();
            for key in keys {
                match ctx.storage.delete(&key).await {
                    Ok(()) => info!("Deleted blob {}", key),
                    Err(source) => errors.push(EffectError::DeleteBlob { key, source }),
                }
            }
            if errors.is_empty() {
                Ok(())
            } else {
                Err(errors)
            }
        }
    }
}

/// Run effects in the background. No-op for an empty list.
pub fn spawn_effects(ctx: &EffectContext, effects: Vec<Effect>) {
    if effects.is_empty() {
        return;
    }
    let ctx = ctx.clone();
    tokio::spawn(async move {
        execute_effects(&ctx, effects).await;
    });
}
