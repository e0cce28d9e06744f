use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info};

use crate::db::Database;
use crate::AppState;

/// Periodically delete expired idempotency records.
pub async fn idempotency_gc_loop(state: Arc<AppState>) {
    let mut interval = interval(Duration::from_secs(state.config.idempotency_gc_interval_secs));

    loop {
        interval.tick().await;
        run_gc_once(&state.db).await;
    }
}

/// One sweep. Returns the number of records removed; errors are logged.
pub async fn run_gc_once(db: &Database) -> usize {
    match db.cleanup_expired_idempotency_keys().await {
        Ok(0) => 0,
        Ok(removed) => {
            info!("Removed {} expired idempotency records", removed);
            removed
        }
        Err(e) => {
            error!("Error cleaning up idempotency records: {}", e);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_gc_removes_expired_records() {
        let db = Database::open_in_memory().unwrap();
        let user = Uuid::new_v4();
        db.try_claim_idempotency_key(user, "live", "h", 3600).await.unwrap();
        {
            let conn = db.conn.lock().unwrap();
            crate::db::idempotency::try_claim_sync(&conn, user, "stale", "h", 0, 1).unwrap();
        }

        assert_eq!(run_gc_once(&db).await, 1);
        assert_eq!(run_gc_once(&db).await, 0);
    }
}
