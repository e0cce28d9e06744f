//! Idempotency records for submission endpoints.
//!
//! A record is keyed by (user_id, key). It is claimed `in_progress` before
//! the handler runs and either completed with the captured response or
//! released (deleted) so a corrected retry can run. Records past
//! `expires_at` are treated as if they did not exist.

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{sql_err, Database, RepositoryError};

/// Response captured for replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The caller owns the record and should run the request. `claimed_at`
    /// identifies this claim when completing or releasing it.
    Claimed { claimed_at: i64 },
    /// Another request with this key is still running.
    InProgress,
    /// A previous request with this key finished; replay its response.
    Completed(StoredResponse),
    /// The key was used for a request with a different body.
    HashMismatch,
}

/// Atomically claim `(user_id, key)` for a request whose body hashes to
/// `request_hash`.
pub fn try_claim_sync(
    conn: &Connection,
    user_id: Uuid,
    key: &str,
    request_hash: &str,
    now_secs: i64,
    ttl_secs: i64,
) -> Result<ClaimOutcome, RepositoryError> {
    let user = user_id.to_string();
    let expires_at = now_secs + ttl_secs;

    // INSERT OR IGNORE closes the read-then-insert race: the loser's insert
    // is ignored and detected through changes() == 0.
    conn.execute(
        "INSERT OR IGNORE INTO idempotency_keys \
         (user_id, key, request_hash, status, expires_at, created_at) \
         VALUES (?1, ?2, ?3, 'in_progress', ?4, ?5)",
        params![user, key, request_hash, expires_at, now_secs],
    )
    .map_err(sql_err("claim idempotency key"))?;

    if conn.changes() > 0 {
        return Ok(ClaimOutcome::Claimed {
            claimed_at: now_secs,
        });
    }

    type Existing = (String, String, i64, Option<i64>, Option<String>, Option<Vec<u8>>);
    let existing: Option<Existing> = conn
        .query_row(
            "SELECT request_hash, status, expires_at, response_status, \
             response_content_type, response_body \
             FROM idempotency_keys WHERE user_id = ?1 AND key = ?2",
            params![user, key],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            },
        )
        .optional()
        .map_err(sql_err("read idempotency key"))?;

    // Released between our insert and read; the caller may retry.
    let Some((stored_hash, status, stored_expires_at, response_status, content_type, body)) =
        existing
    else {
        return Ok(ClaimOutcome::InProgress);
    };

    if stored_expires_at <= now_secs {
        // Reclaim only if still expired, so two concurrent reclaimers cannot
        // both win.
        conn.execute(
            "UPDATE idempotency_keys SET request_hash = ?1, status = 'in_progress', \
             response_status = NULL, response_content_type = NULL, response_body = NULL, \
             expires_at = ?2, created_at = ?3 \
             WHERE user_id = ?4 AND key = ?5 AND expires_at <= ?3",
            params![request_hash, expires_at, now_secs, user, key],
        )
        .map_err(sql_err("reclaim idempotency key"))?;

        return if conn.changes() > 0 {
            Ok(ClaimOutcome::Claimed {
                claimed_at: now_secs,
            })
        } else {
            Ok(ClaimOutcome::InProgress)
        };
    }

    if stored_hash != request_hash {
        return Ok(ClaimOutcome::HashMismatch);
    }

    match status.as_str() {
        "in_progress" => Ok(ClaimOutcome::InProgress),
        "completed" => {
            let status = response_status
                .and_then(|s| u16::try_from(s).ok())
                .ok_or_else(|| {
                    RepositoryError::corruption("completed idempotency record without status")
                })?;
            Ok(ClaimOutcome::Completed(StoredResponse {
                status,
                content_type,
                body: body.unwrap_or_default(),
            }))
        }
        other => Err(RepositoryError::corruption(format!(
            "unknown idempotency status '{other}'"
        ))),
    }
}

/// Mark the claim made at `claimed_at` completed with the response to
/// replay. Returns false if that claim no longer owns the record.
pub fn complete_sync(
    conn: &Connection,
    user_id: Uuid,
    key: &str,
    claimed_at: i64,
    response: &StoredResponse,
) -> Result<bool, RepositoryError> {
    let updated = conn
        .execute(
            "UPDATE idempotency_keys SET status = 'completed', response_status = ?1, \
             response_content_type = ?2, response_body = ?3 \
             WHERE user_id = ?4 AND key = ?5 AND status = 'in_progress' AND created_at = ?6",
            params![
                response.status,
                response.content_type,
                response.body,
                user_id.to_string(),
                key,
                claimed_at
            ],
        )
        .map_err(sql_err("complete idempotency key"))?;
    Ok(updated > 0)
}

/// Drop the claim made at `claimed_at` so the key can be used again.
/// Returns false if that claim no longer owns the record.
pub fn release_sync(
    conn: &Connection,
    user_id: Uuid,
    key: &str,
    claimed_at: i64,
) -> Result<bool, RepositoryError> {
    let deleted = conn
        .execute(
            "DELETE FROM idempotency_keys \
             WHERE user_id = ?1 AND key = ?2 AND status = 'in_progress' AND created_at = ?3",
            params![user_id.to_string(), key, claimed_at],
        )
        .map_err(sql_err("release idempotency key"))?;
    Ok(deleted > 0)
}

/// Delete every record that expired at or before `now_secs`.
pub fn cleanup_expired_sync(conn: &Connection, now_secs: i64) -> Result<usize, RepositoryError> {
    conn.execute(
        "DELETE FROM idempotency_keys WHERE expires_at <= ?1",
        params![now_secs],
    )
    .map_err(sql_err("cleanup idempotency keys"))
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

// =============================================================================
// Async wrappers
// =============================================================================

impl Database {
    pub async fn try_claim_idempotency_key(
        &self,
        user_id: Uuid,
        key: &str,
        request_hash: &str,
        ttl_secs: i64,
    ) -> Result<ClaimOutcome, RepositoryError> {
        let key = key.to_string();
        let request_hash = request_hash.to_string();
        let now = now_secs();
        self.run("try_claim_idempotency_key", move |conn| {
            try_claim_sync(conn, user_id, &key, &request_hash, now, ttl_secs)
        })
        .await
    }

    pub async fn complete_idempotency_key(
        &self,
        user_id: Uuid,
        key: &str,
        claimed_at: i64,
        response: StoredResponse,
    ) -> Result<bool, RepositoryError> {
        let key = key.to_string();
        self.run("complete_idempotency_key", move |conn| {
            complete_sync(conn, user_id, &key, claimed_at, &response)
        })
        .await
    }

    pub async fn release_idempotency_key(
        &self,
        user_id: Uuid,
        key: &str,
        claimed_at: i64,
    ) -> Result<bool, RepositoryError> {
        let key = key.to_string();
        self.run("release_idempotency_key", move |conn| {
            release_sync(conn, user_id, &key, claimed_at)
        })
        .await
    }

    pub async fn cleanup_expired_idempotency_keys(&self) -> Result<usize, RepositoryError> {
        let now = now_secs();
        self.run("cleanup_expired_idempotency_keys", move |conn| {
            cleanup_expired_sync(conn, now)
        })
        .await
    }
}
