//! SQLite persistence.
//!
//! All access goes through one `Connection` behind a mutex, driven from
//! `tokio::task::spawn_blocking`. Entity modules expose synchronous
//! functions over `&Connection` so the services can compose several of them
//! inside a single transaction (see [`Database::transaction`]).
//!
//! # Schema Versioning
//!
//! The `schema_version` table tracks which migrations have run. When the
//! schema changes, increment `CURRENT_SCHEMA_VERSION` and add a step to
//! `run_migrations()`. Steps run in order from the stored version.

pub mod idempotency;
pub mod reviews;
pub mod stores;

#[cfg(test)]
mod tests;

use std::path::Path;
use std::sync::{Arc, Mutex};

use canteen_core::ModerationStatus;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use tracing::warn;
use uuid::Uuid;

const CURRENT_SCHEMA_VERSION: i64 = 2;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("storage error during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },
    /// A UNIQUE or PRIMARY KEY constraint rejected the write.
    #[error("conflict during {0}")]
    Conflict(&'static str),
    #[error("corrupt row: {0}")]
    Corruption(String),
}

impl RepositoryError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            operation,
            message: message.into(),
        }
    }

    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption(message.into())
    }

    /// Classify a rusqlite error raised while performing `operation`.
    pub(crate) fn sqlite(operation: &'static str, e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                Self::Conflict(operation)
            }
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..) => {
                Self::Corruption(format!("{operation}: {e}"))
            }
            _ => Self::storage(operation, e.to_string()),
        }
    }
}

/// Shorthand for `map_err` at call sites.
pub(crate) fn sql_err(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> RepositoryError {
    move |e| RepositoryError::sqlite(operation, e)
}

/// Handle to the database. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    /// Exposed as `pub(crate)` so tests can install triggers and rewrite
    /// timestamps.
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (creating if needed) the database at `path` and run migrations.
    ///
    /// # Durability
    ///
    /// - `journal_mode = WAL`, verified after the pragma
    /// - `synchronous = FULL`
    /// - `busy_timeout = 5000ms`
    /// - `foreign_keys = ON`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.to_string_lossy();
        let is_in_memory = path_str == ":memory:";

        if !is_in_memory {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        RepositoryError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;
                }
            }
        }

        let conn = Connection::open(path_ref).map_err(sql_err("open database"))?;

        #[cfg(unix)]
        if !is_in_memory {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            if let Err(e) = std::fs::set_permissions(path_ref, permissions) {
                warn!("Failed to set restrictive permissions on database file: {}", e);
            }
        }

        // SQLite can silently stay in DELETE mode on filesystems without
        // shared memory support. In-memory databases report "memory".
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(sql_err("set journal_mode"))?;
        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));
        if !journal_mode_ok {
            return Err(RepositoryError::storage(
                "configure journal_mode",
                format!(
                    "SQLite returned '{}' instead of 'wal'; the filesystem may not \
                     support shared memory",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
            "#,
        )
        .map_err(sql_err("configure pragmas"))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(sql_err("create schema_version table"))?;

        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err("get schema version"))?
            .unwrap_or(0);

        run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, RepositoryError> {
        Self::open(":memory:")
    }

    /// Run `f` against the connection on the blocking pool.
    pub async fn run<T, F>(&self, operation: &'static str, f: F) -> Result<T, RepositoryError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, RepositoryError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| RepositoryError::storage(operation, "connection mutex poisoned"))?;
            f(&conn)
        })
        .await
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))?
    }

    /// Run `f` inside an IMMEDIATE transaction on the blocking pool.
    ///
    /// The transaction commits only if `f` returns `Ok`; on error it is
    /// dropped, which rolls back every write `f` made.
    pub async fn transaction<T, E, F>(&self, operation: &'static str, f: F) -> Result<T, E>
    where
        T: Send + 'static,
        E: From<RepositoryError> + Send + 'static,
        F: FnOnce(&Transaction<'_>) -> Result<T, E> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| RepositoryError::storage(operation, "connection mutex poisoned"))?;
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(sql_err(operation))?;
            let value = f(&tx)?;
            tx.commit().map_err(sql_err(operation))?;
            Ok(value)
        })
        .await
        .map_err(|e| E::from(RepositoryError::storage(operation, e.to_string())))?
    }
}

fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), RepositoryError> {
    if from_version > CURRENT_SCHEMA_VERSION {
        return Err(RepositoryError::storage(
            "schema version",
            format!(
                "Database schema version {} is newer than supported version {}. \
                 Please upgrade the application.",
                from_version, CURRENT_SCHEMA_VERSION
            ),
        ));
    }

    if from_version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    // v1: stores, reviews and their images. Uniqueness only applies to rows
    // that are not soft-deleted, hence the partial indexes.
    if from_version < 1 {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS stores (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                address TEXT NOT NULL,
                phone TEXT NOT NULL DEFAULT '',
                category TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'approved', 'rejected')),
                rejection_reason TEXT,
                average_rating REAL NOT NULL DEFAULT 0,
                total_reviews INTEGER NOT NULL DEFAULT 0,
                created_by TEXT NOT NULL,
                auto_created INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_stores_name_address
                ON stores(name, address) WHERE deleted_at IS NULL;
            CREATE INDEX IF NOT EXISTS idx_stores_status
                ON stores(status, created_at) WHERE deleted_at IS NULL;

            CREATE TABLE IF NOT EXISTS reviews (
                id TEXT PRIMARY KEY,
                store_id TEXT NOT NULL REFERENCES stores(id),
                author_id TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                rating REAL NOT NULL CHECK (rating >= 0 AND rating <= 5),
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'approved', 'rejected')),
                rejection_reason TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_reviews_author_store
                ON reviews(author_id, store_id) WHERE deleted_at IS NULL;
            CREATE INDEX IF NOT EXISTS idx_reviews_store_status
                ON reviews(store_id, status) WHERE deleted_at IS NULL;

            CREATE TABLE IF NOT EXISTS review_images (
                id TEXT PRIMARY KEY,
                review_id TEXT NOT NULL REFERENCES reviews(id),
                storage_key TEXT NOT NULL,
                url TEXT NOT NULL,
                created_at TEXT NOT NULL,
                deleted_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_review_images_review
                ON review_images(review_id, created_at) WHERE deleted_at IS NULL;
            "#,
        )
        .map_err(sql_err("migration v1"))?;
    }

    // v2: idempotency records for submission endpoints.
    if from_version < 2 {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS idempotency_keys (
                user_id TEXT NOT NULL,
                key TEXT NOT NULL,
                request_hash TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('in_progress', 'completed')),
                response_status INTEGER,
                response_content_type TEXT,
                response_body BLOB,
                expires_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, key)
            );

            CREATE INDEX IF NOT EXISTS idx_idempotency_expires
                ON idempotency_keys(expires_at);
            "#,
        )
        .map_err(sql_err("migration v2"))?;
    }

    conn.execute(
        "INSERT INTO schema_version (id, version) VALUES (1, ?1)
         ON CONFLICT(id) DO UPDATE SET version = excluded.version",
        [CURRENT_SCHEMA_VERSION],
    )
    .map_err(sql_err("update schema version"))?;

    Ok(())
}

// =============================================================================
// Column codecs shared by the entity modules
// =============================================================================

/// Fixed-width RFC 3339 so that string order is time order.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_failure(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

pub(crate) fn get_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_failure(idx, e))
}

pub(crate) fn get_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| conversion_failure(idx, e))
}

pub(crate) fn get_status(row: &Row<'_>, idx: usize) -> rusqlite::Result<ModerationStatus> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_failure(idx, e))
}

/// `%term%` with LIKE wildcards escaped; pair with `ESCAPE '\'`.
pub(crate) fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// `?n, ?n+1, ...` placeholders for an `IN (...)` list.
pub(crate) fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}
