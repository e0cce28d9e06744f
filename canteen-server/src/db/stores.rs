//! Store rows.

use canteen_core::query::StoreSortField;
use canteen_core::{ModerationStatus, PageRequest, Sort};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{
    format_timestamp, get_status, get_timestamp, get_uuid, like_pattern, placeholders, sql_err,
    RepositoryError,
};
use crate::model::{NewStore, Store};

const STORE_COLUMNS: &str = "id, name, address, phone, category, description, status, \
     rejection_reason, average_rating, total_reviews, created_by, auto_created, \
     created_at, updated_at";

#[derive(Debug, Clone)]
pub struct StoreFilter {
    /// Never empty; see `canteen_core::query::scope_statuses`.
    pub statuses: Vec<ModerationStatus>,
    pub search: Option<String>,
    pub category: Option<String>,
    pub sort: Sort<StoreSortField>,
    pub page: PageRequest,
}

fn row_to_store(row: &Row<'_>) -> rusqlite::Result<Store> {
    Ok(Store {
        id: get_uuid(row, 0)?,
        name: row.get(1)?,
        address: row.get(2)?,
        phone: row.get(3)?,
        category: row.get(4)?,
        description: row.get(5)?,
        status: get_status(row, 6)?,
        rejection_reason: row.get(7)?,
        average_rating: row.get(8)?,
        total_reviews: row.get(9)?,
        created_by: get_uuid(row, 10)?,
        auto_created: row.get(11)?,
        created_at: get_timestamp(row, 12)?,
        updated_at: get_timestamp(row, 13)?,
    })
}

/// Insert a new store. A live store with the same (name, address) yields
/// `RepositoryError::Conflict`.
pub fn insert(
    conn: &Connection,
    new: &NewStore,
    now: DateTime<Utc>,
) -> Result<Store, RepositoryError> {
    let id = Uuid::new_v4();
    let ts = format_timestamp(now);
    conn.execute(
        "INSERT INTO stores (id, name, address, phone, category, description, status, \
         created_by, auto_created, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
        params![
            id.to_string(),
            new.name,
            new.address,
            new.phone,
            new.category,
            new.description,
            new.status.as_str(),
            new.created_by.to_string(),
            new.auto_created,
            ts,
        ],
    )
    .map_err(sql_err("insert store"))?;

    find_by_id(conn, id)?.ok_or_else(|| RepositoryError::corruption("inserted store vanished"))
}

pub fn find_by_id(conn: &Connection, id: Uuid) -> Result<Option<Store>, RepositoryError> {
    conn.query_row(
        &format!("SELECT {STORE_COLUMNS} FROM stores WHERE id = ?1 AND deleted_at IS NULL"),
        params![id.to_string()],
        row_to_store,
    )
    .optional()
    .map_err(sql_err("find store"))
}

/// Exact match among live stores. Callers trim before looking up.
pub fn find_by_name_address(
    conn: &Connection,
    name: &str,
    address: &str,
) -> Result<Option<Store>, RepositoryError> {
    conn.query_row(
        &format!(
            "SELECT {STORE_COLUMNS} FROM stores \
             WHERE name = ?1 AND address = ?2 AND deleted_at IS NULL"
        ),
        params![name, address],
        row_to_store,
    )
    .optional()
    .map_err(sql_err("find store by name and address"))
}

pub fn set_status(
    conn: &Connection,
    id: Uuid,
    status: ModerationStatus,
    rejection_reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    conn.execute(
        "UPDATE stores SET status = ?1, rejection_reason = ?2, updated_at = ?3 \
         WHERE id = ?4 AND deleted_at IS NULL",
        params![status.as_str(), rejection_reason, format_timestamp(now), id.to_string()],
    )
    .map_err(sql_err("update store status"))?;
    Ok(())
}

/// Write both derived aggregate columns in one statement.
pub fn update_aggregate(
    conn: &Connection,
    id: Uuid,
    average_rating: f64,
    total_reviews: i64,
) -> Result<(), RepositoryError> {
    conn.execute(
        "UPDATE stores SET average_rating = ?1, total_reviews = ?2 WHERE id = ?3",
        params![average_rating, total_reviews, id.to_string()],
    )
    .map_err(sql_err("update store aggregate"))?;
    Ok(())
}

/// Recompute the aggregate from approved, live reviews and store it.
///
/// Zero approved reviews gives `(0.0, 0)`.
pub fn recompute_aggregate(conn: &Connection, id: Uuid) -> Result<(f64, i64), RepositoryError> {
    let (average, count): (Option<f64>, i64) = conn
        .query_row(
            "SELECT AVG(rating), COUNT(*) FROM reviews \
             WHERE store_id = ?1 AND status = 'approved' AND deleted_at IS NULL",
            params![id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(sql_err("aggregate store reviews"))?;
    let average = average.unwrap_or(0.0);
    update_aggregate(conn, id, average, count)?;
    Ok((average, count))
}

/// One page of live stores matching `filter`, plus the total match count.
pub fn search(
    conn: &Connection,
    filter: &StoreFilter,
) -> Result<(Vec<Store>, u64), RepositoryError> {
    let mut clauses = vec!["deleted_at IS NULL".to_string()];
    let mut values: Vec<Value> = Vec::new();

    clauses.push(format!(
        "status IN ({})",
        placeholders(values.len() + 1, filter.statuses.len())
    ));
    values.extend(
        filter
            .statuses
            .iter()
            .map(|s| Value::Text(s.as_str().to_string())),
    );

    if let Some(q) = &filter.search {
        let n = values.len() + 1;
        clauses.push(format!(
            "(name LIKE ?{n} ESCAPE '\\' OR address LIKE ?{n} ESCAPE '\\')"
        ));
        values.push(Value::Text(like_pattern(q)));
    }

    if let Some(category) = &filter.category {
        clauses.push(format!("category = ?{}", values.len() + 1));
        values.push(Value::Text(category.clone()));
    }

    let where_clause = clauses.join(" AND ");

    let total: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM stores WHERE {where_clause}"),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )
        .map_err(sql_err("count stores"))?;

    let limit_idx = values.len() + 1;
    let sql = format!(
        "SELECT {STORE_COLUMNS} FROM stores WHERE {where_clause} \
         ORDER BY {} LIMIT ?{} OFFSET ?{}",
        filter.sort.order_by(),
        limit_idx,
        limit_idx + 1
    );
    values.push(Value::Integer(filter.page.limit() as i64));
    values.push(Value::Integer(filter.page.offset() as i64));

    let mut stmt = conn.prepare(&sql).map_err(sql_err("prepare store search"))?;
    let stores = stmt
        .query_map(params_from_iter(values.iter()), row_to_store)
        .map_err(sql_err("search stores"))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(sql_err("read store row"))?;

    Ok((stores, total as u64))
}

/// Soft-delete a store together with its reviews and their images.
///
/// Returns the storage keys of the images that were live, or `None` if the
/// store does not exist. Run inside a transaction so the cascade is
/// all-or-nothing.
pub fn soft_delete_cascade(
    conn: &Connection,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<Vec<String>>, RepositoryError> {
    let ts = format_timestamp(now);
    let id = id.to_string();

    let updated = conn
        .execute(
            "UPDATE stores SET deleted_at = ?1, updated_at = ?1 \
             WHERE id = ?2 AND deleted_at IS NULL",
            params![ts, id],
        )
        .map_err(sql_err("delete store"))?;
    if updated == 0 {
        return Ok(None);
    }

    let mut stmt = conn
        .prepare(
            "SELECT i.storage_key FROM review_images i \
             JOIN reviews r ON r.id = i.review_id \
             WHERE r.store_id = ?1 AND r.deleted_at IS NULL AND i.deleted_at IS NULL",
        )
        .map_err(sql_err("prepare store image keys"))?;
    let keys = stmt
        .query_map(params![id], |row| row.get::<_, String>(0))
        .map_err(sql_err("list store image keys"))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(sql_err("read store image key"))?;

    conn.execute(
        "UPDATE review_images SET deleted_at = ?1 \
         WHERE deleted_at IS NULL \
           AND review_id IN (SELECT id FROM reviews WHERE store_id = ?2 AND deleted_at IS NULL)",
        params![ts, id],
    )
    .map_err(sql_err("delete store images"))?;

    conn.execute(
        "UPDATE reviews SET deleted_at = ?1, updated_at = ?1 \
         WHERE store_id = ?2 AND deleted_at IS NULL",
        params![ts, id],
    )
    .map_err(sql_err("delete store reviews"))?;

    Ok(Some(keys))
}
