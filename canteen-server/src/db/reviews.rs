//! Review and review-image rows.

use std::collections::HashMap;

use canteen_core::query::ReviewSortField;
use canteen_core::{ModerationStatus, PageRequest, Sort};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{
    format_timestamp, get_status, get_timestamp, get_uuid, like_pattern, placeholders, sql_err,
    RepositoryError,
};
use crate::model::{NewReview, Review, ReviewImage};

const REVIEW_COLUMNS: &str = "id, store_id, author_id, title, content, rating, status, \
     rejection_reason, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct ReviewFilter {
    /// Never empty.
    pub statuses: Vec<ModerationStatus>,
    pub author_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
    pub search: Option<String>,
    pub sort: Sort<ReviewSortField>,
    pub page: PageRequest,
}

fn row_to_review(row: &Row<'_>) -> rusqlite::Result<Review> {
    Ok(Review {
        id: get_uuid(row, 0)?,
        store_id: get_uuid(row, 1)?,
        author_id: get_uuid(row, 2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        rating: row.get(5)?,
        status: get_status(row, 6)?,
        rejection_reason: row.get(7)?,
        created_at: get_timestamp(row, 8)?,
        updated_at: get_timestamp(row, 9)?,
        images: Vec::new(),
    })
}

fn row_to_image(row: &Row<'_>) -> rusqlite::Result<ReviewImage> {
    Ok(ReviewImage {
        id: get_uuid(row, 0)?,
        review_id: get_uuid(row, 1)?,
        storage_key: row.get(2)?,
        url: row.get(3)?,
        created_at: get_timestamp(row, 4)?,
    })
}

/// Insert a pending review. A live review by the same author for the same
/// store yields `RepositoryError::Conflict`.
pub fn insert(
    conn: &Connection,
    new: &NewReview,
    now: DateTime<Utc>,
) -> Result<Review, RepositoryError> {
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO reviews (id, store_id, author_id, title, content, rating, status, \
         created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?7)",
        params![
            id.to_string(),
            new.store_id.to_string(),
            new.author_id.to_string(),
            new.title,
            new.content,
            new.rating,
            format_timestamp(now),
        ],
    )
    .map_err(sql_err("insert review"))?;

    find_by_id(conn, id)?.ok_or_else(|| RepositoryError::corruption("inserted review vanished"))
}

/// Live review with its live images attached.
pub fn find_by_id(conn: &Connection, id: Uuid) -> Result<Option<Review>, RepositoryError> {
    let review = conn
        .query_row(
            &format!("SELECT {REVIEW_COLUMNS} FROM reviews WHERE id = ?1 AND deleted_at IS NULL"),
            params![id.to_string()],
            row_to_review,
        )
        .optional()
        .map_err(sql_err("find review"))?;

    match review {
        Some(mut review) => {
            review.images = images_for_review(conn, review.id)?;
            Ok(Some(review))
        }
        None => Ok(None),
    }
}

pub fn find_by_author_and_store(
    conn: &Connection,
    author_id: Uuid,
    store_id: Uuid,
) -> Result<Option<Review>, RepositoryError> {
    conn.query_row(
        &format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews \
             WHERE author_id = ?1 AND store_id = ?2 AND deleted_at IS NULL"
        ),
        params![author_id.to_string(), store_id.to_string()],
        row_to_review,
    )
    .optional()
    .map_err(sql_err("find review by author and store"))
}

/// Overwrite the editable fields and send the review back to pending.
pub fn update_content(
    conn: &Connection,
    id: Uuid,
    title: &str,
    content: &str,
    rating: f64,
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    conn.execute(
        "UPDATE reviews SET title = ?1, content = ?2, rating = ?3, status = 'pending', \
         rejection_reason = NULL, updated_at = ?4 \
         WHERE id = ?5 AND deleted_at IS NULL",
        params![title, content, rating, format_timestamp(now), id.to_string()],
    )
    .map_err(sql_err("update review"))?;
    Ok(())
}

pub fn set_status(
    conn: &Connection,
    id: Uuid,
    status: ModerationStatus,
    rejection_reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    conn.execute(
        "UPDATE reviews SET status = ?1, rejection_reason = ?2, updated_at = ?3 \
         WHERE id = ?4 AND deleted_at IS NULL",
        params![status.as_str(), rejection_reason, format_timestamp(now), id.to_string()],
    )
    .map_err(sql_err("update review status"))?;
    Ok(())
}

/// One page of live reviews matching `filter`, images attached, plus the
/// total match count.
pub fn list(
    conn: &Connection,
    filter: &ReviewFilter,
) -> Result<(Vec<Review>, u64), RepositoryError> {
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

    if let Some(author_id) = filter.author_id {
        clauses.push(format!("author_id = ?{}", values.len() + 1));
        values.push(Value::Text(author_id.to_string()));
    }

    if let Some(store_id) = filter.store_id {
        clauses.push(format!("store_id = ?{}", values.len() + 1));
        values.push(Value::Text(store_id.to_string()));
    }

    if let Some(q) = &filter.search {
        let n = values.len() + 1;
        clauses.push(format!(
            "(title LIKE ?{n} ESCAPE '\\' OR content LIKE ?{n} ESCAPE '\\')"
        ));
        values.push(Value::Text(like_pattern(q)));
    }

    let where_clause = clauses.join(" AND ");

    let total: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM reviews WHERE {where_clause}"),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )
        .map_err(sql_err("count reviews"))?;

    let limit_idx = values.len() + 1;
    let sql = format!(
        "SELECT {REVIEW_COLUMNS} FROM reviews WHERE {where_clause} \
         ORDER BY {} LIMIT ?{} OFFSET ?{}",
        filter.sort.order_by(),
        limit_idx,
        limit_idx + 1
    );
    values.push(Value::Integer(filter.page.limit() as i64));
    values.push(Value::Integer(filter.page.offset() as i64));

    let mut stmt = conn.prepare(&sql).map_err(sql_err("prepare review list"))?;
    let mut reviews = stmt
        .query_map(params_from_iter(values.iter()), row_to_review)
        .map_err(sql_err("list reviews"))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(sql_err("read review row"))?;

    attach_images(conn, &mut reviews)?;
    Ok((reviews, total as u64))
}

pub fn images_for_review(
    conn: &Connection,
    review_id: Uuid,
) -> Result<Vec<ReviewImage>, RepositoryError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, review_id, storage_key, url, created_at FROM review_images \
             WHERE review_id = ?1 AND deleted_at IS NULL ORDER BY created_at, id",
        )
        .map_err(sql_err("prepare review images"))?;
    let images = stmt
        .query_map(params![review_id.to_string()], row_to_image)
        .map_err(sql_err("list review images"))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(sql_err("read review image"))?;
    Ok(images)
}

/// Fill in `images` for a page of reviews with a single query.
fn attach_images(conn: &Connection, reviews: &mut [Review]) -> Result<(), RepositoryError> {
    if reviews.is_empty() {
        return Ok(());
    }

    let sql = format!(
        "SELECT id, review_id, storage_key, url, created_at FROM review_images \
         WHERE deleted_at IS NULL AND review_id IN ({}) ORDER BY created_at, id",
        placeholders(1, reviews.len())
    );
    let ids: Vec<String> = reviews.iter().map(|r| r.id.to_string()).collect();

    let mut stmt = conn.prepare(&sql).map_err(sql_err("prepare review images"))?;
    let images = stmt
        .query_map(params_from_iter(ids.iter()), row_to_image)
        .map_err(sql_err("list review images"))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(sql_err("read review image"))?;

    let mut by_review: HashMap<Uuid, Vec<ReviewImage>> = HashMap::new();
    for image in images {
        by_review.entry(image.review_id).or_default().push(image);
    }
    for review in reviews.iter_mut() {
        review.images = by_review.remove(&review.id).unwrap_or_default();
    }
    Ok(())
}

pub fn insert_image(
    conn: &Connection,
    review_id: Uuid,
    storage_key: &str,
    url: &str,
    now: DateTime<Utc>,
) -> Result<ReviewImage, RepositoryError> {
    let image = ReviewImage {
        id: Uuid::new_v4(),
        review_id,
        storage_key: storage_key.to_string(),
        url: url.to_string(),
        created_at: now,
    };
    conn.execute(
        "INSERT INTO review_images (id, review_id, storage_key, url, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            image.id.to_string(),
            review_id.to_string(),
            image.storage_key,
            image.url,
            format_timestamp(now),
        ],
    )
    .map_err(sql_err("insert review image"))?;
    Ok(image)
}

/// Soft-delete a review and its images, returning the images' storage keys,
/// or `None` if the review does not exist.
pub fn soft_delete(
    conn: &Connection,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<Vec<String>>, RepositoryError> {
    let ts = format_timestamp(now);

    let updated = conn
        .execute(
            "UPDATE reviews SET deleted_at = ?1, updated_at = ?1 \
             WHERE id = ?2 AND deleted_at IS NULL",
            params![ts, id.to_string()],
        )
        .map_err(sql_err("delete review"))?;
    if updated == 0 {
        return Ok(None);
    }

    let keys = images_for_review(conn, id)?
        .into_iter()
        .map(|image| image.storage_key)
        .collect();

    conn.execute(
        "UPDATE review_images SET deleted_at = ?1 WHERE review_id = ?2 AND deleted_at IS NULL",
        params![ts, id.to_string()],
    )
    .map_err(sql_err("delete review images"))?;

    Ok(Some(keys))
}
