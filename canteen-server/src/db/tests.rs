//! Tests for the SQLite layer.

use canteen_core::query::{ReviewSortField, StoreSortField};
use canteen_core::{ModerationStatus, PageRequest, Sort};
use chrono::{Duration, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use super::idempotency::{self, ClaimOutcome, StoredResponse};
use super::reviews::{self, ReviewFilter};
use super::stores::{self, StoreFilter};
use super::{Database, RepositoryError, CURRENT_SCHEMA_VERSION};
use crate::model::{NewReview, NewStore, Store};

fn new_store(name: &str, address: &str) -> NewStore {
    NewStore {
        name: name.to_string(),
        address: address.to_string(),
        phone: String::new(),
        category: "noodles".to_string(),
        description: String::new(),
        status: ModerationStatus::Approved,
        created_by: Uuid::new_v4(),
        auto_created: false,
    }
}

fn new_review(store_id: Uuid, author_id: Uuid, rating: f64) -> NewReview {
    NewReview {
        store_id,
        author_id,
        title: "Lunch".to_string(),
        content: "Spicy and quick".to_string(),
        rating,
    }
}

fn noodle_bar(conn: &Connection) -> Store {
    stores::insert(conn, &new_store("Noodle Bar", "1 Main St"), Utc::now()).unwrap()
}

fn with_conn<T>(db: &Database, f: impl FnOnce(&Connection) -> T) -> T {
    let conn = db.conn.lock().unwrap();
    f(&conn)
}

fn store_filter(statuses: Vec<ModerationStatus>) -> StoreFilter {
    StoreFilter {
        statuses,
        search: None,
        category: None,
        sort: Sort::default(),
        page: PageRequest::default(),
    }
}

fn review_filter(statuses: Vec<ModerationStatus>) -> ReviewFilter {
    ReviewFilter {
        statuses,
        author_id: None,
        store_id: None,
        search: None,
        sort: Sort::default(),
        page: PageRequest::default(),
    }
}

#[test]
fn test_fresh_database_is_at_current_version() {
    let db = Database::open_in_memory().unwrap();
    let version: i64 = with_conn(&db, |conn| {
        conn.query_row("SELECT version FROM schema_version WHERE id = 1", [], |r| r.get(0))
            .unwrap()
    });
    assert_eq!(version, CURRENT_SCHEMA_VERSION);
}

#[test]
fn test_reopen_on_disk_keeps_rows() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("state").join("canteen.db");

    let id = {
        let db = Database::open(&path).unwrap();
        with_conn(&db, |conn| {
            stores::insert(conn, &new_store("Noodle Bar", "1 Main St"), Utc::now())
                .unwrap()
                .id
        })
    };

    let db = Database::open(&path).unwrap();
    let found = with_conn(&db, |conn| stores::find_by_id(conn, id).unwrap());
    assert_eq!(found.map(|s| s.name), Some("Noodle Bar".to_string()));
}

#[test]
fn test_newer_schema_version_is_refused() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("canteen.db");
    {
        let db = Database::open(&path).unwrap();
        with_conn(&db, |conn| {
            conn.execute("UPDATE schema_version SET version = 99 WHERE id = 1", [])
                .unwrap()
        });
    }
    assert!(matches!(
        Database::open(&path),
        Err(RepositoryError::Storage { .. })
    ));
}

#[test]
fn test_duplicate_store_is_conflict() {
    let db = Database::open_in_memory().unwrap();
    with_conn(&db, |conn| {
        stores::insert(conn, &new_store("Noodle Bar", "1 Main St"), Utc::now()).unwrap();
        let err = stores::insert(conn, &new_store("Noodle Bar", "1 Main St"), Utc::now())
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        // Same name at another address is a different store.
        stores::insert(conn, &new_store("Noodle Bar", "2 Main St"), Utc::now()).unwrap();
    });
}

#[test]
fn test_deleted_store_frees_name_and_address() {
    let db = Database::open_in_memory().unwrap();
    with_conn(&db, |conn| {
        let store = noodle_bar(conn);
        stores::soft_delete_cascade(conn, store.id, Utc::now()).unwrap();

        assert!(stores::find_by_id(conn, store.id).unwrap().is_none());
        assert!(stores::find_by_name_address(conn, "Noodle Bar", "1 Main St")
            .unwrap()
            .is_none());
        stores::insert(conn, &new_store("Noodle Bar", "1 Main St"), Utc::now()).unwrap();
    });
}

#[test]
fn test_duplicate_review_is_conflict() {
    let db = Database::open_in_memory().unwrap();
    with_conn(&db, |conn| {
        let store = noodle_bar(conn);
        let author = Uuid::new_v4();
        reviews::insert(conn, &new_review(store.id, author, 4.0), Utc::now()).unwrap();
        let err =
            reviews::insert(conn, &new_review(store.id, author, 2.0), Utc::now()).unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        reviews::insert(conn, &new_review(store.id, Uuid::new_v4(), 2.0), Utc::now()).unwrap();
    });
}

#[test]
fn test_rating_check_constraint_is_not_a_conflict() {
    let db = Database::open_in_memory().unwrap();
    with_conn(&db, |conn| {
        let store = noodle_bar(conn);
        let err = reviews::insert(conn, &new_review(store.id, Uuid::new_v4(), 6.0), Utc::now())
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Storage { .. }));
    });
}

#[test]
fn test_recompute_aggregate_counts_only_approved_live_reviews() {
    let db = Database::open_in_memory().unwrap();
    with_conn(&db, |conn| {
        let store = noodle_bar(conn);
        assert_eq!(stores::recompute_aggregate(conn, store.id).unwrap(), (0.0, 0));

        let approved = [4.0, 5.0, 3.0];
        let mut ids = Vec::new();
        for rating in approved {
            let review =
                reviews::insert(conn, &new_review(store.id, Uuid::new_v4(), rating), Utc::now())
                    .unwrap();
            reviews::set_status(conn, review.id, ModerationStatus::Approved, None, Utc::now())
                .unwrap();
            ids.push(review.id);
        }
        reviews::insert(conn, &new_review(store.id, Uuid::new_v4(), 0.0), Utc::now()).unwrap();
        let rejected = reviews::insert(conn, &new_review(store.id, Uuid::new_v4(), 1.0), Utc::now())
            .unwrap();
        reviews::set_status(conn, rejected.id, ModerationStatus::Rejected, Some("spam"), Utc::now())
            .unwrap();

        assert_eq!(stores::recompute_aggregate(conn, store.id).unwrap(), (4.0, 3));

        reviews::soft_delete(conn, ids[1], Utc::now()).unwrap();
        assert_eq!(stores::recompute_aggregate(conn, store.id).unwrap(), (3.5, 2));

        let stored = stores::find_by_id(conn, store.id).unwrap().unwrap();
        assert_eq!(stored.average_rating, 3.5);
        assert_eq!(stored.total_reviews, 2);
    });
}

#[test]
fn test_store_search_scopes_status_and_escapes_like() {
    let db = Database::open_in_memory().unwrap();
    with_conn(&db, |conn| {
        stores::insert(conn, &new_store("100% Noodles", "1 Main St"), Utc::now()).unwrap();
        stores::insert(conn, &new_store("1000 Dumplings", "2 Main St"), Utc::now()).unwrap();
        let mut pending = new_store("Secret Noodles", "3 Main St");
        pending.status = ModerationStatus::Pending;
        stores::insert(conn, &pending, Utc::now()).unwrap();

        let mut filter = store_filter(vec![ModerationStatus::Approved]);
        filter.search = Some("noodles".to_string());
        let (found, total) = stores::search(conn, &filter).unwrap();
        assert_eq!(total, 1);
        assert_eq!(found[0].name, "100% Noodles");

        filter.search = Some("100%".to_string());
        let (found, total) = stores::search(conn, &filter).unwrap();
        assert_eq!(total, 1);
        assert_eq!(found[0].name, "100% Noodles");

        let mut filter = store_filter(ModerationStatus::ALL.to_vec());
        filter.search = Some("noodles".to_string());
        assert_eq!(stores::search(conn, &filter).unwrap().1, 2);
    });
}

#[test]
fn test_store_search_pages_and_sorts() {
    let db = Database::open_in_memory().unwrap();
    with_conn(&db, |conn| {
        let base = Utc::now();
        for i in 0..5 {
            let store = stores::insert(
                conn,
                &new_store(&format!("Stall {i}"), "Food Court"),
                base + Duration::seconds(i),
            )
            .unwrap();
            stores::update_aggregate(conn, store.id, i as f64, i).unwrap();
        }

        let mut filter = store_filter(vec![ModerationStatus::Approved]);
        filter.page = PageRequest::parse(Some("2"), Some("2"));
        let (page, total) = stores::search(conn, &filter).unwrap();
        assert_eq!(total, 5);
        let names: Vec<_> = page.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["Stall 2", "Stall 1"]);

        filter.page = PageRequest::default();
        filter.sort = Sort::<StoreSortField>::parse(Some("rating"), Some("asc"));
        let (page, _) = stores::search(conn, &filter).unwrap();
        assert_eq!(page[0].name, "Stall 0");
        assert_eq!(page[4].name, "Stall 4");

        filter.category = Some("dumplings".to_string());
        assert_eq!(stores::search(conn, &filter).unwrap().1, 0);
    });
}

#[test]
fn test_review_list_filters_and_attaches_images() {
    let db = Database::open_in_memory().unwrap();
    with_conn(&db, |conn| {
        let store = noodle_bar(conn);
        let author = Uuid::new_v4();
        let mine = reviews::insert(conn, &new_review(store.id, author, 4.5), Utc::now()).unwrap();
        let other = reviews::insert(conn, &new_review(store.id, Uuid::new_v4(), 2.0), Utc::now())
            .unwrap();
        reviews::set_status(conn, other.id, ModerationStatus::Approved, None, Utc::now()).unwrap();

        let first = Utc::now();
        reviews::insert_image(conn, mine.id, "k/2", "/uploads/k/2", first + Duration::seconds(1))
            .unwrap();
        reviews::insert_image(conn, mine.id, "k/1", "/uploads/k/1", first).unwrap();

        let (approved, total) =
            reviews::list(conn, &review_filter(vec![ModerationStatus::Approved])).unwrap();
        assert_eq!(total, 1);
        assert_eq!(approved[0].id, other.id);

        let mut filter = review_filter(ModerationStatus::ALL.to_vec());
        filter.author_id = Some(author);
        let (own, _) = reviews::list(conn, &filter).unwrap();
        assert_eq!(own.len(), 1);
        let keys: Vec<_> = own[0].images.iter().map(|i| i.storage_key.as_str()).collect();
        assert_eq!(keys, ["k/1", "k/2"]);

        let mut filter = review_filter(ModerationStatus::ALL.to_vec());
        filter.sort = Sort::<ReviewSortField>::parse(Some("-rating"), None);
        let (sorted, _) = reviews::list(conn, &filter).unwrap();
        assert_eq!(sorted[0].id, mine.id);
    });
}

#[test]
fn test_update_content_resets_to_pending() {
    let db = Database::open_in_memory().unwrap();
    with_conn(&db, |conn| {
        let store = noodle_bar(conn);
        let review = reviews::insert(conn, &new_review(store.id, Uuid::new_v4(), 4.0), Utc::now())
            .unwrap();
        reviews::set_status(conn, review.id, ModerationStatus::Rejected, Some("rude"), Utc::now())
            .unwrap();

        reviews::update_content(conn, review.id, "Better", "Polite now", 3.0, Utc::now()).unwrap();
        let updated = reviews::find_by_id(conn, review.id).unwrap().unwrap();
        assert_eq!(updated.status, ModerationStatus::Pending);
        assert_eq!(updated.rejection_reason, None);
        assert_eq!(updated.title, "Better");
        assert_eq!(updated.rating, 3.0);
    });
}

#[test]
fn test_store_delete_cascades_and_returns_keys() {
    let db = Database::open_in_memory().unwrap();
    with_conn(&db, |conn| {
        let store = noodle_bar(conn);
        let review = reviews::insert(conn, &new_review(store.id, Uuid::new_v4(), 4.0), Utc::now())
            .unwrap();
        reviews::insert_image(conn, review.id, "a", "/uploads/a", Utc::now()).unwrap();
        reviews::insert_image(conn, review.id, "b", "/uploads/b", Utc::now()).unwrap();

        let mut keys = stores::soft_delete_cascade(conn, store.id, Utc::now())
            .unwrap()
            .unwrap();
        keys.sort();
        assert_eq!(keys, ["a", "b"]);
        assert!(reviews::find_by_id(conn, review.id).unwrap().is_none());
        assert!(reviews::images_for_review(conn, review.id).unwrap().is_empty());

        assert_eq!(stores::soft_delete_cascade(conn, store.id, Utc::now()).unwrap(), None);
    });
}

#[tokio::test]
async fn test_transaction_rolls_back_on_error() {
    let db = Database::open_in_memory().unwrap();
    let result: Result<(), RepositoryError> = db
        .transaction("test", |tx| {
            stores::insert(tx, &new_store("Noodle Bar", "1 Main St"), Utc::now())?;
            Err(RepositoryError::storage("test", "forced"))
        })
        .await;
    assert!(result.is_err());

    let found = db
        .run("find", |conn| stores::find_by_name_address(conn, "Noodle Bar", "1 Main St"))
        .await
        .unwrap();
    assert!(found.is_none());
}

// =============================================================================
// Idempotency records
// =============================================================================

fn stored(status: u16, body: &str) -> StoredResponse {
    StoredResponse {
        status,
        content_type: Some("application/json".to_string()),
        body: body.as_bytes().to_vec(),
    }
}

#[tokio::test]
async fn test_claim_then_in_progress_then_completed() {
    let db = Database::open_in_memory().unwrap();
    let user = Uuid::new_v4();

    let ClaimOutcome::Claimed { claimed_at } =
        db.try_claim_idempotency_key(user, "k1", "h1", 60).await.unwrap()
    else {
        panic!("first request should claim the key");
    };

    let second = db.try_claim_idempotency_key(user, "k1", "h1", 60).await.unwrap();
    assert_eq!(second, ClaimOutcome::InProgress);

    let completed = db
        .complete_idempotency_key(user, "k1", claimed_at, stored(201, "{\"id\":1}"))
        .await
        .unwrap();
    assert!(completed);
    let third = db.try_claim_idempotency_key(user, "k1", "h1", 60).await.unwrap();
    assert_eq!(third, ClaimOutcome::Completed(stored(201, "{\"id\":1}")));
}

#[tokio::test]
async fn test_keys_are_scoped_per_user() {
    let db = Database::open_in_memory().unwrap();
    let a = db.try_claim_idempotency_key(Uuid::new_v4(), "k", "h", 60).await.unwrap();
    let b = db.try_claim_idempotency_key(Uuid::new_v4(), "k", "h", 60).await.unwrap();
    assert!(matches!(a, ClaimOutcome::Claimed { .. }));
    assert!(matches!(b, ClaimOutcome::Claimed { .. }));
}

#[tokio::test]
async fn test_different_body_is_hash_mismatch() {
    let db = Database::open_in_memory().unwrap();
    let user = Uuid::new_v4();
    db.try_claim_idempotency_key(user, "k", "h1", 60).await.unwrap();
    let outcome = db.try_claim_idempotency_key(user, "k", "h2", 60).await.unwrap();
    assert_eq!(outcome, ClaimOutcome::HashMismatch);
}

#[tokio::test]
async fn test_release_allows_reclaim() {
    let db = Database::open_in_memory().unwrap();
    let user = Uuid::new_v4();
    let ClaimOutcome::Claimed { claimed_at } =
        db.try_claim_idempotency_key(user, "k", "h1", 60).await.unwrap()
    else {
        panic!("first request should claim the key");
    };
    assert!(db.release_idempotency_key(user, "k", claimed_at).await.unwrap());
    let outcome = db.try_claim_idempotency_key(user, "k", "h2", 60).await.unwrap();
    assert!(matches!(outcome, ClaimOutcome::Claimed { .. }));
}

#[test]
fn test_expired_record_is_treated_as_unseen() {
    let db = Database::open_in_memory().unwrap();
    let user = Uuid::new_v4();
    with_conn(&db, |conn| {
        let now = 1_000;
        idempotency::try_claim_sync(conn, user, "k", "h1", now, 10).unwrap();
        idempotency::complete_sync(conn, user, "k", now, &stored(201, "old")).unwrap();

        // Still live one second before expiry.
        assert!(matches!(
            idempotency::try_claim_sync(conn, user, "k", "h1", now + 9, 10).unwrap(),
            ClaimOutcome::Completed(_)
        ));

        // Expired: even a different body may claim the key.
        assert_eq!(
            idempotency::try_claim_sync(conn, user, "k", "h2", now + 10, 10).unwrap(),
            ClaimOutcome::Claimed {
                claimed_at: now + 10
            }
        );
        assert_eq!(
            idempotency::try_claim_sync(conn, user, "k", "h2", now + 11, 10).unwrap(),
            ClaimOutcome::InProgress
        );
    });
}

#[test]
fn test_stale_claim_cannot_touch_reclaimed_record() {
    let db = Database::open_in_memory().unwrap();
    let user = Uuid::new_v4();
    with_conn(&db, |conn| {
        let now = 1_000;
        idempotency::try_claim_sync(conn, user, "k", "h1", now, 10).unwrap();
        // The first request outlives its TTL and a retry takes the key over.
        idempotency::try_claim_sync(conn, user, "k", "h1", now + 10, 10).unwrap();

        assert!(!idempotency::complete_sync(conn, user, "k", now, &stored(201, "stale")).unwrap());
        assert!(!idempotency::release_sync(conn, user, "k", now).unwrap());
        assert_eq!(
            idempotency::try_claim_sync(conn, user, "k", "h1", now + 11, 10).unwrap(),
            ClaimOutcome::InProgress
        );

        assert!(
            idempotency::complete_sync(conn, user, "k", now + 10, &stored(201, "fresh")).unwrap()
        );
        assert_eq!(
            idempotency::try_claim_sync(conn, user, "k", "h1", now + 12, 10).unwrap(),
            ClaimOutcome::Completed(stored(201, "fresh"))
        );
        // A completed record is no longer releasable.
        assert!(!idempotency::release_sync(conn, user, "k", now + 10).unwrap());
    });
}

#[test]
fn test_cleanup_deletes_only_expired() {
    let db = Database::open_in_memory().unwrap();
    with_conn(&db, |conn| {
        idempotency::try_claim_sync(conn, Uuid::new_v4(), "old", "h", 100, 10).unwrap();
        idempotency::try_claim_sync(conn, Uuid::new_v4(), "new", "h", 100, 1_000).unwrap();

        assert_eq!(idempotency::cleanup_expired_sync(conn, 200).unwrap(), 1);
        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM idempotency_keys", [], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining, 1);
    });
}

mod aggregate_properties {
    use proptest::prelude::*;

    use super::*;

    fn status_strategy() -> impl Strategy<Value = ModerationStatus> {
        prop_oneof![
            Just(ModerationStatus::Pending),
            Just(ModerationStatus::Approved),
            Just(ModerationStatus::Rejected),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn recompute_matches_mean_of_approved_live_reviews(
            reviews_in in prop::collection::vec((0u8..=50, status_strategy(), any::<bool>()), 0..12)
        ) {
            let db = Database::open_in_memory().unwrap();
            let (average, total) = with_conn(&db, |conn| {
                let store = noodle_bar(conn);
                for (tenths, status, deleted) in &reviews_in {
                    let rating = f64::from(*tenths) / 10.0;
                    let new = new_review(store.id, Uuid::new_v4(), rating);
                    let review = reviews::insert(conn, &new, Utc::now()).unwrap();
                    let reason = (*status == ModerationStatus::Rejected).then_some("no");
                    reviews::set_status(conn, review.id, *status, reason, Utc::now()).unwrap();
                    if *deleted {
                        reviews::soft_delete(conn, review.id, Utc::now()).unwrap();
                    }
                }
                stores::recompute_aggregate(conn, store.id).unwrap()
            });

            let counted: Vec<f64> = reviews_in
                .iter()
                .filter(|(_, status, deleted)| *status == ModerationStatus::Approved && !deleted)
                .map(|(tenths, _, _)| f64::from(*tenths) / 10.0)
                .collect();
            prop_assert_eq!(total, counted.len() as i64);
            if counted.is_empty() {
                prop_assert_eq!(average, 0.0);
            } else {
                let expected = counted.iter().sum::<f64>() / counted.len() as f64;
                prop_assert!((average - expected).abs() < 1e-9);
            }
        }
    }
}
