//! PostgreSQL ledger tests.
//!
//! Run against a disposable database:
//! `DATABASE_URL=postgresql://... cargo test -p ferry-db -- --ignored`

use ferry_core::{FileCategory, NewFileRecord};
use ferry_db::{schema, FileRecordRepository, Ledger, LedgerError};
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use uuid::Uuid;

const TTL: Duration = Duration::from_secs(3600);

async fn repository() -> FileRecordRepository {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for ignored tests");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&url)
        .await
        .expect("Failed to connect to test database");
    schema::bootstrap(&pool).await.expect("Failed to bootstrap schema");
    FileRecordRepository::new(pool)
}

fn new_record(prefix: &str) -> NewFileRecord {
    let identity_key = format!("{prefix}-{}", Uuid::new_v4());
    NewFileRecord {
        origin_name: format!("{identity_key}.mov"),
        origin_path: format!("watched/{identity_key}.mov"),
        identity_key,
        internal_id: Uuid::new_v4(),
        category: FileCategory::Video,
        extension: Some("mov".to_string()),
        size_bytes: Some(1024),
    }
}

#[tokio::test]
#[ignore]
async fn bootstrap_is_idempotent() {
    let repo = repository().await;
    schema::bootstrap(repo.pool()).await.unwrap();
    schema::bootstrap(repo.pool()).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn duplicate_insert_is_a_noop() {
    let repo = repository().await;
    let record = new_record("dup");
    assert!(repo.insert_if_absent(&record).await.unwrap());
    assert!(!repo.insert_if_absent(&record).await.unwrap());

    let stored = repo.get_by_identity(&record.identity_key).await.unwrap().unwrap();
    assert!(!stored.transferred);
    assert!(!stored.finalized);
    assert_eq!(stored.category, FileCategory::Video);
}

#[tokio::test]
#[ignore]
async fn claim_then_mark_transferred() {
    let repo = repository().await;
    let record = new_record("claim");
    repo.insert_if_absent(&record).await.unwrap();
    repo.set_destination_key(&record.identity_key, "media/claim.mov", TTL)
        .await
        .unwrap();

    let stored = repo.get_by_identity(&record.identity_key).await.unwrap().unwrap();
    let worker = Uuid::new_v4();
    let others: Vec<i64> = Vec::new();
    let claimed = repo.claim_batch(worker, 1000, &others, TTL).await.unwrap();
    assert!(claimed.iter().any(|r| r.id == stored.id));

    // A second worker must not see rows the first one holds.
    let rival = repo
        .claim_batch(Uuid::new_v4(), 1000, &others, TTL)
        .await
        .unwrap();
    assert!(rival.iter().all(|r| r.id != stored.id));

    // The holder's claim locks the destination.
    let err = repo
        .set_destination_key(&record.identity_key, "media/renamed.mov", TTL)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Claimed(_)));

    assert!(!repo
        .mark_transferred(stored.id, worker, "media/renamed.mov")
        .await
        .unwrap());
    assert!(repo
        .mark_transferred(stored.id, worker, "media/claim.mov")
        .await
        .unwrap());
    assert!(!repo
        .mark_transferred(stored.id, worker, "media/claim.mov")
        .await
        .unwrap());

    for r in claimed.iter().filter(|r| r.id != stored.id) {
        repo.release_claim(r.id, worker).await.unwrap();
    }

    let err = repo
        .set_destination_key(&record.identity_key, "media/elsewhere.mov", TTL)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyTransferred(_)));
}

#[tokio::test]
#[ignore]
async fn transferred_cannot_be_reset_by_hand() {
    let repo = repository().await;
    let record = new_record("guard");
    repo.insert_if_absent(&record).await.unwrap();
    let stored = repo
        .set_destination_key(&record.identity_key, "media/guard.mov", TTL)
        .await
        .unwrap();
    assert!(repo
        .mark_transferred(stored.id, Uuid::new_v4(), "media/guard.mov")
        .await
        .unwrap());

    let result = sqlx::query("UPDATE file_records SET transferred = FALSE WHERE id = $1")
        .bind(stored.id)
        .execute(repo.pool())
        .await;
    assert!(result.is_err());
}
