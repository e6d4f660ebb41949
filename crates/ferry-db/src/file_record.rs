//! File record repository: PostgreSQL implementation of [`Ledger`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_core::constants::FILE_RECORDS_TABLE;
use ferry_core::{FileCategory, FileRecord, LedgerStats, NewFileRecord};
use sqlx::{PgPool, Postgres};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::Ledger;

const RECORD_COLUMNS: &str = "id, identity_key, origin_name, origin_path, internal_id, category, \
     extension, size_bytes, transferred, finalized, destination_key, new_name, \
     claimed_by, claimed_at, created_at, updated_at";

/// Row type for file_records table (for FromRow).
#[derive(Debug, sqlx::FromRow)]
pub struct FileRecordRow {
    pub id: i64,
    pub identity_key: String,
    pub origin_name: String,
    pub origin_path: String,
    pub internal_id: Uuid,
    pub category: String,
    pub extension: Option<String>,
    pub size_bytes: Option<i64>,
    pub transferred: bool,
    pub finalized: bool,
    pub destination_key: Option<String>,
    pub new_name: Option<String>,
    pub claimed_by: Option<Uuid>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecordRow {
    pub fn to_file_record(self) -> FileRecord {
        let category = self.category.parse().unwrap_or_else(|_| {
            tracing::warn!(
                record_id = self.id,
                category = %self.category,
                "Unknown category in ledger, treating as binary"
            );
            FileCategory::Binary
        });

        FileRecord {
            id: self.id,
            identity_key: self.identity_key,
            origin_name: self.origin_name,
            origin_path: self.origin_path,
            internal_id: self.internal_id,
            category,
            extension: self.extension,
            size_bytes: self.size_bytes,
            transferred: self.transferred,
            finalized: self.finalized,
            destination_key: self.destination_key,
            new_name: self.new_name,
            claimed_by: self.claimed_by,
            claimed_at: self.claimed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LedgerStatsRow {
    total: i64,
    awaiting_destination: i64,
    eligible: i64,
    claimed: i64,
    transferred: i64,
    finalized: i64,
}

/// Repository for file_records table.
#[derive(Clone)]
pub struct FileRecordRepository {
    pool: PgPool,
}

impl FileRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Claims older than this are treated as abandoned by a crashed worker.
fn ttl_seconds(claim_ttl: Duration) -> f64 {
    claim_ttl.as_secs_f64()
}

#[async_trait]
impl Ledger for FileRecordRepository {
    #[tracing::instrument(
        skip(self, record),
        fields(db.table = FILE_RECORDS_TABLE, identity_key = %record.identity_key)
    )]
    async fn insert_if_absent(&self, record: &NewFileRecord) -> LedgerResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO file_records
                (identity_key, origin_name, origin_path, internal_id, category, extension, size_bytes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (identity_key) DO NOTHING
            "#,
        )
        .bind(&record.identity_key)
        .bind(&record.origin_name)
        .bind(&record.origin_path)
        .bind(record.internal_id)
        .bind(record.category.as_str())
        .bind(&record.extension)
        .bind(record.size_bytes)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self), fields(db.table = FILE_RECORDS_TABLE))]
    async fn select_batch(&self, limit: i64) -> LedgerResult<Vec<FileRecord>> {
        let query = format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM file_records
            WHERE transferred = FALSE
              AND destination_key IS NOT NULL
              AND btrim(destination_key) <> ''
            ORDER BY created_at ASC, id ASC
            LIMIT $1
            "#
        );
        let rows: Vec<FileRecordRow> = sqlx::query_as::<Postgres, FileRecordRow>(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|r| r.to_file_record()).collect())
    }

    #[tracing::instrument(
        skip(self, exclude),
        fields(db.table = FILE_RECORDS_TABLE, worker_id = %worker_id, excluded = exclude.len())
    )]
    async fn claim_batch(
        &self,
        worker_id: Uuid,
        limit: i64,
        exclude: &[i64],
        claim_ttl: Duration,
    ) -> LedgerResult<Vec<FileRecord>> {
        // SKIP LOCKED lets concurrent workers claim disjoint rows without waiting.
        let query = format!(
            r#"
            UPDATE file_records
            SET claimed_by = $1, claimed_at = NOW(), updated_at = NOW()
            WHERE id IN (
                SELECT id
                FROM file_records
                WHERE transferred = FALSE
                  AND destination_key IS NOT NULL
                  AND btrim(destination_key) <> ''
                  AND (claimed_by IS NULL
                       OR claimed_by = $1
                       OR claimed_at < NOW() - make_interval(secs => $2))
                  AND NOT (id = ANY($3))
                ORDER BY created_at ASC, id ASC
                LIMIT $4
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {RECORD_COLUMNS}
            "#
        );
        let rows: Vec<FileRecordRow> = sqlx::query_as::<Postgres, FileRecordRow>(&query)
            .bind(worker_id)
            .bind(ttl_seconds(claim_ttl))
            .bind(exclude)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        // RETURNING does not preserve the subquery order.
        let mut records: Vec<FileRecord> = rows.into_iter().map(|r| r.to_file_record()).collect();
        records.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(records)
    }

    #[tracing::instrument(skip(self), fields(db.table = FILE_RECORDS_TABLE, db.record_id = id))]
    async fn mark_transferred(
        &self,
        id: i64,
        worker_id: Uuid,
        destination_key: &str,
    ) -> LedgerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE file_records
            SET transferred = TRUE, claimed_by = NULL, claimed_at = NULL, updated_at = NOW()
            WHERE id = $1 AND transferred = FALSE AND destination_key = $2
            "#,
        )
        .bind(id)
        .bind(destination_key)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(
                record_id = id,
                worker_id = %worker_id,
                destination_key = %destination_key,
                "Record not marked: already transferred or destination changed"
            );
        }
        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self), fields(db.table = FILE_RECORDS_TABLE, db.record_id = id))]
    async fn release_claim(&self, id: i64, worker_id: Uuid) -> LedgerResult<()> {
        sqlx::query(
            r#"
            UPDATE file_records
            SET claimed_by = NULL, claimed_at = NULL, updated_at = NOW()
            WHERE id = $1 AND claimed_by = $2
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = FILE_RECORDS_TABLE))]
    async fn set_destination_key(
        &self,
        identity_key: &str,
        destination_key: &str,
        claim_ttl: Duration,
    ) -> LedgerResult<FileRecord> {
        let destination_key = destination_key.trim();
        if destination_key.is_empty() {
            return Err(LedgerError::InvalidInput(
                "destination key cannot be empty".to_string(),
            ));
        }

        let query = format!(
            r#"
            UPDATE file_records
            SET destination_key = $2, updated_at = NOW()
            WHERE identity_key = $1
              AND (
                destination_key = $2
                OR (
                  transferred = FALSE
                  AND (claimed_by IS NULL OR claimed_at < NOW() - make_interval(secs => $3))
                )
              )
            RETURNING {RECORD_COLUMNS}
            "#
        );
        let row: Option<FileRecordRow> = sqlx::query_as::<Postgres, FileRecordRow>(&query)
            .bind(identity_key)
            .bind(destination_key)
            .bind(ttl_seconds(claim_ttl))
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(row.to_file_record()),
            None => match self.get_by_identity(identity_key).await? {
                Some(record) if record.transferred => {
                    Err(LedgerError::AlreadyTransferred(identity_key.to_string()))
                }
                Some(_) => Err(LedgerError::Claimed(identity_key.to_string())),
                None => Err(LedgerError::NotFound(identity_key.to_string())),
            },
        }
    }

    #[tracing::instrument(skip(self), fields(db.table = FILE_RECORDS_TABLE))]
    async fn get_by_identity(&self, identity_key: &str) -> LedgerResult<Option<FileRecord>> {
        let query = format!("SELECT {RECORD_COLUMNS} FROM file_records WHERE identity_key = $1");
        let row: Option<FileRecordRow> = sqlx::query_as::<Postgres, FileRecordRow>(&query)
            .bind(identity_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.to_file_record()))
    }

    #[tracing::instrument(skip(self), fields(db.table = FILE_RECORDS_TABLE))]
    async fn stats(&self, claim_ttl: Duration) -> LedgerResult<LedgerStats> {
        let row: LedgerStatsRow = sqlx::query_as::<Postgres, LedgerStatsRow>(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (
                    WHERE transferred = FALSE
                      AND (destination_key IS NULL OR btrim(destination_key) = '')
                ) AS awaiting_destination,
                COUNT(*) FILTER (
                    WHERE transferred = FALSE
                      AND destination_key IS NOT NULL
                      AND btrim(destination_key) <> ''
                ) AS eligible,
                COUNT(*) FILTER (
                    WHERE transferred = FALSE
                      AND claimed_by IS NOT NULL
                      AND claimed_at >= NOW() - make_interval(secs => $1)
                ) AS claimed,
                COUNT(*) FILTER (WHERE transferred = TRUE) AS transferred,
                COUNT(*) FILTER (WHERE finalized = TRUE) AS finalized
            FROM file_records
            "#,
        )
        .bind(ttl_seconds(claim_ttl))
        .fetch_one(&self.pool)
        .await?;

        Ok(LedgerStats {
            total: row.total,
            awaiting_destination: row.awaiting_destination,
            eligible: row.eligible,
            claimed: row.claimed,
            transferred: row.transferred,
            finalized: row.finalized,
        })
    }

    async fn ping(&self) -> LedgerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(category: &str) -> FileRecordRow {
        let now = Utc::now();
        FileRecordRow {
            id: 7,
            identity_key: "1AbC".to_string(),
            origin_name: "clip.mp4".to_string(),
            origin_path: "watched/clip.mp4".to_string(),
            internal_id: Uuid::new_v4(),
            category: category.to_string(),
            extension: Some("mp4".to_string()),
            size_bytes: Some(4096),
            transferred: false,
            finalized: false,
            destination_key: Some("media/clip.mp4".to_string()),
            new_name: None,
            claimed_by: None,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn row_maps_to_domain_record() {
        let record = row("video").to_file_record();
        assert_eq!(record.id, 7);
        assert_eq!(record.category, FileCategory::Video);
        assert!(record.is_eligible());
    }

    #[test]
    fn unknown_category_falls_back_to_binary() {
        let record = row("hologram").to_file_record();
        assert_eq!(record.category, FileCategory::Binary);
    }
}
