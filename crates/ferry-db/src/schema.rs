//! Idempotent schema bootstrap.
//!
//! Migrations live in the workspace `migrations/` directory and are embedded
//! at compile time. Running them twice is a no-op.

use sqlx::migrate::Migrator;
use sqlx::PgPool;

use crate::error::LedgerResult;

static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Create the ledger table, indexes and guards if they do not exist yet.
#[tracing::instrument(skip(pool))]
pub async fn bootstrap(pool: &PgPool) -> LedgerResult<()> {
    MIGRATOR.run(pool).await?;
    tracing::info!(
        migrations = MIGRATOR.iter().count(),
        "Ledger schema is up to date"
    );
    Ok(())
}
