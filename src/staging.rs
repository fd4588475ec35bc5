//! SQLite-backed [`StagingStore`] implementation.
//!
//! Each record is one row keyed by id, so concurrent workers never contend
//! on a shared file; SQLite's per-statement atomicity is the only
//! synchronization. Errors use `ON CONFLICT DO NOTHING`, which makes the
//! first error for an id the one that sticks.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use vivy_ingest_core::models::{ErrorRecord, IndexRecord};
use vivy_ingest_core::store::{SeedStats, StagingStore};

pub struct SqliteStagingStore {
    pool: SqlitePool,
}

impl SqliteStagingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StagingStore for SqliteStagingStore {
    async fn put_record(&self, record: &IndexRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        sqlx::query(
            r#"
            INSERT INTO staging_records (id, record_json, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                record_json = excluded.record_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.id)
        .bind(&json)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_record(&self, id: &str) -> Result<Option<IndexRecord>> {
        let json: Option<String> =
            sqlx::query_scalar("SELECT record_json FROM staging_records WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        json.map(|j| {
            serde_json::from_str(&j).with_context(|| format!("Corrupt staged record: {}", id))
        })
        .transpose()
    }

    async fn record_error(&self, error: &ErrorRecord) -> Result<bool> {
        let json = serde_json::to_string(error)?;
        let result = sqlx::query(
            "INSERT INTO staging_errors (id, error_json, created_at) VALUES (?, ?, ?) \
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&error.id)
        .bind(&json)
        .bind(error.recorded_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Insert-if-absent for every record and error, in one transaction.
    async fn seed(&self, records: &[IndexRecord], errors: &[ErrorRecord]) -> Result<SeedStats> {
        let mut stats = SeedStats::default();
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for record in records {
            let result = sqlx::query(
                "INSERT INTO staging_records (id, record_json, updated_at) VALUES (?, ?, ?) \
                 ON CONFLICT(id) DO NOTHING",
            )
            .bind(&record.id)
            .bind(serde_json::to_string(record)?)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 1 {
                stats.records_added += 1;
            }
        }
        for error in errors {
            let result = sqlx::query(
                "INSERT INTO staging_errors (id, error_json, created_at) VALUES (?, ?, ?) \
                 ON CONFLICT(id) DO NOTHING",
            )
            .bind(&error.id)
            .bind(serde_json::to_string(error)?)
            .bind(error.recorded_at.timestamp())
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 1 {
                stats.errors_added += 1;
            }
        }
        tx.commit().await?;
        Ok(stats)
    }

    async fn records(&self) -> Result<Vec<IndexRecord>> {
        let rows = sqlx::query("SELECT id, record_json FROM staging_records ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let id: String = row.get("id");
                let json: String = row.get("record_json");
                serde_json::from_str(&json)
                    .with_context(|| format!("Corrupt staged record: {}", id))
            })
            .collect()
    }

    async fn errors(&self) -> Result<Vec<ErrorRecord>> {
        let rows = sqlx::query("SELECT id, error_json FROM staging_errors ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let id: String = row.get("id");
                let json: String = row.get("error_json");
                serde_json::from_str(&json).with_context(|| format!("Corrupt staged error: {}", id))
            })
            .collect()
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM staging_records")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM staging_errors")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
