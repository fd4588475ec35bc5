//! Staging storage abstraction.
//!
//! The [`StagingStore`] trait is the single write target for index records
//! and error records while a run is in progress. Workers write to it
//! concurrently; the checkpoint reads a full snapshot out of it.
//!
//! Implementations must be `Send + Sync` and must tolerate concurrent
//! writers without an external lock.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ErrorRecord, IndexRecord};

/// Counts reported by [`StagingStore::seed`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedStats {
    pub records_added: usize,
    pub errors_added: usize,
}

/// Abstract staging backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`put_record`](StagingStore::put_record) | Insert or replace a record by id |
/// | [`get_record`](StagingStore::get_record) | Fetch one record |
/// | [`record_error`](StagingStore::record_error) | First-write-wins error insert |
/// | [`seed`](StagingStore::seed) | Add records/errors that are not yet staged |
/// | [`records`](StagingStore::records) | Snapshot of all records, ordered by id |
/// | [`errors`](StagingStore::errors) | Snapshot of all errors, ordered by id |
/// | [`clear`](StagingStore::clear) | Drop everything staged |
#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Insert or replace a record, keyed by `record.id`.
    async fn put_record(&self, record: &IndexRecord) -> Result<()>;

    async fn get_record(&self, id: &str) -> Result<Option<IndexRecord>>;

    /// Store an error unless one already exists for the same id.
    ///
    /// Returns `true` if this error was stored, `false` if it was dropped.
    async fn record_error(&self, error: &ErrorRecord) -> Result<bool>;

    /// Add records and errors whose ids are not staged yet. Existing
    /// entries are left untouched, so seeding twice is a no-op.
    async fn seed(&self, records: &[IndexRecord], errors: &[ErrorRecord]) -> Result<SeedStats>;

    async fn records(&self) -> Result<Vec<IndexRecord>>;

    async fn errors(&self) -> Result<Vec<ErrorRecord>>;

    async fn clear(&self) -> Result<()>;
}
