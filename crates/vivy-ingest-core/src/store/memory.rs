//! In-memory [`StagingStore`] implementation for tests and dry runs.
//!
//! Uses `BTreeMap`s behind `std::sync::RwLock`, so snapshots come out
//! ordered by id without an extra sort.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{ErrorRecord, IndexRecord};

use super::{SeedStats, StagingStore};

pub struct InMemoryStagingStore {
    records: RwLock<BTreeMap<String, IndexRecord>>,
    errors: RwLock<BTreeMap<String, ErrorRecord>>,
}

impl InMemoryStagingStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            errors: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for InMemoryStagingStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("staging store lock poisoned")
}

#[async_trait]
impl StagingStore for InMemoryStagingStore {
    async fn put_record(&self, record: &IndexRecord) -> Result<()> {
        let mut records = self.records.write().map_err(poisoned)?;
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_record(&self, id: &str) -> Result<Option<IndexRecord>> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.get(id).cloned())
    }

    async fn record_error(&self, error: &ErrorRecord) -> Result<bool> {
        let mut errors = self.errors.write().map_err(poisoned)?;
        if errors.contains_key(&error.id) {
            return Ok(false);
        }
        errors.insert(error.id.clone(), error.clone());
        Ok(true)
    }

    async fn seed(&self, records: &[IndexRecord], errors: &[ErrorRecord]) -> Result<SeedStats> {
        let mut stats = SeedStats::default();
        {
            let mut stored = self.records.write().map_err(poisoned)?;
            for record in records {
                if !stored.contains_key(&record.id) {
                    stored.insert(record.id.clone(), record.clone());
                    stats.records_added += 1;
                }
            }
        }
        for error in errors {
            if self.record_error(error).await? {
                stats.errors_added += 1;
            }
        }
        Ok(stats)
    }

    async fn records(&self) -> Result<Vec<IndexRecord>> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.values().cloned().collect())
    }

    async fn errors(&self) -> Result<Vec<ErrorRecord>> {
        let errors = self.errors.read().map_err(poisoned)?;
        Ok(errors.values().cloned().collect())
    }

    async fn clear(&self) -> Result<()> {
        self.records.write().map_err(poisoned)?.clear();
        self.errors.write().map_err(poisoned)?.clear();
        Ok(())
    }
}
