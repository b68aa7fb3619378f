//! Durable result storage
//!
//! The [`ResultStore`] trait abstracts over storage backends. Postgres is
//! the production backend ([`super::postgres::PgResultStore`]);
//! [`InMemoryResultStore`] serves development runs and tests.

use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::Result;
use crate::model::PredictionRecord;

/// Source of truth for prediction history.
///
/// Each call is atomic on its own; callers never wrap several calls in one
/// transaction.
#[async_trait::async_trait]
pub trait ResultStore: Send + Sync + 'static {
    /// Persist one record.
    async fn insert_result(&self, record: &PredictionRecord) -> Result<()>;

    /// All meaningful records of `owner`, newest first.
    async fn query_results(&self, owner: Uuid) -> Result<Vec<PredictionRecord>>;

    /// Every owner's meaningful records, newest first, for cache priming.
    async fn load_all(&self) -> Result<HashMap<Uuid, Vec<PredictionRecord>>>;
}

/// Process-local store with the same filtering and ordering as Postgres
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    rows: RwLock<Vec<PredictionRecord>>,
}

impl InMemoryResultStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows written so far, zero outcomes included
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.read().len()
    }

    fn newest_first(mut records: Vec<PredictionRecord>) -> Vec<PredictionRecord> {
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }
}

#[async_trait::async_trait]
impl ResultStore for InMemoryResultStore {
    async fn insert_result(&self, record: &PredictionRecord) -> Result<()> {
        self.rows.write().push(record.clone());
        Ok(())
    }

    async fn query_results(&self, owner: Uuid) -> Result<Vec<PredictionRecord>> {
        let matching = self
            .rows
            .read()
            .iter()
            .filter(|r| r.owner_id == owner && r.is_meaningful())
            .cloned()
            .collect();
        Ok(Self::newest_first(matching))
    }

    async fn load_all(&self) -> Result<HashMap<Uuid, Vec<PredictionRecord>>> {
        let mut grouped: HashMap<Uuid, Vec<PredictionRecord>> = HashMap::new();
        for record in self.rows.read().iter().filter(|r| r.is_meaningful()) {
            grouped
                .entry(record.owner_id)
                .or_default()
                .push(record.clone());
        }
        Ok(grouped
            .into_iter()
            .map(|(owner, records)| (owner, Self::newest_first(records)))
            .collect())
    }
}
