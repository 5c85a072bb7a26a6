use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    ExecutionId, HistoryError, HistoryQuery, HistoryRecord, Result, Sequence,
    store::{AppendOptions, HistoryStore, validate_records_for_append},
};

/// In-memory history store for tests and single-process runs.
///
/// Behaves like the PostgreSQL store, including concurrency conflicts, but
/// keeps everything in a shared vector.
#[derive(Clone, Default)]
pub struct InMemoryHistoryStore {
    records: Arc<RwLock<Vec<HistoryRecord>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of records stored.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Clears all history.
    pub async fn clear(&self) {
        self.records.write().await.clear();
    }

    fn sequence_of(records: &[HistoryRecord], execution_id: &ExecutionId) -> Sequence {
        records
            .iter()
            .filter(|r| &r.execution_id == execution_id)
            .map(|r| r.sequence)
            .max()
            .unwrap_or(Sequence::initial())
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(
        &self,
        records: Vec<HistoryRecord>,
        options: AppendOptions,
    ) -> Result<Sequence> {
        validate_records_for_append(&records)?;

        let execution_id = records[0].execution_id.clone();
        let first_sequence = records[0].sequence;

        let mut store = self.records.write().await;
        let current = Self::sequence_of(&store, &execution_id);

        if let Some(expected) = options.expected_sequence
            && current != expected
        {
            return Err(HistoryError::ConcurrencyConflict {
                execution_id,
                expected,
                actual: current,
            });
        }

        // Unique (execution_id, sequence) constraint
        if first_sequence <= current {
            return Err(HistoryError::ConcurrencyConflict {
                execution_id,
                expected: options.expected_sequence.unwrap_or(current),
                actual: current,
            });
        }

        let last = records
            .last()
            .map(|r| r.sequence)
            .unwrap_or(Sequence::initial());
        store.extend(records);

        Ok(last)
    }

    async fn load(&self, execution_id: &ExecutionId) -> Result<Vec<HistoryRecord>> {
        self.load_from(execution_id, Sequence::first()).await
    }

    async fn load_from(
        &self,
        execution_id: &ExecutionId,
        from: Sequence,
    ) -> Result<Vec<HistoryRecord>> {
        let store = self.records.read().await;
        let mut records: Vec<_> = store
            .iter()
            .filter(|r| &r.execution_id == execution_id && r.sequence >= from)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.sequence);
        Ok(records)
    }

    async fn current_sequence(&self, execution_id: &ExecutionId) -> Result<Option<Sequence>> {
        let store = self.records.read().await;
        let sequence = Self::sequence_of(&store, execution_id);
        Ok((sequence != Sequence::initial()).then_some(sequence))
    }

    async fn query(&self, query: HistoryQuery) -> Result<Vec<HistoryRecord>> {
        let store = self.records.read().await;
        let closed: HashSet<&ExecutionId> = match &query.open_only {
            Some(types) => store
                .iter()
                .filter(|r| types.contains(&r.event_type))
                .map(|r| &r.execution_id)
                .collect(),
            None => HashSet::new(),
        };
        let mut records: Vec<_> = store
            .iter()
            .filter(|r| query.matches(r) && !closed.contains(&r.execution_id))
            .cloned()
            .collect();

        records.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then(a.sequence.cmp(&b.sequence))
        });

        if let Some(limit) = query.limit {
            records.truncate(limit);
        }

        Ok(records)
    }
}
