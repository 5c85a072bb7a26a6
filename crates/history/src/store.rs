use async_trait::async_trait;

use crate::{ExecutionId, HistoryError, HistoryQuery, HistoryRecord, Result, Sequence};

/// Options for appending records to an execution's history.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Sequence the execution must currently be at for the append to
    /// succeed. `None` skips the check.
    pub expected_sequence: Option<Sequence>,
}

impl AppendOptions {
    /// Creates options with no sequence check.
    pub fn new() -> Self {
        Self::default()
    }

    /// Expects the execution to be at a specific sequence.
    pub fn expect_sequence(sequence: Sequence) -> Self {
        Self {
            expected_sequence: Some(sequence),
        }
    }

    /// Expects the execution to have no history yet.
    pub fn expect_new() -> Self {
        Self {
            expected_sequence: Some(Sequence::initial()),
        }
    }
}

/// Durable, append-only storage of execution histories.
///
/// Implementations must be thread-safe and must return records of one
/// execution in sequence order.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Appends records to one execution atomically.
    ///
    /// Fails with `ConcurrencyConflict` if `options.expected_sequence` is set
    /// and does not match, or if any sequence number is already taken.
    /// Returns the sequence of the last appended record.
    async fn append(&self, records: Vec<HistoryRecord>, options: AppendOptions)
    -> Result<Sequence>;

    /// Loads the whole history of an execution, oldest first.
    async fn load(&self, execution_id: &ExecutionId) -> Result<Vec<HistoryRecord>>;

    /// Loads the history of an execution starting at `from` (inclusive).
    async fn load_from(
        &self,
        execution_id: &ExecutionId,
        from: Sequence,
    ) -> Result<Vec<HistoryRecord>>;

    /// Returns the sequence of the latest record, or None if the execution
    /// has no history.
    async fn current_sequence(&self, execution_id: &ExecutionId) -> Result<Option<Sequence>>;

    /// Returns the records matching a query, ordered by timestamp then sequence.
    async fn query(&self, query: HistoryQuery) -> Result<Vec<HistoryRecord>>;
}

/// Convenience methods available on every history store.
#[async_trait]
pub trait HistoryStoreExt: HistoryStore {
    /// Appends a single record.
    async fn append_one(&self, record: HistoryRecord, options: AppendOptions) -> Result<Sequence> {
        self.append(vec![record], options).await
    }

    /// Returns true if the execution has any history.
    async fn exists(&self, execution_id: &ExecutionId) -> Result<bool> {
        Ok(self.current_sequence(execution_id).await?.is_some())
    }
}

impl<T: HistoryStore + ?Sized> HistoryStoreExt for T {}

/// Validates records before appending.
///
/// Records must be non-empty, belong to a single execution, and carry
/// consecutive sequence numbers.
pub fn validate_records_for_append(records: &[HistoryRecord]) -> Result<()> {
    let Some(first) = records.first() else {
        return Err(HistoryError::InvalidAppend(
            "Cannot append empty record list".to_string(),
        ));
    };

    let mut expected = first.sequence;
    for record in records.iter().skip(1) {
        if record.execution_id != first.execution_id {
            return Err(HistoryError::InvalidAppend(
                "All records must belong to the same execution".to_string(),
            ));
        }
        expected = expected.next();
        if record.sequence != expected {
            return Err(HistoryError::InvalidAppend(format!(
                "Record sequences must be consecutive. Expected {}, got {}",
                expected, record.sequence
            )));
        }
    }

    Ok(())
}
