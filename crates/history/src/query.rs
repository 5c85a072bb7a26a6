use crate::{ExecutionId, Sequence};

/// Filter over history records.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    /// Filter by execution.
    pub execution_id: Option<ExecutionId>,

    /// Filter by workflow type.
    pub workflow_type: Option<String>,

    /// Filter by event types (any of these types).
    pub event_types: Option<Vec<String>>,

    /// Filter by minimum sequence (inclusive).
    pub from_sequence: Option<Sequence>,

    /// Skip executions that have a record of any of these event types.
    pub open_only: Option<Vec<String>>,

    /// Maximum number of records to return.
    pub limit: Option<usize>,
}

impl HistoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for records of any of the given event types.
    pub fn for_event_types<I, S>(event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            event_types: Some(event_types.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    pub fn execution_id(mut self, id: ExecutionId) -> Self {
        self.execution_id = Some(id);
        self
    }

    pub fn workflow_type(mut self, workflow_type: impl Into<String>) -> Self {
        self.workflow_type = Some(workflow_type.into());
        self
    }

    pub fn from_sequence(mut self, sequence: Sequence) -> Self {
        self.from_sequence = Some(sequence);
        self
    }

    /// Restricts the query to executions with no record of the given
    /// closing event types.
    pub fn open_only<I, S>(mut self, closing_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.open_only = Some(closing_types.into_iter().map(Into::into).collect());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if the record satisfies every per-record filter.
    ///
    /// `limit` and `open_only` look across records and are applied by the
    /// store.
    pub fn matches(&self, record: &crate::HistoryRecord) -> bool {
        if let Some(ref id) = self.execution_id
            && &record.execution_id != id
        {
            return false;
        }
        if let Some(ref workflow_type) = self.workflow_type
            && &record.workflow_type != workflow_type
        {
            return false;
        }
        if let Some(ref types) = self.event_types
            && !types.contains(&record.event_type)
        {
            return false;
        }
        if let Some(from) = self.from_sequence
            && record.sequence < from
        {
            return false;
        }
        true
    }
}
