//! Append-only history storage for orchestration executions.
//!
//! Every execution owns one stream of records ordered by a gapless
//! sequence number. Streams are only ever appended to; optimistic
//! concurrency on the expected sequence keeps concurrent writers
//! (a driving worker and an incoming signal) from clobbering each other.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod record;
pub mod store;

pub use common::ExecutionId;
pub use error::{HistoryError, Result};
pub use memory::InMemoryHistoryStore;
pub use postgres::PostgresHistoryStore;
pub use query::HistoryQuery;
pub use record::{HistoryRecord, HistoryRecordBuilder, RecordId, Sequence};
pub use store::{AppendOptions, HistoryStore, HistoryStoreExt};
