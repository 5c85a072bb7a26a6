//! Execution engine for the order orchestrations.
//!
//! The engine stores every step an execution takes in a
//! [`HistoryStore`](history::HistoryStore) and rebuilds workflow state by
//! replaying that history, which gives:
//! - crash recovery: a restarted engine resumes from history alone
//! - at-least-once activities: an activity without a recorded result is
//!   dispatched again
//! - durable timers and signals: deadlines and payloads live in history
//!
//! Child executions are driven inline by their parent; the [`Worker`]
//! only picks up root executions.

pub mod client;
pub mod clock;
pub mod engine;
pub mod error;
pub mod registry;
pub mod worker;

pub use client::OrderClient;
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{Engine, EngineConfig, ExecutionHandle, ExecutionStatus};
pub use error::{EngineError, RegistryError, Result};
pub use registry::{
    ActivityHandler, Registry, RegistryBuilder, TypedWorkflow, WorkflowHandler, order_registry,
    register_notification_activities,
};
pub use worker::{Worker, WorkerConfig};
