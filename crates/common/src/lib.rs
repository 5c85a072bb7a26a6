//! Shared types used across the orchestration workspace.

mod types;

pub use types::ExecutionId;
