//! Order fulfillment orchestration core.
//!
//! Workflows here are deterministic state machines: they are rebuilt by
//! folding an execution's recorded history and then asked for the next
//! [`Command`]. They never read the clock, generate randomness or perform
//! I/O; everything they react to arrives as a [`HistoryEvent`].
//!
//! The order workflow follows these steps:
//! 1. Notify that the order was received
//! 2. Wait for the restaurant's decision signal
//! 3. On acceptance, wait out the preparation time
//! 4. Run the delivery child workflow
//! 5. Notify that the order is at the door
//!
//! Any decision other than acceptance ends the order as `OrderRejected`.

pub mod activities;
pub mod command;
pub mod delivery;
pub mod error;
pub mod events;
pub mod model;
pub mod order;
pub mod workflow;

pub use activities::{ConsoleNotifier, NotificationActivities, NotificationCall, RecordingNotifier};
pub use command::{ActivityOptions, ChildOptions, Command, StartOptions};
pub use common::ExecutionId;
pub use delivery::{DeliveryState, DeliveryWorkflow};
pub use error::{
    ActivityError, ActivityErrorKind, ChildExecutionError, OrchestrationError, TimeoutClass,
};
pub use events::HistoryEvent;
pub use model::{
    Decision, DecisionWait, DeliveryRequest, Order, OrderRef, OrderRequest, OrderSettings,
    ReceivedNotification,
};
pub use order::{OrderOutcome, OrderState, OrderWorkflow};
pub use workflow::Workflow;
