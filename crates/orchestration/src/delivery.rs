//! The delivery child workflow, covering the driver's transit.

use common::ExecutionId;
use serde::{Deserialize, Serialize};

use crate::activities::NOTIFY_ORDER_DELIVERED;
use crate::command::Command;
use crate::error::Result;
use crate::events::HistoryEvent;
use crate::model::{DeliveryRequest, OrderRef};
use crate::workflow::Workflow;

/// Prefix of delivery execution IDs.
pub const EXECUTION_PREFIX: &str = "deliver_order";

/// Delivery progress.
///
/// `Dispatched ──► EnRoute ──► Delivered ──► Completed`, or `Failed` from
/// any step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DeliveryState {
    #[default]
    Dispatched,
    EnRoute,
    Delivered,
    Completed,
    Failed,
}

impl DeliveryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Dispatched => "Dispatched",
            DeliveryState::EnRoute => "EnRoute",
            DeliveryState::Delivered => "Delivered",
            DeliveryState::Completed => "Completed",
            DeliveryState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryWorkflow {
    request: DeliveryRequest,
    state: DeliveryState,
    failure: Option<String>,
}

impl DeliveryWorkflow {
    /// The delivery execution ID for an order. The same order always maps
    /// to the same ID.
    pub fn execution_id_for(order_id: &str) -> ExecutionId {
        ExecutionId::derived(EXECUTION_PREFIX, order_id)
    }

    pub fn state(&self) -> DeliveryState {
        self.state
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    fn fail(&mut self, reason: String) {
        self.state = DeliveryState::Failed;
        self.failure = Some(reason);
    }
}

impl Workflow for DeliveryWorkflow {
    type Input = DeliveryRequest;
    type Output = ();

    fn workflow_type() -> &'static str {
        "DeliverOrder"
    }

    fn activities() -> &'static [&'static str] {
        &[NOTIFY_ORDER_DELIVERED]
    }

    fn new(request: DeliveryRequest) -> Self {
        let mut workflow = Self {
            request,
            state: DeliveryState::Dispatched,
            failure: None,
        };
        if workflow.request.order_id.trim().is_empty() {
            workflow.fail("order id must not be empty".to_string());
        }
        workflow
    }

    fn apply(&mut self, event: &HistoryEvent) {
        if self.state.is_terminal() {
            return;
        }

        match event {
            HistoryEvent::TimerStarted(_) if self.state == DeliveryState::Dispatched => {
                self.state = DeliveryState::EnRoute;
            }
            HistoryEvent::TimerFired(_) if self.state == DeliveryState::EnRoute => {
                self.state = DeliveryState::Delivered;
            }
            HistoryEvent::ActivityCompleted(data)
                if self.state == DeliveryState::Delivered && data.name == NOTIFY_ORDER_DELIVERED =>
            {
                self.state = DeliveryState::Completed;
            }
            HistoryEvent::ActivityFailed(data) => {
                self.fail(format!("activity {} failed: {}", data.name, data.error));
            }
            HistoryEvent::ExecutionFailed(data) => {
                self.fail(data.reason.clone());
            }
            _ => {}
        }
    }

    fn next_command(&self) -> Result<Command> {
        let command = match self.state {
            DeliveryState::Dispatched | DeliveryState::EnRoute => Command::StartTimer {
                duration: self.request.transit_time,
            },
            DeliveryState::Delivered => Command::activity(
                NOTIFY_ORDER_DELIVERED,
                &OrderRef::new(self.request.order_id.clone()),
                self.request.activity_options,
            )?,
            DeliveryState::Completed => Command::complete(&())?,
            DeliveryState::Failed => Command::Fail {
                reason: self
                    .failure
                    .clone()
                    .unwrap_or_else(|| "delivery failed".to_string()),
            },
        };
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::command::ActivityOptions;
    use crate::error::ActivityError;
    use crate::model::TRANSIT_TIME;

    fn request(order_id: &str) -> DeliveryRequest {
        DeliveryRequest {
            order_id: order_id.to_string(),
            transit_time: TRANSIT_TIME,
            activity_options: ActivityOptions::default(),
        }
    }

    #[test]
    fn test_delivery_sequence() {
        let mut workflow = DeliveryWorkflow::new(request("o1"));
        assert_eq!(workflow.state(), DeliveryState::Dispatched);
        assert_eq!(
            workflow.next_command().unwrap(),
            Command::StartTimer {
                duration: Duration::from_secs(4)
            }
        );

        workflow.apply(&HistoryEvent::timer_started(1, TRANSIT_TIME, Utc::now()));
        assert_eq!(workflow.state(), DeliveryState::EnRoute);
        // Still waiting on the same timer.
        assert!(matches!(
            workflow.next_command().unwrap(),
            Command::StartTimer { .. }
        ));

        workflow.apply(&HistoryEvent::timer_fired(1));
        assert_eq!(workflow.state(), DeliveryState::Delivered);
        match workflow.next_command().unwrap() {
            Command::ScheduleActivity { name, input, .. } => {
                assert_eq!(name, NOTIFY_ORDER_DELIVERED);
                assert_eq!(input, json!({ "order_id": "o1" }));
            }
            other => panic!("Expected ScheduleActivity, got {other:?}"),
        }

        workflow.apply(&HistoryEvent::activity_completed(
            2,
            NOTIFY_ORDER_DELIVERED,
            json!(null),
        ));
        assert_eq!(workflow.state(), DeliveryState::Completed);
        assert_eq!(
            workflow.next_command().unwrap(),
            Command::Complete { output: json!(null) }
        );
    }

    #[test]
    fn test_delivered_failure_is_fatal() {
        let workflow = DeliveryWorkflow::replay(
            request("o1"),
            &[
                HistoryEvent::timer_started(1, TRANSIT_TIME, Utc::now()),
                HistoryEvent::timer_fired(1),
                HistoryEvent::activity_failed(
                    2,
                    NOTIFY_ORDER_DELIVERED,
                    ActivityError::permanent("no driver"),
                ),
            ],
        );
        assert_eq!(workflow.state(), DeliveryState::Failed);
        assert!(matches!(
            workflow.next_command().unwrap(),
            Command::Fail { reason } if reason.contains("no driver")
        ));
    }

    #[test]
    fn test_empty_order_id_fails() {
        let workflow = DeliveryWorkflow::new(request("  "));
        assert_eq!(workflow.state(), DeliveryState::Failed);
    }

    #[test]
    fn test_execution_id_is_deterministic() {
        assert_eq!(
            DeliveryWorkflow::execution_id_for("o1"),
            DeliveryWorkflow::execution_id_for("o1")
        );
        assert_eq!(
            DeliveryWorkflow::execution_id_for("o1").as_str(),
            "deliver_order_o1"
        );
        assert_ne!(
            DeliveryWorkflow::execution_id_for("o1"),
            DeliveryWorkflow::execution_id_for("o2")
        );
    }
}
