//! The top-level order workflow.

use common::ExecutionId;
use serde::{Deserialize, Serialize};

use crate::activities::{NOTIFY_ORDER_AT_DOOR, NOTIFY_ORDER_RECEIVED};
use crate::command::{ChildOptions, Command};
use crate::delivery::DeliveryWorkflow;
use crate::error::Result;
use crate::events::HistoryEvent;
use crate::model::{Decision, DeliveryRequest, OrderRef, OrderRequest, ReceivedNotification};
use crate::workflow::Workflow;

/// Signal channel carrying the restaurant's decision.
pub const DECISION_SIGNAL: &str = "restaurant-decision";

/// Prefix of order execution IDs.
pub const EXECUTION_PREFIX: &str = "eats_order";

/// Where an order is in its lifecycle.
///
/// State transitions:
/// ```text
/// Created ──► AwaitingDecision ──┬──► Accepted ──► Preparing ──► DispatchingDelivery
///                                │                                      │
///                                │        AwaitingDelivery ◄────────────┘
///                                │               │
///                                │               ▼
///                                │           Delivered ──► Completed
///                                └──► Rejected ──► Terminated
/// ```
/// Any step can also end in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderState {
    /// Sending the "order received" notification.
    #[default]
    Created,
    /// Waiting for the restaurant's decision.
    AwaitingDecision,
    /// Restaurant accepted; preparation timer not started yet.
    Accepted,
    /// Preparation timer running.
    Preparing,
    /// Preparation done; delivery child not started yet.
    DispatchingDelivery,
    /// Delivery child running.
    AwaitingDelivery,
    /// Delivery child finished; sending the "at your door" notification.
    Delivered,
    /// Everything done (terminal once recorded).
    Completed,
    /// Restaurant did not accept (terminal once recorded).
    Rejected,
    /// Rejection recorded (terminal state).
    Terminated,
    /// A step failed (terminal state).
    Failed,
}

impl OrderState {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Terminated | OrderState::Failed)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Created => "Created",
            OrderState::AwaitingDecision => "AwaitingDecision",
            OrderState::Accepted => "Accepted",
            OrderState::Preparing => "Preparing",
            OrderState::DispatchingDelivery => "DispatchingDelivery",
            OrderState::AwaitingDelivery => "AwaitingDelivery",
            OrderState::Delivered => "Delivered",
            OrderState::Completed => "Completed",
            OrderState::Rejected => "Rejected",
            OrderState::Terminated => "Terminated",
            OrderState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How an order ended.
///
/// Rejection is a normal business result and is reported here, not as an
/// error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderOutcome {
    /// The order was delivered.
    Completed,
    /// The restaurant declined the order (or never answered in time).
    OrderRejected,
    /// A step failed.
    Failed(String),
}

impl std::fmt::Display for OrderOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderOutcome::Completed => write!(f, "Completed"),
            OrderOutcome::OrderRejected => write!(f, "OrderRejected"),
            OrderOutcome::Failed(reason) => write!(f, "Failed: {reason}"),
        }
    }
}

/// The "Uber Eats" order workflow.
#[derive(Debug, Clone)]
pub struct OrderWorkflow {
    request: OrderRequest,
    state: OrderState,
    decision: Option<Decision>,
    failure: Option<String>,
}

impl OrderWorkflow {
    /// The execution ID of the order with the given ID.
    pub fn execution_id_for(order_id: &str) -> ExecutionId {
        ExecutionId::derived(EXECUTION_PREFIX, order_id)
    }

    pub fn state(&self) -> OrderState {
        self.state
    }

    /// The first decision received, if any.
    pub fn decision(&self) -> Option<Decision> {
        self.decision
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn request(&self) -> &OrderRequest {
        &self.request
    }

    fn fail(&mut self, reason: String) {
        self.state = OrderState::Failed;
        self.failure = Some(reason);
    }

    /// Moves out of `AwaitingDecision` once a decision is known.
    fn branch_on_decision(&mut self) {
        if self.state != OrderState::AwaitingDecision {
            return;
        }
        match self.decision {
            Some(Decision::Accepted) => self.state = OrderState::Accepted,
            Some(Decision::Rejected) => self.state = OrderState::Rejected,
            None => {}
        }
    }

    fn delivery_request(&self) -> DeliveryRequest {
        DeliveryRequest {
            order_id: self.request.order.id.clone(),
            transit_time: self.request.settings.transit_time,
            activity_options: self.request.settings.activity_options,
        }
    }
}

impl Workflow for OrderWorkflow {
    type Input = OrderRequest;
    type Output = OrderOutcome;

    fn workflow_type() -> &'static str {
        "HandleEatsOrder"
    }

    fn activities() -> &'static [&'static str] {
        &[NOTIFY_ORDER_RECEIVED, NOTIFY_ORDER_AT_DOOR]
    }

    fn children() -> &'static [&'static str] {
        &["DeliverOrder"]
    }

    fn new(request: OrderRequest) -> Self {
        let mut workflow = Self {
            request,
            state: OrderState::Created,
            decision: None,
            failure: None,
        };
        if let Err(e) = workflow.request.order.validate() {
            workflow.fail(e.to_string());
        }
        workflow
    }

    fn apply(&mut self, event: &HistoryEvent) {
        if self.state.is_terminal() {
            return;
        }

        match event {
            // First decision wins; it is buffered if it arrives early.
            HistoryEvent::SignalReceived(data) if data.name == DECISION_SIGNAL => {
                if self.decision.is_none() {
                    self.decision = Some(Decision::from_payload(&data.payload));
                    self.branch_on_decision();
                }
            }
            HistoryEvent::SignalTimedOut(data) if data.name == DECISION_SIGNAL => {
                if self.decision.is_none() {
                    self.decision = Some(Decision::Rejected);
                    self.branch_on_decision();
                }
            }
            HistoryEvent::ActivityCompleted(data) => match (self.state, data.name.as_str()) {
                (OrderState::Created, NOTIFY_ORDER_RECEIVED) => {
                    self.state = OrderState::AwaitingDecision;
                    self.branch_on_decision();
                }
                (OrderState::Delivered, NOTIFY_ORDER_AT_DOOR) => {
                    self.state = OrderState::Completed;
                }
                _ => {}
            },
            HistoryEvent::ActivityFailed(data) => {
                self.fail(format!("activity {} failed: {}", data.name, data.error));
            }
            HistoryEvent::TimerStarted(_) if self.state == OrderState::Accepted => {
                self.state = OrderState::Preparing;
            }
            HistoryEvent::TimerFired(_) if self.state == OrderState::Preparing => {
                self.state = OrderState::DispatchingDelivery;
            }
            HistoryEvent::ChildExecutionStarted(_)
                if self.state == OrderState::DispatchingDelivery =>
            {
                self.state = OrderState::AwaitingDelivery;
            }
            HistoryEvent::ChildExecutionCompleted(_)
                if self.state == OrderState::AwaitingDelivery =>
            {
                self.state = OrderState::Delivered;
            }
            HistoryEvent::ChildExecutionFailed(data) => {
                self.fail(data.error.to_string());
            }
            HistoryEvent::ExecutionCompleted(_) if self.state == OrderState::Rejected => {
                self.state = OrderState::Terminated;
            }
            HistoryEvent::ExecutionFailed(data) => {
                self.fail(data.reason.clone());
            }
            _ => {}
        }
    }

    fn next_command(&self) -> Result<Command> {
        let settings = &self.request.settings;
        let order_id = &self.request.order.id;

        let command = match self.state {
            OrderState::Created => Command::activity(
                NOTIFY_ORDER_RECEIVED,
                &ReceivedNotification {
                    user_id: self.request.user_id.clone(),
                    order: self.request.order.clone(),
                    restaurant_id: self.request.restaurant_id.clone(),
                },
                settings.activity_options,
            )?,
            OrderState::AwaitingDecision => Command::WaitForSignal {
                name: DECISION_SIGNAL.to_string(),
                timeout: settings.decision_wait.timeout(),
            },
            OrderState::Accepted | OrderState::Preparing => Command::StartTimer {
                duration: settings.preparation_time,
            },
            OrderState::DispatchingDelivery | OrderState::AwaitingDelivery => Command::StartChild {
                workflow_type: DeliveryWorkflow::workflow_type().to_string(),
                input: serde_json::to_value(self.delivery_request())?,
                options: ChildOptions {
                    execution_id: DeliveryWorkflow::execution_id_for(order_id),
                    execution_timeout: settings.delivery_timeout,
                },
            },
            OrderState::Delivered => Command::activity(
                NOTIFY_ORDER_AT_DOOR,
                &OrderRef::new(order_id.clone()),
                settings.activity_options,
            )?,
            OrderState::Completed => Command::complete(&OrderOutcome::Completed)?,
            OrderState::Rejected | OrderState::Terminated => {
                Command::complete(&OrderOutcome::OrderRejected)?
            }
            OrderState::Failed => Command::Fail {
                reason: self
                    .failure
                    .clone()
                    .unwrap_or_else(|| "order failed".to_string()),
            },
        };

        Ok(command)
    }
}
