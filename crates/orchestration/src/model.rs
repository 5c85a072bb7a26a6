//! Order data model and workflow inputs.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::ActivityOptions;
use crate::error::OrchestrationError;

/// Time the restaurant takes to prepare an accepted order.
pub const PREPARATION_TIME: Duration = Duration::from_secs(3);

/// Time the driver takes to reach the customer.
pub const TRANSIT_TIME: Duration = Duration::from_secs(4);

/// Upper bound on the whole delivery child execution.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// A customer's cart. Immutable once the order is triggered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Opaque, unique order identifier.
    pub id: String,
    /// Ordered list of item names.
    pub items: Vec<String>,
}

impl Order {
    pub fn new<I, S>(id: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            items: items.into_iter().map(Into::into).collect(),
        }
    }

    /// Checks the invariants a triggered order must hold.
    pub fn validate(&self) -> Result<(), OrchestrationError> {
        if self.id.trim().is_empty() {
            return Err(OrchestrationError::InvalidInput(
                "order id must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// How long an order waits for the restaurant's decision.
///
/// Has no default; whoever triggers an order picks one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionWait {
    /// Wait until a decision arrives, however long that takes.
    Unbounded,
    /// Treat the order as rejected if no decision arrives in time.
    Within(Duration),
}

impl DecisionWait {
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            DecisionWait::Unbounded => None,
            DecisionWait::Within(duration) => Some(*duration),
        }
    }
}

impl FromStr for DecisionWait {
    type Err = OrchestrationError;

    /// Parses `unbounded` or a whole number of seconds.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unbounded") {
            return Ok(DecisionWait::Unbounded);
        }
        s.parse::<u64>()
            .map(|secs| DecisionWait::Within(Duration::from_secs(secs)))
            .map_err(|_| {
                OrchestrationError::InvalidInput(format!(
                    "decision wait must be `unbounded` or a number of seconds, got `{s}`"
                ))
            })
    }
}

/// Per-order timing and policy, fixed when the order is triggered so that
/// replay always sees the same values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSettings {
    pub decision_wait: DecisionWait,
    pub preparation_time: Duration,
    pub transit_time: Duration,
    pub delivery_timeout: Duration,
    pub activity_options: ActivityOptions,
}

impl OrderSettings {
    /// Standard timings with the given decision-wait policy.
    pub fn new(decision_wait: DecisionWait) -> Self {
        Self {
            decision_wait,
            preparation_time: PREPARATION_TIME,
            transit_time: TRANSIT_TIME,
            delivery_timeout: DELIVERY_TIMEOUT,
            activity_options: ActivityOptions::default(),
        }
    }

    pub fn with_activity_options(mut self, options: ActivityOptions) -> Self {
        self.activity_options = options;
        self
    }
}

/// Input of the order workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub user_id: String,
    pub order: Order,
    pub restaurant_id: String,
    pub settings: OrderSettings,
}

/// Input of the delivery workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub order_id: String,
    pub transit_time: Duration,
    pub activity_options: ActivityOptions,
}

/// The restaurant's answer to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    Accepted,
    Rejected,
}

impl Decision {
    /// Interprets a decision signal payload.
    ///
    /// Only `"accept"` / `"accepted"` (any case) mean acceptance; every
    /// other payload, including non-strings, is a rejection.
    pub fn from_payload(payload: &serde_json::Value) -> Self {
        match payload.as_str().map(str::trim) {
            Some(s) if s.eq_ignore_ascii_case("accept") || s.eq_ignore_ascii_case("accepted") => {
                Decision::Accepted
            }
            _ => Decision::Rejected,
        }
    }

    /// The wire payload for this decision.
    pub fn as_payload(&self) -> serde_json::Value {
        match self {
            Decision::Accepted => serde_json::Value::from("accept"),
            Decision::Rejected => serde_json::Value::from("reject"),
        }
    }
}

impl FromStr for Decision {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accept" | "accepted" => Ok(Decision::Accepted),
            "reject" | "rejected" => Ok(Decision::Rejected),
            other => Err(OrchestrationError::InvalidInput(format!(
                "unknown decision `{other}`"
            ))),
        }
    }
}

/// Arguments of the "order received" notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedNotification {
    pub user_id: String,
    pub order: Order,
    pub restaurant_id: String,
}

/// Arguments of the notifications that only need the order id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRef {
    pub order_id: String,
}

impl OrderRef {
    pub fn new(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
        }
    }
}
