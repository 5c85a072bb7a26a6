//! Notification activities invoked by the order workflows.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ActivityError;
use crate::model::{OrderRef, ReceivedNotification};

/// Activity name: tell the customer the order was received.
pub const NOTIFY_ORDER_RECEIVED: &str = "notify_order_received";

/// Activity name: tell the customer the driver delivered the order.
pub const NOTIFY_ORDER_DELIVERED: &str = "notify_order_delivered";

/// Activity name: tell the customer the order is at the door.
pub const NOTIFY_ORDER_AT_DOOR: &str = "notify_order_at_door";

/// Builds the "order received" message.
pub fn received_message(notification: &ReceivedNotification) -> String {
    format!(
        "Your order received! Order ID: {}, User: {}, Restaurant: {}, Items: [{}]",
        notification.order.id,
        notification.user_id,
        notification.restaurant_id,
        notification.order.items.join(", ")
    )
}

/// Builds the "order delivered" message.
pub fn delivered_message(order: &OrderRef) -> String {
    format!("Order {} delivered!", order.order_id)
}

/// Builds the final "at your door" message.
pub fn at_door_message(_order: &OrderRef) -> String {
    "Your order is in front of your door!".to_string()
}

/// Side-effecting notifications sent while an order is fulfilled.
///
/// The engine may run the same call more than once (a crash between
/// running an activity and recording its result re-dispatches it), so
/// implementations must tolerate redelivery. Messages are pure functions of
/// the arguments, which makes a repeated call indistinguishable from the
/// first one.
#[async_trait]
pub trait NotificationActivities: Send + Sync {
    async fn received(&self, notification: &ReceivedNotification) -> Result<(), ActivityError>;

    async fn delivered(&self, order: &OrderRef) -> Result<(), ActivityError>;

    async fn at_door(&self, order: &OrderRef) -> Result<(), ActivityError>;
}

/// Prints notifications to stdout.
///
/// A redelivered call prints the same line again; showing a notification
/// twice is acceptable for customers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    fn emit(&self, activity: &'static str, order_id: &str, message: String) {
        println!("{message}");
        tracing::info!(activity, order_id, message = %message, "notification printed");
    }
}

#[async_trait]
impl NotificationActivities for ConsoleNotifier {
    async fn received(&self, notification: &ReceivedNotification) -> Result<(), ActivityError> {
        self.emit(
            NOTIFY_ORDER_RECEIVED,
            &notification.order.id,
            received_message(notification),
        );
        Ok(())
    }

    async fn delivered(&self, order: &OrderRef) -> Result<(), ActivityError> {
        self.emit(NOTIFY_ORDER_DELIVERED, &order.order_id, delivered_message(order));
        Ok(())
    }

    async fn at_door(&self, order: &OrderRef) -> Result<(), ActivityError> {
        self.emit(NOTIFY_ORDER_AT_DOOR, &order.order_id, at_door_message(order));
        Ok(())
    }
}

/// One recorded invocation of a notification activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationCall {
    pub activity: &'static str,
    pub order_id: String,
}

#[derive(Debug, Default)]
struct RecordingState {
    calls: Vec<NotificationCall>,
    /// Delivered messages keyed by (activity, order id).
    delivered: BTreeMap<(&'static str, String), String>,
    failures: HashMap<&'static str, ActivityError>,
    latency: Option<Duration>,
}

/// In-memory notifier for tests.
///
/// Records every invocation, keeps one delivered message per logical call,
/// and can be told to fail or stall specific activities.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RecordingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every call of `activity` fail with `error`.
    pub fn fail_on(&self, activity: &'static str, error: ActivityError) {
        self.state().failures.insert(activity, error);
    }

    /// Clears a failure set by [`fail_on`](Self::fail_on).
    pub fn succeed_on(&self, activity: &'static str) {
        self.state().failures.remove(activity);
    }

    /// Makes every call take `latency` before doing anything.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state().latency = latency;
    }

    /// Every invocation in order, including failed and repeated ones.
    pub fn calls(&self) -> Vec<NotificationCall> {
        self.state().calls.clone()
    }

    /// Activity names of every invocation in order.
    pub fn call_names(&self) -> Vec<&'static str> {
        self.state().calls.iter().map(|c| c.activity).collect()
    }

    /// Number of invocations of one activity.
    pub fn call_count(&self, activity: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.activity == activity)
            .count()
    }

    /// Observable notifications, one per logical call.
    pub fn notifications(&self) -> Vec<String> {
        self.state().delivered.values().cloned().collect()
    }

    async fn record(
        &self,
        activity: &'static str,
        order_id: &str,
        message: String,
    ) -> Result<(), ActivityError> {
        let latency = self.state().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state();
        state.calls.push(NotificationCall {
            activity,
            order_id: order_id.to_string(),
        });

        if let Some(error) = state.failures.get(activity) {
            return Err(error.clone());
        }

        state
            .delivered
            .entry((activity, order_id.to_string()))
            .or_insert(message);
        Ok(())
    }
}

#[async_trait]
impl NotificationActivities for RecordingNotifier {
    async fn received(&self, notification: &ReceivedNotification) -> Result<(), ActivityError> {
        self.record(
            NOTIFY_ORDER_RECEIVED,
            &notification.order.id,
            received_message(notification),
        )
        .await
    }

    async fn delivered(&self, order: &OrderRef) -> Result<(), ActivityError> {
        self.record(NOTIFY_ORDER_DELIVERED, &order.order_id, delivered_message(order))
            .await
    }

    async fn at_door(&self, order: &OrderRef) -> Result<(), ActivityError> {
        self.record(NOTIFY_ORDER_AT_DOOR, &order.order_id, at_door_message(order))
            .await
    }
}
