//! Name to handler registry for workflows and activities.
//!
//! Built once at startup and shared by `Arc`; there is no global state.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use orchestration::activities::{NOTIFY_ORDER_AT_DOOR, NOTIFY_ORDER_DELIVERED, NOTIFY_ORDER_RECEIVED};
use orchestration::{
    ActivityError, Command, HistoryEvent, NotificationActivities, OrchestrationError, OrderRef,
    ReceivedNotification, Workflow,
};
use serde_json::Value;

use crate::error::RegistryError;

/// Type-erased workflow, as seen by the engine.
pub trait WorkflowHandler: Send + Sync {
    fn workflow_type(&self) -> &'static str;

    fn activities(&self) -> &'static [&'static str];

    fn children(&self) -> &'static [&'static str];

    /// Checks that `input` deserializes into the workflow's input type.
    fn validate_input(&self, input: &Value) -> Result<(), OrchestrationError>;

    /// Replays `history` and returns the next command.
    fn decide(&self, input: &Value, history: &[HistoryEvent]) -> Result<Command, OrchestrationError>;
}

/// Adapts a typed [`Workflow`] to [`WorkflowHandler`].
pub struct TypedWorkflow<W>(PhantomData<fn() -> W>);

impl<W> TypedWorkflow<W> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<W> Default for TypedWorkflow<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Workflow + 'static> WorkflowHandler for TypedWorkflow<W> {
    fn workflow_type(&self) -> &'static str {
        W::workflow_type()
    }

    fn activities(&self) -> &'static [&'static str] {
        W::activities()
    }

    fn children(&self) -> &'static [&'static str] {
        W::children()
    }

    fn validate_input(&self, input: &Value) -> Result<(), OrchestrationError> {
        serde_json::from_value::<W::Input>(input.clone())?;
        Ok(())
    }

    fn decide(&self, input: &Value, history: &[HistoryEvent]) -> Result<Command, OrchestrationError> {
        let input: W::Input = serde_json::from_value(input.clone())?;
        W::replay(input, history).next_command()
    }
}

/// A side-effecting operation invoked by name.
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    async fn invoke(&self, input: Value) -> Result<Value, ActivityError>;
}

#[derive(Debug, Clone, Copy)]
enum Notification {
    Received,
    Delivered,
    AtDoor,
}

/// One notification operation bound to a notifier.
struct NotificationActivity<N> {
    notifier: Arc<N>,
    notification: Notification,
}

fn decode<T: serde::de::DeserializeOwned>(input: Value) -> Result<T, ActivityError> {
    serde_json::from_value(input)
        .map_err(|e| ActivityError::permanent(format!("invalid activity input: {e}")))
}

#[async_trait]
impl<N: NotificationActivities + 'static> ActivityHandler for NotificationActivity<N> {
    async fn invoke(&self, input: Value) -> Result<Value, ActivityError> {
        match self.notification {
            Notification::Received => {
                let notification: ReceivedNotification = decode(input)?;
                self.notifier.received(&notification).await?;
            }
            Notification::Delivered => {
                let order: OrderRef = decode(input)?;
                self.notifier.delivered(&order).await?;
            }
            Notification::AtDoor => {
                let order: OrderRef = decode(input)?;
                self.notifier.at_door(&order).await?;
            }
        }
        Ok(Value::Null)
    }
}

/// Registers the three notification activities backed by `notifier`.
pub fn register_notification_activities<N>(
    builder: &mut RegistryBuilder,
    notifier: Arc<N>,
) -> Result<(), RegistryError>
where
    N: NotificationActivities + 'static,
{
    for (name, notification) in [
        (NOTIFY_ORDER_RECEIVED, Notification::Received),
        (NOTIFY_ORDER_DELIVERED, Notification::Delivered),
        (NOTIFY_ORDER_AT_DOOR, Notification::AtDoor),
    ] {
        builder.register_activity(
            name,
            NotificationActivity {
                notifier: Arc::clone(&notifier),
                notification,
            },
        )?;
    }
    Ok(())
}

/// Collects registrations and validates them in [`RegistryBuilder::build`].
#[derive(Default)]
pub struct RegistryBuilder {
    workflows: HashMap<String, Arc<dyn WorkflowHandler>>,
    activities: HashMap<String, Arc<dyn ActivityHandler>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_workflow<W: Workflow + 'static>(&mut self) -> Result<&mut Self, RegistryError> {
        let name = W::workflow_type();
        if self.workflows.contains_key(name) {
            return Err(RegistryError::DuplicateWorkflow(name.to_string()));
        }
        self.workflows
            .insert(name.to_string(), Arc::new(TypedWorkflow::<W>::new()));
        Ok(self)
    }

    pub fn register_activity(
        &mut self,
        name: &str,
        handler: impl ActivityHandler + 'static,
    ) -> Result<&mut Self, RegistryError> {
        if self.activities.contains_key(name) {
            return Err(RegistryError::DuplicateActivity(name.to_string()));
        }
        self.activities.insert(name.to_string(), Arc::new(handler));
        Ok(self)
    }

    /// Checks that every activity and child a workflow uses is registered.
    pub fn build(self) -> Result<Registry, RegistryError> {
        for (owner, workflow) in &self.workflows {
            for name in workflow.activities() {
                if !self.activities.contains_key(*name) {
                    return Err(RegistryError::Unresolved {
                        owner: owner.clone(),
                        kind: "activity",
                        name: name.to_string(),
                    });
                }
            }
            for name in workflow.children() {
                if !self.workflows.contains_key(*name) {
                    return Err(RegistryError::Unresolved {
                        owner: owner.clone(),
                        kind: "child workflow",
                        name: name.to_string(),
                    });
                }
            }
        }

        tracing::debug!(
            workflows = self.workflows.len(),
            activities = self.activities.len(),
            "registry built"
        );

        Ok(Registry {
            workflows: self.workflows,
            activities: self.activities,
        })
    }
}

/// Validated set of workflows and activities.
pub struct Registry {
    workflows: HashMap<String, Arc<dyn WorkflowHandler>>,
    activities: HashMap<String, Arc<dyn ActivityHandler>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn workflow(&self, workflow_type: &str) -> Option<Arc<dyn WorkflowHandler>> {
        self.workflows.get(workflow_type).cloned()
    }

    pub fn activity(&self, name: &str) -> Option<Arc<dyn ActivityHandler>> {
        self.activities.get(name).cloned()
    }

    pub fn workflow_types(&self) -> impl Iterator<Item = &str> {
        self.workflows.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("workflows", &self.workflows.keys().collect::<Vec<_>>())
            .field("activities", &self.activities.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Registry with both order workflows and the notification activities.
pub fn order_registry<N>(notifier: Arc<N>) -> Result<Registry, RegistryError>
where
    N: NotificationActivities + 'static,
{
    let mut builder = Registry::builder();
    builder
        .register_workflow::<orchestration::OrderWorkflow>()?
        .register_workflow::<orchestration::DeliveryWorkflow>()?;
    register_notification_activities(&mut builder, notifier)?;
    builder.build()
}
