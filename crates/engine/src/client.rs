//! Order-level facade over the engine.

use common::ExecutionId;
use history::HistoryStore;
use orchestration::order::DECISION_SIGNAL;
use orchestration::{
    Decision, Order, OrderOutcome, OrderRequest, OrderSettings, OrderWorkflow, StartOptions,
    Workflow,
};

use crate::engine::{Engine, ExecutionHandle, ExecutionStatus};
use crate::error::Result;

/// Places orders, delivers decisions and reads outcomes.
pub struct OrderClient<S> {
    engine: Engine<S>,
    start_options: StartOptions,
}

impl<S> OrderClient<S>
where
    S: HistoryStore + Clone + 'static,
{
    pub fn new(engine: Engine<S>) -> Self {
        Self {
            engine,
            start_options: StartOptions::default(),
        }
    }

    pub fn with_start_options(mut self, options: StartOptions) -> Self {
        self.start_options = options;
        self
    }

    pub fn engine(&self) -> &Engine<S> {
        &self.engine
    }

    /// Starts the order workflow for `order`.
    ///
    /// The execution ID is derived from the order ID, so placing the same
    /// order twice fails with `AlreadyStarted`.
    #[tracing::instrument(skip(self, order, settings), fields(order_id = %order.id))]
    pub async fn place_order(
        &self,
        user_id: &str,
        order: Order,
        restaurant_id: &str,
        settings: OrderSettings,
    ) -> Result<ExecutionHandle> {
        order.validate()?;

        let execution_id = OrderWorkflow::execution_id_for(&order.id);
        let request = OrderRequest {
            user_id: user_id.to_string(),
            order,
            restaurant_id: restaurant_id.to_string(),
            settings,
        };

        self.engine
            .start_execution(
                &execution_id,
                OrderWorkflow::workflow_type(),
                serde_json::to_value(&request)?,
                self.start_options,
            )
            .await
    }

    /// Delivers the restaurant's decision to an order execution.
    pub async fn send_decision(&self, execution_id: &ExecutionId, decision: Decision) -> Result<()> {
        self.engine
            .signal_execution(execution_id, DECISION_SIGNAL, decision.as_payload())
            .await
    }

    /// The order's outcome, or None while it is still running.
    pub async fn outcome(&self, execution_id: &ExecutionId) -> Result<Option<OrderOutcome>> {
        match self.engine.status(execution_id).await? {
            ExecutionStatus::Completed(output) => Ok(Some(serde_json::from_value(output)?)),
            ExecutionStatus::Failed(reason) => Ok(Some(OrderOutcome::Failed(reason))),
            ExecutionStatus::Suspended { .. } => Ok(None),
        }
    }
}
