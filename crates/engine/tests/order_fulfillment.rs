//! End-to-end tests for the order orchestrations on the in-memory store.
//!
//! All tests run on paused tokio time, so preparation and transit timers
//! elapse instantly.

use std::sync::Arc;
use std::time::Duration;

use engine::{
    Clock, Engine, EngineConfig, EngineError, ExecutionStatus, ManualClock, OrderClient,
    SystemClock, Worker, WorkerConfig, order_registry,
};
use history::{AppendOptions, HistoryRecord, HistoryStore, InMemoryHistoryStore, Sequence};
use orchestration::activities::{NOTIFY_ORDER_AT_DOOR, NOTIFY_ORDER_DELIVERED, NOTIFY_ORDER_RECEIVED};
use orchestration::{
    ActivityError, ActivityOptions, Decision, DecisionWait, DeliveryWorkflow, ExecutionId,
    HistoryEvent, Order, OrderOutcome, OrderRequest, OrderSettings, OrderWorkflow,
    RecordingNotifier, StartOptions, Workflow,
};
use serde_json::json;
use tokio::sync::watch;

struct Harness {
    client: OrderClient<InMemoryHistoryStore>,
    notifier: RecordingNotifier,
    store: InMemoryHistoryStore,
    clock: Arc<dyn Clock>,
}

impl Harness {
    fn new() -> Self {
        Self::build(
            InMemoryHistoryStore::new(),
            RecordingNotifier::new(),
            Arc::new(SystemClock),
            EngineConfig::default(),
        )
    }

    fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::build(
            InMemoryHistoryStore::new(),
            RecordingNotifier::new(),
            clock,
            EngineConfig::default(),
        )
    }

    fn with_config(config: EngineConfig) -> Self {
        Self::build(
            InMemoryHistoryStore::new(),
            RecordingNotifier::new(),
            Arc::new(SystemClock),
            config,
        )
    }

    fn build(
        store: InMemoryHistoryStore,
        notifier: RecordingNotifier,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let registry = Arc::new(order_registry(Arc::new(notifier.clone())).unwrap());
        let engine = Engine::new(store.clone(), registry, Arc::clone(&clock), config);
        Self {
            client: OrderClient::new(engine),
            notifier,
            store,
            clock,
        }
    }

    /// A fresh engine over the same history, as after a process restart.
    fn restart(&self) -> Self {
        Self::build(
            self.store.clone(),
            self.notifier.clone(),
            Arc::clone(&self.clock),
            EngineConfig::default(),
        )
    }

    fn engine(&self) -> &Engine<InMemoryHistoryStore> {
        self.client.engine()
    }

    async fn place(&self, settings: OrderSettings) -> ExecutionId {
        self.client
            .place_order("u1", sample_order(), "r1", settings)
            .await
            .unwrap()
            .execution_id
    }

    async fn run(&self, id: &ExecutionId) -> ExecutionStatus {
        self.engine().run_execution(id).await.unwrap()
    }

    async fn outcome(&self, id: &ExecutionId) -> Option<OrderOutcome> {
        self.client.outcome(id).await.unwrap()
    }

    async fn history(&self, id: &ExecutionId) -> Vec<HistoryEvent> {
        self.engine().history(id).await.unwrap()
    }
}

fn sample_order() -> Order {
    Order::new("o1", ["cheeseburger", "diet coke"])
}

fn unbounded() -> OrderSettings {
    OrderSettings::new(DecisionWait::Unbounded)
}

fn delivery_id() -> ExecutionId {
    DeliveryWorkflow::execution_id_for("o1")
}

fn count(events: &[HistoryEvent], event_type: &str) -> usize {
    events
        .iter()
        .filter(|event| event.event_type() == event_type)
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_accepted_order_completes() {
    let h = Harness::new();
    let id = h.place(unbounded()).await;

    let status = h.run(&id).await;
    assert_eq!(
        status,
        ExecutionStatus::Suspended {
            waiting_on: "signal restaurant-decision".to_string(),
            deadline: None,
        }
    );
    assert_eq!(h.outcome(&id).await, None);

    h.client.send_decision(&id, Decision::Accepted).await.unwrap();
    let status = h.run(&id).await;
    assert!(status.is_terminal());

    assert_eq!(h.outcome(&id).await, Some(OrderOutcome::Completed));
    assert_eq!(
        h.notifier.call_names(),
        vec![
            NOTIFY_ORDER_RECEIVED,
            NOTIFY_ORDER_DELIVERED,
            NOTIFY_ORDER_AT_DOOR
        ]
    );
    // Keyed by activity name: at_door, delivered, received.
    assert_eq!(
        h.notifier.notifications(),
        vec![
            "Your order is in front of your door!".to_string(),
            "Order o1 delivered!".to_string(),
            "Your order received! Order ID: o1, User: u1, Restaurant: r1, Items: [cheeseburger, diet coke]"
                .to_string(),
        ]
    );

    // One preparation delay in the order, one transit delay in the delivery.
    let order_history = h.history(&id).await;
    let delivery_history = h.history(&delivery_id()).await;
    assert_eq!(count(&order_history, "TimerStarted"), 1);
    assert_eq!(count(&order_history, "ChildExecutionStarted"), 1);
    assert_eq!(count(&delivery_history, "TimerStarted"), 1);
    assert_eq!(count(&delivery_history, "ExecutionStarted"), 1);
    assert!(matches!(
        delivery_history.first(),
        Some(HistoryEvent::ExecutionStarted(data)) if data.parent == Some(id.clone())
    ));
}

#[tokio::test(start_paused = true)]
async fn test_early_decision_is_buffered() {
    let h = Harness::new();
    let id = h.place(unbounded()).await;

    h.client.send_decision(&id, Decision::Accepted).await.unwrap();
    h.run(&id).await;

    assert_eq!(h.outcome(&id).await, Some(OrderOutcome::Completed));
    assert_eq!(count(&h.history(&id).await, "SignalWaitStarted"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_order_never_starts_delivery() {
    let h = Harness::new();
    let id = h.place(unbounded()).await;

    h.run(&id).await;
    h.client.send_decision(&id, Decision::Rejected).await.unwrap();
    h.run(&id).await;

    assert_eq!(h.outcome(&id).await, Some(OrderOutcome::OrderRejected));
    assert_eq!(h.notifier.call_names(), vec![NOTIFY_ORDER_RECEIVED]);

    let history = h.history(&id).await;
    assert_eq!(count(&history, "TimerStarted"), 0);
    assert_eq!(count(&history, "ChildExecutionStarted"), 0);
    assert!(matches!(
        h.engine().history(&delivery_id()).await,
        Err(EngineError::ExecutionNotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_any_other_decision_is_a_rejection() {
    let h = Harness::new();
    let id = h.place(unbounded()).await;

    h.engine()
        .signal_execution(&id, "restaurant-decision", json!("maybe later"))
        .await
        .unwrap();
    h.run(&id).await;

    assert_eq!(h.outcome(&id).await, Some(OrderOutcome::OrderRejected));
}

#[tokio::test(start_paused = true)]
async fn test_first_decision_wins() {
    let h = Harness::new();
    let id = h.place(unbounded()).await;

    h.client.send_decision(&id, Decision::Accepted).await.unwrap();
    h.client.send_decision(&id, Decision::Rejected).await.unwrap();
    h.run(&id).await;

    assert_eq!(h.outcome(&id).await, Some(OrderOutcome::Completed));
    assert_eq!(count(&h.history(&id).await, "SignalReceived"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_at_door_failure_fails_order_after_delivery() {
    let h = Harness::new();
    h.notifier
        .fail_on(NOTIFY_ORDER_AT_DOOR, ActivityError::permanent("door not found"));
    let id = h.place(unbounded()).await;

    h.client.send_decision(&id, Decision::Accepted).await.unwrap();
    h.run(&id).await;

    let Some(OrderOutcome::Failed(reason)) = h.outcome(&id).await else {
        panic!("Expected a failed order");
    };
    assert!(reason.contains("notify_order_at_door"));
    assert!(reason.contains("door not found"));
    assert_eq!(
        h.notifier.call_names(),
        vec![
            NOTIFY_ORDER_RECEIVED,
            NOTIFY_ORDER_DELIVERED,
            NOTIFY_ORDER_AT_DOOR
        ]
    );
    assert_eq!(
        h.engine().status(&delivery_id()).await.unwrap(),
        ExecutionStatus::Completed(json!(null))
    );
}

#[tokio::test(start_paused = true)]
async fn test_delivery_failure_propagates_to_order() {
    let h = Harness::new();
    h.notifier
        .fail_on(NOTIFY_ORDER_DELIVERED, ActivityError::permanent("no driver"));
    let id = h.place(unbounded()).await;

    h.client.send_decision(&id, Decision::Accepted).await.unwrap();
    h.run(&id).await;

    let Some(OrderOutcome::Failed(reason)) = h.outcome(&id).await else {
        panic!("Expected a failed order");
    };
    assert!(reason.starts_with("child execution deliver_order_o1 failed"));
    assert!(reason.contains("no driver"));
    assert_eq!(h.notifier.call_count(NOTIFY_ORDER_AT_DOOR), 0);
    assert!(matches!(
        h.engine().status(&delivery_id()).await.unwrap(),
        ExecutionStatus::Failed(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_received_failure_is_fatal() {
    let h = Harness::new();
    h.notifier
        .fail_on(NOTIFY_ORDER_RECEIVED, ActivityError::transient("sms gateway down"));
    let id = h.place(unbounded()).await;

    let status = h.run(&id).await;

    assert!(matches!(status, ExecutionStatus::Failed(reason) if reason.contains("sms gateway down")));
    assert_eq!(h.notifier.call_count(NOTIFY_ORDER_RECEIVED), 1);
    assert_eq!(count(&h.history(&id).await, "SignalWaitStarted"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_resume_during_preparation_does_not_repeat_received() {
    let h = Harness::new();
    let id = h.place(unbounded()).await;
    h.client.send_decision(&id, Decision::Accepted).await.unwrap();

    // Preparation takes 3s; stop the driver in the middle of it.
    let interrupted =
        tokio::time::timeout(Duration::from_secs(1), h.engine().run_execution(&id)).await;
    assert!(interrupted.is_err());
    assert_eq!(h.notifier.call_names(), vec![NOTIFY_ORDER_RECEIVED]);

    let restarted = h.restart();
    restarted.run(&id).await;

    assert_eq!(restarted.outcome(&id).await, Some(OrderOutcome::Completed));
    assert_eq!(h.notifier.call_count(NOTIFY_ORDER_RECEIVED), 1);
    assert_eq!(count(&restarted.history(&id).await, "TimerStarted"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_activity_is_dispatched_again() {
    let h = Harness::new();
    h.notifier.set_latency(Some(Duration::from_secs(2)));
    let id = h.place(unbounded()).await;

    let interrupted =
        tokio::time::timeout(Duration::from_secs(1), h.engine().run_execution(&id)).await;
    assert!(interrupted.is_err());
    assert!(h.notifier.calls().is_empty());

    h.notifier.set_latency(None);
    let restarted = h.restart();
    restarted.run(&id).await;

    assert_eq!(h.notifier.call_count(NOTIFY_ORDER_RECEIVED), 1);
    assert_eq!(count(&restarted.history(&id).await, "ActivityScheduled"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_resume_during_delivery_reuses_child() {
    let h = Harness::new();
    let id = h.place(unbounded()).await;
    h.client.send_decision(&id, Decision::Accepted).await.unwrap();

    // 3s preparation, then 4s transit: at 5s the delivery is en route.
    let interrupted =
        tokio::time::timeout(Duration::from_secs(5), h.engine().run_execution(&id)).await;
    assert!(interrupted.is_err());
    assert!(matches!(
        h.engine().status(&delivery_id()).await.unwrap(),
        ExecutionStatus::Suspended { .. }
    ));

    let restarted = h.restart();
    restarted.run(&id).await;

    assert_eq!(restarted.outcome(&id).await, Some(OrderOutcome::Completed));
    assert_eq!(
        count(&restarted.history(&delivery_id()).await, "ExecutionStarted"),
        1
    );
    assert_eq!(h.notifier.call_count(NOTIFY_ORDER_DELIVERED), 1);
    assert_eq!(h.notifier.call_count(NOTIFY_ORDER_RECEIVED), 1);
}

#[tokio::test(start_paused = true)]
async fn test_decision_wait_timeout_rejects_order() {
    let clock = ManualClock::default();
    let h = Harness::with_clock(Arc::new(clock.clone()));
    let id = h
        .place(OrderSettings::new(DecisionWait::Within(Duration::from_secs(30))))
        .await;

    let ExecutionStatus::Suspended { deadline, .. } = h.run(&id).await else {
        panic!("Expected the order to wait for a decision");
    };
    assert!(deadline.is_some());

    clock.advance(Duration::from_secs(10));
    assert!(!h.run(&id).await.is_terminal());

    clock.advance(Duration::from_secs(21));
    h.run(&id).await;

    assert_eq!(h.outcome(&id).await, Some(OrderOutcome::OrderRejected));
    assert_eq!(h.notifier.call_names(), vec![NOTIFY_ORDER_RECEIVED]);
    assert_eq!(count(&h.history(&id).await, "SignalTimedOut"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_decision_wait_keeps_waiting() {
    let clock = ManualClock::default();
    let h = Harness::with_clock(Arc::new(clock.clone()));
    let id = h.place(unbounded()).await;

    h.run(&id).await;
    clock.advance(Duration::from_secs(6 * 60 * 60));

    assert!(!h.run(&id).await.is_terminal());
    assert_eq!(h.outcome(&id).await, None);
}

#[tokio::test(start_paused = true)]
async fn test_execution_timeout_fails_order() {
    let clock = ManualClock::default();
    let h = Harness::with_clock(Arc::new(clock.clone()));
    let client = OrderClient::new(h.engine().clone())
        .with_start_options(StartOptions::default().with_execution_timeout(Duration::from_secs(3600)));
    let id = client
        .place_order("u1", sample_order(), "r1", unbounded())
        .await
        .unwrap()
        .execution_id;

    h.run(&id).await;
    clock.advance(Duration::from_secs(2 * 3600));

    assert_eq!(
        h.run(&id).await,
        ExecutionStatus::Failed("execution timed out".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_suspended_order() {
    let h = Harness::new();
    let id = h.place(unbounded()).await;
    h.run(&id).await;

    h.engine()
        .cancel_execution(&id, "customer changed mind")
        .await
        .unwrap();

    assert_eq!(
        h.run(&id).await,
        ExecutionStatus::Failed("canceled: customer changed mind".to_string())
    );
    assert!(matches!(
        h.client.send_decision(&id, Decision::Accepted).await,
        Err(EngineError::ExecutionClosed(_))
    ));
    assert!(matches!(
        h.engine().cancel_execution(&id, "again").await,
        Err(EngineError::ExecutionClosed(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_delivery_cancels_child() {
    let h = Harness::new();
    let id = h.place(unbounded()).await;
    h.client.send_decision(&id, Decision::Accepted).await.unwrap();

    let engine = h.engine().clone();
    let driven = id.clone();
    let driver = tokio::spawn(async move { engine.run_execution(&driven).await });

    tokio::time::sleep(Duration::from_secs(5)).await;
    h.engine()
        .cancel_execution(&id, "restaurant closed")
        .await
        .unwrap();

    let status = driver.await.unwrap().unwrap();
    assert_eq!(
        status,
        ExecutionStatus::Failed("canceled: restaurant closed".to_string())
    );
    assert_eq!(
        h.engine().status(&delivery_id()).await.unwrap(),
        ExecutionStatus::Failed("canceled: restaurant closed".to_string())
    );
    assert_eq!(h.notifier.call_count(NOTIFY_ORDER_DELIVERED), 0);
    assert_eq!(h.notifier.call_count(NOTIFY_ORDER_AT_DOOR), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_preparation_timer() {
    let h = Harness::new();
    let id = h.place(unbounded()).await;
    h.client.send_decision(&id, Decision::Accepted).await.unwrap();

    let engine = h.engine().clone();
    let driven = id.clone();
    let driver = tokio::spawn(async move { engine.run_execution(&driven).await });

    // Preparation takes 3s; cancel while the timer is pending.
    tokio::time::sleep(Duration::from_secs(1)).await;
    h.engine()
        .cancel_execution(&id, "kitchen fire")
        .await
        .unwrap();

    let status = driver.await.unwrap().unwrap();
    assert_eq!(
        status,
        ExecutionStatus::Failed("canceled: kitchen fire".to_string())
    );

    let history = h.history(&id).await;
    assert_eq!(count(&history, "TimerStarted"), 1);
    assert_eq!(count(&history, "TimerFired"), 0);
    assert_eq!(count(&history, "ChildExecutionStarted"), 0);
    assert_eq!(h.notifier.call_names(), vec![NOTIFY_ORDER_RECEIVED]);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.notifier.call_count(NOTIFY_ORDER_AT_DOOR), 0);
    assert!(matches!(
        h.engine().status(&delivery_id()).await,
        Err(EngineError::ExecutionNotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_activity() {
    let h = Harness::new();
    h.notifier.set_latency(Some(Duration::from_secs(30)));
    let id = h.place(unbounded()).await;

    let engine = h.engine().clone();
    let driven = id.clone();
    let driver = tokio::spawn(async move { engine.run_execution(&driven).await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    h.engine()
        .cancel_execution(&id, "duplicate order")
        .await
        .unwrap();

    let status = driver.await.unwrap().unwrap();
    assert_eq!(
        status,
        ExecutionStatus::Failed("canceled: duplicate order".to_string())
    );

    let history = h.history(&id).await;
    assert_eq!(count(&history, "ActivityScheduled"), 1);
    assert_eq!(count(&history, "ActivityCompleted"), 0);
    assert_eq!(count(&history, "SignalWaitStarted"), 0);
    assert_eq!(count(&history, "TimerFired"), 0);
    assert_eq!(count(&history, "ChildExecutionStarted"), 0);

    // The interrupted call never finishes, so nothing is ever recorded.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.notifier.call_count(NOTIFY_ORDER_RECEIVED), 0);
    assert!(h.notifier.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_start_to_close_timeout() {
    let h = Harness::new();
    h.notifier.set_latency(Some(Duration::from_secs(5)));
    let settings = unbounded().with_activity_options(ActivityOptions {
        schedule_to_start_timeout: Duration::from_secs(60),
        start_to_close_timeout: Duration::from_secs(1),
    });
    let id = h.place(settings).await;

    let status = h.run(&id).await;

    assert!(matches!(
        status,
        ExecutionStatus::Failed(reason) if reason.contains("start-to-close timeout exceeded")
    ));
    let history = h.history(&id).await;
    assert!(history.iter().any(|event| matches!(
        event,
        HistoryEvent::ActivityFailed(data) if data.error.is_timeout()
    )));
}

#[tokio::test(start_paused = true)]
async fn test_schedule_to_start_timeout() {
    let h = Harness::with_config(EngineConfig {
        max_concurrent_activities: 0,
    });
    let settings = unbounded().with_activity_options(ActivityOptions {
        schedule_to_start_timeout: Duration::from_secs(2),
        start_to_close_timeout: Duration::from_secs(60),
    });
    let id = h.place(settings).await;

    let status = h.run(&id).await;

    assert!(matches!(
        status,
        ExecutionStatus::Failed(reason) if reason.contains("schedule-to-start timeout exceeded")
    ));
    assert!(h.notifier.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_order_is_rejected() {
    let h = Harness::new();
    h.place(unbounded()).await;

    let result = h
        .client
        .place_order("u2", sample_order(), "r2", unbounded())
        .await;

    assert!(matches!(result, Err(EngineError::AlreadyStarted(id)) if id.as_str() == "eats_order_o1"));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_orders_are_refused() {
    let h = Harness::new();

    let result = h
        .client
        .place_order("u1", Order::new("", ["fries"]), "r1", unbounded())
        .await;
    assert!(matches!(result, Err(EngineError::Orchestration(_))));

    let result = h
        .engine()
        .start_execution(
            &ExecutionId::new("eats_order_bad"),
            OrderWorkflow::workflow_type(),
            json!({"not": "an order"}),
            StartOptions::default(),
        )
        .await;
    assert!(matches!(result, Err(EngineError::Orchestration(_))));

    let result = h
        .engine()
        .start_execution(
            &ExecutionId::new("x"),
            "NoSuchWorkflow",
            json!({}),
            StartOptions::default(),
        )
        .await;
    assert!(matches!(result, Err(EngineError::UnknownWorkflow(name)) if name == "NoSuchWorkflow"));
}

#[tokio::test(start_paused = true)]
async fn test_blank_order_id_fails_execution() {
    let h = Harness::new();
    let request = OrderRequest {
        user_id: "u1".to_string(),
        order: Order::new("   ", ["fries"]),
        restaurant_id: "r1".to_string(),
        settings: unbounded(),
    };
    let id = ExecutionId::new("eats_order_blank");
    h.engine()
        .start_execution(
            &id,
            OrderWorkflow::workflow_type(),
            serde_json::to_value(&request).unwrap(),
            StartOptions::default(),
        )
        .await
        .unwrap();

    let status = h.run(&id).await;

    assert!(matches!(status, ExecutionStatus::Failed(reason) if reason.contains("order id must not be empty")));
    assert!(h.notifier.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_signal_to_unknown_execution() {
    let h = Harness::new();
    let result = h
        .client
        .send_decision(&ExecutionId::new("eats_order_missing"), Decision::Accepted)
        .await;
    assert!(matches!(result, Err(EngineError::ExecutionNotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn test_diverging_history_is_nondeterminism() {
    let h = Harness::new();
    let id = ExecutionId::new("eats_order_o1");
    let request = OrderRequest {
        user_id: "u1".to_string(),
        order: sample_order(),
        restaurant_id: "r1".to_string(),
        settings: unbounded(),
    };

    // History claims the first step was the at-door notification.
    let events = [
        HistoryEvent::execution_started(
            OrderWorkflow::workflow_type(),
            serde_json::to_value(&request).unwrap(),
            None,
            StartOptions::default(),
        ),
        HistoryEvent::activity_scheduled(
            1,
            NOTIFY_ORDER_AT_DOOR,
            json!({"order_id": "o1"}),
            ActivityOptions::default(),
        ),
    ];
    let mut sequence = Sequence::initial();
    let mut records = Vec::new();
    for event in &events {
        sequence = sequence.next();
        records.push(
            HistoryRecord::builder()
                .execution_id(id.clone())
                .workflow_type(OrderWorkflow::workflow_type())
                .sequence(sequence)
                .event_type(event.event_type())
                .payload(event)
                .unwrap()
                .build()
                .unwrap(),
        );
    }
    h.store
        .append(records, AppendOptions::expect_new())
        .await
        .unwrap();

    let result = h.engine().run_execution(&id).await;

    assert!(matches!(result, Err(EngineError::Nondeterminism { .. })));
    assert_eq!(h.store.load(&id).await.unwrap().len(), 2);
    assert!(h.notifier.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_worker_drives_orders_to_completion() {
    let h = Harness::new();
    let worker = Worker::new(
        h.engine().clone(),
        WorkerConfig {
            poll_interval: Duration::from_millis(100),
        },
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(worker.run(shutdown_rx));

    let accepted = h.place(unbounded()).await;
    let rejected = h
        .client
        .place_order("u2", Order::new("o2", ["salad"]), "r2", unbounded())
        .await
        .unwrap()
        .execution_id;

    tokio::time::sleep(Duration::from_secs(1)).await;
    h.client
        .send_decision(&accepted, Decision::Accepted)
        .await
        .unwrap();
    h.client
        .send_decision(&rejected, Decision::Rejected)
        .await
        .unwrap();

    let mut outcomes = (None, None);
    for _ in 0..100 {
        outcomes = (h.outcome(&accepted).await, h.outcome(&rejected).await);
        if outcomes.0.is_some() && outcomes.1.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    assert_eq!(
        outcomes,
        (
            Some(OrderOutcome::Completed),
            Some(OrderOutcome::OrderRejected)
        )
    );
    assert_eq!(h.notifier.call_count(NOTIFY_ORDER_RECEIVED), 2);
    assert_eq!(h.notifier.call_count(NOTIFY_ORDER_DELIVERED), 1);

    shutdown_tx.send(true).unwrap();
    worker.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_worker_skips_child_executions() {
    let h = Harness::new();
    let id = h.place(unbounded()).await;
    h.client.send_decision(&id, Decision::Accepted).await.unwrap();

    let interrupted =
        tokio::time::timeout(Duration::from_secs(5), h.engine().run_execution(&id)).await;
    assert!(interrupted.is_err());

    let open = h.engine().open_executions().await.unwrap();
    assert_eq!(open, vec![id]);
}

#[tokio::test(start_paused = true)]
async fn test_worker_zero_poll_interval_uses_default() {
    let h = Harness::new();
    let worker = Worker::new(
        h.engine().clone(),
        WorkerConfig {
            poll_interval: Duration::ZERO,
        },
    );
    assert_eq!(
        worker.config().poll_interval,
        WorkerConfig::default().poll_interval
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(worker.run(shutdown_rx));

    let id = h.place(unbounded()).await;
    h.client.send_decision(&id, Decision::Accepted).await.unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    shutdown_tx.send(true).unwrap();
    worker.await.unwrap();
    assert_eq!(h.outcome(&id).await, Some(OrderOutcome::Completed));
}
