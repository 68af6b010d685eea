//! Typed lifecycle events and the bus that delivers them.
//!
//! Subscribers are observers: handlers run synchronously on the publishing
//! task and cannot influence scheduling. Channel subscribers receive events
//! through an unbounded tokio channel.

use crate::error::{NodeExecutionError, RunError};
use crate::execution::{ExecutionResult, ExecutionState, RunStats};
use crate::node::NodeId;
use chrono::{DateTime, Utc};
use nodeflow_core::{RunId, SubscriptionId, WorkflowId};
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tracing::warn;

/// A lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum WorkflowEvent {
    WorkflowStarted {
        run_id: RunId,
        workflow_id: WorkflowId,
        total_nodes: usize,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        run_id: RunId,
        node_id: NodeId,
        node_type: String,
        round: u32,
        timestamp: DateTime<Utc>,
    },
    NodeRetrying {
        run_id: RunId,
        node_id: NodeId,
        /// The attempt that just failed.
        attempt: u32,
        delay_ms: u64,
        error: NodeExecutionError,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        run_id: RunId,
        node_id: NodeId,
        result: ExecutionResult,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        run_id: RunId,
        node_id: NodeId,
        error: NodeExecutionError,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
    NodeSkipped {
        run_id: RunId,
        node_id: NodeId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    ExecutionProgress {
        run_id: RunId,
        round: u32,
        completed: usize,
        failed: usize,
        skipped: usize,
        total: usize,
        timestamp: DateTime<Utc>,
    },
    ContextStateChanged {
        run_id: RunId,
        from: ExecutionState,
        to: ExecutionState,
        timestamp: DateTime<Utc>,
    },
    WorkflowCompleted {
        run_id: RunId,
        stats: RunStats,
        timestamp: DateTime<Utc>,
    },
    WorkflowFailed {
        run_id: RunId,
        error: RunError,
        stats: RunStats,
        timestamp: DateTime<Utc>,
    },
}

/// The kind of a [`WorkflowEvent`], used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    WorkflowStarted,
    NodeStarted,
    NodeRetrying,
    NodeCompleted,
    NodeFailed,
    NodeSkipped,
    ExecutionProgress,
    ContextStateChanged,
    WorkflowCompleted,
    WorkflowFailed,
}

impl WorkflowEvent {
    /// Returns the kind of this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::WorkflowStarted { .. } => EventKind::WorkflowStarted,
            Self::NodeStarted { .. } => EventKind::NodeStarted,
            Self::NodeRetrying { .. } => EventKind::NodeRetrying,
            Self::NodeCompleted { .. } => EventKind::NodeCompleted,
            Self::NodeFailed { .. } => EventKind::NodeFailed,
            Self::NodeSkipped { .. } => EventKind::NodeSkipped,
            Self::ExecutionProgress { .. } => EventKind::ExecutionProgress,
            Self::ContextStateChanged { .. } => EventKind::ContextStateChanged,
            Self::WorkflowCompleted { .. } => EventKind::WorkflowCompleted,
            Self::WorkflowFailed { .. } => EventKind::WorkflowFailed,
        }
    }

    /// Returns the run this event belongs to.
    #[must_use]
    pub fn run_id(&self) -> RunId {
        match self {
            Self::WorkflowStarted { run_id, .. }
            | Self::NodeStarted { run_id, .. }
            | Self::NodeRetrying { run_id, .. }
            | Self::NodeCompleted { run_id, .. }
            | Self::NodeFailed { run_id, .. }
            | Self::NodeSkipped { run_id, .. }
            | Self::ExecutionProgress { run_id, .. }
            | Self::ContextStateChanged { run_id, .. }
            | Self::WorkflowCompleted { run_id, .. }
            | Self::WorkflowFailed { run_id, .. } => *run_id,
        }
    }

    /// Returns the node this event is about, if any.
    #[must_use]
    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            Self::NodeStarted { node_id, .. }
            | Self::NodeRetrying { node_id, .. }
            | Self::NodeCompleted { node_id, .. }
            | Self::NodeFailed { node_id, .. }
            | Self::NodeSkipped { node_id, .. } => Some(node_id),
            _ => None,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

type Handler = Arc<dyn Fn(&WorkflowEvent) + Send + Sync>;

#[derive(Clone)]
enum Sink {
    Handler(Handler),
    Channel(mpsc::UnboundedSender<WorkflowEvent>),
}

#[derive(Clone)]
struct Subscriber {
    id: SubscriptionId,
    filter: Option<EventKind>,
    sink: Sink,
}

impl Subscriber {
    fn wants(&self, kind: EventKind) -> bool {
        self.filter.is_none_or(|filter| filter == kind)
    }
}

/// Publish/subscribe hub for [`WorkflowEvent`]s.
///
/// Cloning yields another handle to the same set of subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    /// Creates a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, filter: Option<EventKind>, sink: Sink) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber { id, filter, sink });
        id
    }

    /// Calls `handler` for every event of `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&WorkflowEvent) + Send + Sync + 'static,
    {
        self.add(Some(kind), Sink::Handler(Arc::new(handler)))
    }

    /// Calls `handler` for every event.
    pub fn on_any<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&WorkflowEvent) + Send + Sync + 'static,
    {
        self.add(None, Sink::Handler(Arc::new(handler)))
    }

    /// Returns a receiver that gets a copy of every event.
    ///
    /// Dropping the receiver ends the subscription on the next publish.
    pub fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<WorkflowEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.add(None, Sink::Channel(tx)), rx)
    }

    /// Removes a subscription. Returns false if it was not registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    /// Returns the number of active subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Delivers `event` to every matching subscriber.
    ///
    /// The subscriber list is copied before delivery, so handlers may
    /// subscribe or unsubscribe without deadlocking. A panicking handler is
    /// logged and skipped; the remaining subscribers still receive the event.
    pub fn publish(&self, event: WorkflowEvent) {
        let kind = event.kind();
        let targets: Vec<Subscriber> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.wants(kind))
            .cloned()
            .collect();

        let mut closed = Vec::new();
        for subscriber in targets {
            match subscriber.sink {
                Sink::Handler(handler) => {
                    let delivered = panic::catch_unwind(AssertUnwindSafe(|| handler(&event)));
                    if let Err(payload) = delivered {
                        warn!(
                            subscription = %subscriber.id,
                            ?kind,
                            panic = panic_message(payload.as_ref()),
                            "event handler panicked"
                        );
                    }
                }
                Sink::Channel(tx) => {
                    if tx.send(event.clone()).is_err() {
                        closed.push(subscriber.id);
                    }
                }
            }
        }

        if !closed.is_empty() {
            self.subscribers
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|s| !closed.contains(&s.id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn started(node: &str) -> WorkflowEvent {
        WorkflowEvent::NodeStarted {
            run_id: RunId::new(),
            node_id: NodeId::from(node),
            node_type: "noop".to_string(),
            round: 1,
            timestamp: Utc::now(),
        }
    }

    fn skipped(node: &str) -> WorkflowEvent {
        WorkflowEvent::NodeSkipped {
            run_id: RunId::new(),
            node_id: NodeId::from(node),
            reason: "condition".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn on_filters_by_kind() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.on(EventKind::NodeSkipped, move |event| {
            sink.lock().unwrap().push(event.node_id().cloned());
        });

        bus.publish(started("a"));
        bus.publish(skipped("b"));

        assert_eq!(*seen.lock().unwrap(), vec![Some(NodeId::from("b"))]);
    }

    #[test]
    fn off_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&count);
        let id = bus.on_any(move |_| *counter.lock().unwrap() += 1);

        bus.publish(started("a"));
        assert!(bus.off(id));
        assert!(!bus.off(id));
        bus.publish(started("b"));

        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn subscribe_receives_events_in_order() {
        let bus = EventBus::new();
        let (_id, mut rx) = bus.subscribe();

        bus.publish(started("a"));
        bus.publish(skipped("b"));

        assert_eq!(rx.recv().await.map(|e| e.kind()), Some(EventKind::NodeStarted));
        assert_eq!(rx.recv().await.map(|e| e.kind()), Some(EventKind::NodeSkipped));
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let bus = EventBus::new();
        let (_id, rx) = bus.subscribe();
        drop(rx);

        bus.publish(started("a"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn handlers_may_unsubscribe_while_publishing() {
        let bus = EventBus::new();
        let inner = bus.clone();
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let slot_in_handler = Arc::clone(&slot);
        let id = bus.on_any(move |_| {
            if let Some(id) = *slot_in_handler.lock().unwrap() {
                inner.off(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        bus.publish(started("a"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn panicking_handler_does_not_stop_delivery() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&seen);
        bus.on_any(|_| panic!("handler bug"));
        bus.on_any(move |_| *counter.lock().unwrap() += 1);
        let (_id, mut rx) = bus.subscribe();

        bus.publish(started("a"));
        bus.publish(started("b"));

        assert_eq!(*seen.lock().unwrap(), 2);
        assert_eq!(rx.try_recv().map(|e| e.kind()), Ok(EventKind::NodeStarted));
        assert_eq!(bus.subscriber_count(), 3);
    }

    #[test]
    fn events_serialize_with_tag() {
        let value = serde_json::to_value(skipped("b")).expect("serialize");
        assert_eq!(value["event"], "node_skipped");
        assert_eq!(value["nodeId"], "b");
    }
}
