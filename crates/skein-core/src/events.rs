//! Event plumbing: async callbacks, path-prefix wrapping, a broadcast bus,
//! and an in-memory collector.
//!
//! The engine threads an optional `EventCallback` through every handler.
//! Control-flow handlers wrap the callback they received with a path prefix
//! before passing it down, which is how hierarchical step paths like
//! `implement_by_phase/[0]/implement_phase` are composed without any global
//! state.

use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use tokio::sync::broadcast;

use skein_types::event::WorkflowEvent;

/// Shared async event callback. Cheap to clone; called from whichever task
/// is emitting.
pub type EventCallback = Arc<dyn Fn(WorkflowEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap a callback so every event passing through gains `prefix` at the
/// front of its step path.
pub fn prefix_callback(prefix: impl Into<String>, inner: EventCallback) -> EventCallback {
    let prefix = prefix.into();
    Arc::new(move |event: WorkflowEvent| inner(event.with_path_prefix(&prefix)))
}

// ---------------------------------------------------------------------------
// EventCollector
// ---------------------------------------------------------------------------

/// Lock-guarded in-memory event accumulator.
///
/// The engine's built-in sink when no external callback is supplied, and
/// the workhorse of the test suite.
#[derive(Clone, Default)]
pub struct EventCollector {
    events: Arc<Mutex<Vec<WorkflowEvent>>>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback that appends every event to this collector.
    pub fn callback(&self) -> EventCallback {
        let events = Arc::clone(&self.events);
        Arc::new(move |event: WorkflowEvent| {
            let events = Arc::clone(&events);
            Box::pin(async move {
                events.lock().expect("event collector lock poisoned").push(event);
            })
        })
    }

    /// Snapshot of all collected events, in arrival order.
    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().expect("event collector lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("event collector lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Multi-consumer broadcast bus for workflow events.
///
/// Wraps a `tokio::sync::broadcast` channel. Cloning the bus clones the
/// sender; publishing with no active subscribers is a no-op.
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    /// Create a bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    /// Publish an event; silently dropped when nobody is listening.
    pub fn publish(&self, event: WorkflowEvent) {
        let _ = self.sender.send(event);
    }

    /// A callback that publishes every event onto this bus.
    pub fn callback(&self) -> EventCallback {
        let sender = self.sender.clone();
        Arc::new(move |event: WorkflowEvent| {
            let _ = sender.send(event);
            Box::pin(async {})
        })
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self { sender: self.sender.clone() }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use skein_types::result::StepType;

    fn step_started(name: &str) -> WorkflowEvent {
        WorkflowEvent::StepStarted {
            step_name: name.to_string(),
            step_type: StepType::Python,
            step_path: name.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn collector_accumulates_in_order() {
        let collector = EventCollector::new();
        let callback = collector.callback();

        callback(step_started("a")).await;
        callback(step_started("b")).await;

        let events = collector.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].step_path(), "a");
        assert_eq!(events[1].step_path(), "b");
    }

    #[tokio::test]
    async fn prefix_callback_rewrites_paths() {
        let collector = EventCollector::new();
        let wrapped = prefix_callback("inner_prefix", collector.callback());
        wrapped(step_started("step")).await;

        let events = collector.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].step_path(), "inner_prefix/step");
    }

    #[tokio::test]
    async fn nested_prefixing_composes_hierarchical_paths() {
        let collector = EventCollector::new();
        // The engine wraps outermost-first: the loop wraps with its name,
        // then per-iteration with the index.
        let loop_cb = prefix_callback("implement_by_phase", collector.callback());
        let iter_cb = prefix_callback("[0]", loop_cb);

        iter_cb(step_started("implement_phase")).await;

        let events = collector.events();
        assert_eq!(events[0].step_path(), "implement_by_phase/[0]/implement_phase");
    }

    #[tokio::test]
    async fn bus_delivers_to_all_subscribers() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(step_started("x"));

        assert_eq!(rx1.recv().await.unwrap().step_path(), "x");
        assert_eq!(rx2.recv().await.unwrap().step_path(), "x");
    }

    #[tokio::test]
    async fn bus_publish_without_subscribers_is_noop() {
        let bus = EventBus::new(16);
        bus.publish(step_started("dropped"));
        bus.publish(step_started("dropped"));
    }

    #[tokio::test]
    async fn bus_callback_publishes() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let callback = bus.callback();

        callback(step_started("via_callback")).await;

        assert_eq!(rx.recv().await.unwrap().step_path(), "via_callback");
    }
}
