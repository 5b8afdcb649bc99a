//! Internal event bus: gateway lifecycle, adapter, session, message, and
//! tool events, fanned out to registered handlers so hooks and other
//! observers don't need to be wired into every call site.
//!
//! Per-type handler lists plus a wildcard list, priority-ordered (highest
//! first), bounded history, and concurrent dispatch where one handler's
//! failure doesn't stop its siblings from running.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::warn;

/// Kinds of events the gateway emits. No transport-specific variants beyond
/// what's listed — there's no HTTP route layer to instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    GatewayStarted,
    GatewayStopping,
    AdapterConnected,
    AdapterDisconnected,
    AdapterReconnected,
    SessionCreated,
    SessionExpired,
    MessageReceived,
    MessageProcessed,
    ToolExecuted,
    ToolFailed,
    SchedulerTaskRun,
    SchedulerTaskFailed,
    Custom,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::GatewayStarted => "gateway_started",
            EventType::GatewayStopping => "gateway_stopping",
            EventType::AdapterConnected => "adapter_connected",
            EventType::AdapterDisconnected => "adapter_disconnected",
            EventType::AdapterReconnected => "adapter_reconnected",
            EventType::SessionCreated => "session_created",
            EventType::SessionExpired => "session_expired",
            EventType::MessageReceived => "message_received",
            EventType::MessageProcessed => "message_processed",
            EventType::ToolExecuted => "tool_executed",
            EventType::ToolFailed => "tool_failed",
            EventType::SchedulerTaskRun => "scheduler_task_run",
            EventType::SchedulerTaskFailed => "scheduler_task_failed",
            EventType::Custom => "custom",
        }
    }
}

/// One emitted occurrence, with the context fields hook commands get
/// injected as `CLARA_*` environment variables.
#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: EventType,
    pub timestamp: NaiveDateTime,
    pub node_id: Option<String>,
    pub platform: Option<String>,
    pub user_id: Option<String>,
    pub channel_id: Option<String>,
    pub request_id: Option<String>,
    pub data: Value,
}

impl Event {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            timestamp: Utc::now().naive_utc(),
            node_id: None,
            platform: None,
            user_id: None,
            channel_id: None,
            request_id: None,
            data: Value::Null,
        }
    }

    pub fn with_node(mut self, node_id: impl Into<String>, platform: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self.platform = Some(platform.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self.channel_id = Some(channel_id.into());
        self
    }

    pub fn with_request(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// A registered handler. `priority` runs highest-first.
pub type Handler = Arc<dyn Fn(Event) -> futures::future::BoxFuture<'static, ()> + Send + Sync>;

struct Registration {
    priority: i32,
    handler: Handler,
}

const HISTORY_LIMIT: usize = 100;

struct Inner {
    handlers: HashMap<EventType, Vec<Registration>>,
    wildcard: Vec<Registration>,
    history: Vec<Event>,
}

/// Fans out events to per-type and wildcard handlers. Cheap to clone;
/// state lives behind a single `Arc<RwLock<Inner>>`.
#[derive(Clone)]
pub struct EventEmitter {
    inner: Arc<RwLock<Inner>>,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventEmitter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                handlers: HashMap::new(),
                wildcard: Vec::new(),
                history: Vec::new(),
            })),
        }
    }

    /// Register `handler` for `event_type`, run in descending `priority`
    /// order relative to other handlers on the same type.
    pub async fn on(&self, event_type: EventType, priority: i32, handler: Handler) {
        let mut inner = self.inner.write().await;
        let list = inner.handlers.entry(event_type).or_default();
        list.push(Registration { priority, handler });
        list.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Register `handler` to run on every event type.
    pub async fn on_any(&self, priority: i32, handler: Handler) {
        let mut inner = self.inner.write().await;
        inner.wildcard.push(Registration { priority, handler });
        inner.wildcard.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Dispatch `event` to every matching handler concurrently. A handler
    /// panicking or otherwise failing doesn't stop its siblings, matching
    /// `asyncio.gather(..., return_exceptions=True)` in the original.
    pub async fn emit(&self, event: Event) {
        let (typed, wildcard) = {
            let mut inner = self.inner.write().await;
            inner.history.push(event.clone());
            if inner.history.len() > HISTORY_LIMIT {
                inner.history.remove(0);
            }
            let typed = inner.handlers.get(&event.event_type).cloned_handlers();
            let wildcard = inner.wildcard.cloned_handlers();
            (typed, wildcard)
        };

        let futures = typed
            .into_iter()
            .chain(wildcard)
            .map(|handler| {
                let event = event.clone();
                async move {
                    tokio::spawn(handler(event)).await
                }
            })
            .collect::<Vec<_>>();

        for result in join_all(futures).await {
            if let Err(e) = result {
                warn!(error = %e, "event handler panicked");
            }
        }
    }

    pub async fn history(&self) -> Vec<Event> {
        self.inner.read().await.history.clone()
    }
}

trait ClonedHandlers {
    fn cloned_handlers(&self) -> Vec<Handler>;
}

impl ClonedHandlers for Vec<Registration> {
    fn cloned_handlers(&self) -> Vec<Handler> {
        self.iter().map(|r| r.handler.clone()).collect()
    }
}

impl ClonedHandlers for Option<&Vec<Registration>> {
    fn cloned_handlers(&self) -> Vec<Handler> {
        self.map(|list| list.cloned_handlers()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn registered_handler_receives_emitted_event() {
        let emitter = EventEmitter::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        emitter
            .on(
                EventType::MessageReceived,
                0,
                Arc::new(move |_event| {
                    let seen = seen_clone.clone();
                    Box::pin(async move {
                        seen.fetch_add(1, Ordering::SeqCst);
                    })
                }),
            )
            .await;

        emitter.emit(Event::new(EventType::MessageReceived)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wildcard_handler_receives_every_event_type() {
        let emitter = EventEmitter::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        emitter
            .on_any(
                0,
                Arc::new(move |_event| {
                    let seen = seen_clone.clone();
                    Box::pin(async move {
                        seen.fetch_add(1, Ordering::SeqCst);
                    })
                }),
            )
            .await;

        emitter.emit(Event::new(EventType::AdapterConnected)).await;
        emitter.emit(Event::new(EventType::ToolExecuted)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let emitter = EventEmitter::new();
        for _ in 0..150 {
            emitter.emit(Event::new(EventType::SchedulerTaskRun)).await;
        }
        assert_eq!(emitter.history().await.len(), HISTORY_LIMIT);
    }

    #[tokio::test]
    async fn higher_priority_handler_runs_and_is_observed_first() {
        let emitter = EventEmitter::new();
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        for (priority, label) in [(0, "low"), (10, "high")] {
            let order = order.clone();
            emitter
                .on(
                    EventType::ToolFailed,
                    priority,
                    Arc::new(move |_event| {
                        let order = order.clone();
                        Box::pin(async move {
                            order.lock().await.push(label);
                        })
                    }),
                )
                .await;
        }
        emitter.emit(Event::new(EventType::ToolFailed)).await;
        let order = order.lock().await;
        assert_eq!(*order, vec!["high", "low"]);
    }
}
