//! WebSocket connection lifecycle: per-connection handshake, message loop,
//! and cleanup.
//!
//! Split socket, a dedicated write-loop task draining an
//! `mpsc::unbounded_channel<String>`, and a message loop dispatching on
//! frame type (REGISTER/PING/MESSAGE/CANCEL/STATUS), with cleanup on
//! disconnect. The shared-secret check happens once, at the WebSocket
//! upgrade, rather than per adapter-chosen REGISTER auth scheme.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use clara_common::{now_ms, new_id};
use clara_protocol::{ErrorShape, GatewayFrame, ParseError, error_codes, parse_frame};
use clara_routing::{RequestStatus, SubmitOutcome, SubmitRequest};
use clara_service_traits::MemoryStore;
use futures::{SinkExt, StreamExt};
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info, warn};

use crate::events::{Event, EventType};
use crate::processor;
use crate::state::{ConnectedClient, GatewayState};

/// Context an activated request needs once it reaches the processor, kept
/// outside [`clara_routing::ActivatedRequest`] since the router has no
/// reason to know about channel/platform shape.
#[derive(Clone)]
struct RequestMeta {
    conn_id: u64,
    platform: String,
    channel_kind: clara_protocol::ChannelKind,
    channel_name: Option<String>,
    display_name: Option<String>,
    is_batchable: bool,
}

/// Tracks in-flight processing tasks so a `CANCEL` frame can abort the
/// running task, not just flip router bookkeeping.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<Mutex<HashMap<String, tokio::task::AbortHandle>>>,
}

impl TaskRegistry {
    async fn insert(&self, request_id: String, handle: tokio::task::AbortHandle) {
        self.tasks.lock().await.insert(request_id, handle);
    }

    async fn remove(&self, request_id: &str) {
        self.tasks.lock().await.remove(request_id);
    }

    async fn abort(&self, request_id: &str) -> bool {
        match self.tasks.lock().await.remove(request_id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

#[derive(Clone, Default)]
struct PendingMeta {
    inner: Arc<RwLock<HashMap<String, RequestMeta>>>,
}

impl PendingMeta {
    async fn insert(&self, request_id: String, meta: RequestMeta) {
        self.inner.write().await.insert(request_id, meta);
    }

    async fn take(&self, request_id: &str) -> Option<RequestMeta> {
        self.inner.write().await.remove(request_id)
    }
}

/// Shared mutable runtime wired into every connection and the background
/// activation consumer, beyond what lives directly on [`GatewayState`].
#[derive(Clone)]
pub struct ConnectionRuntime {
    pub state: Arc<GatewayState>,
    pub memory: Arc<dyn MemoryStore>,
    pending: PendingMeta,
    tasks: TaskRegistry,
}

impl ConnectionRuntime {
    pub fn new(state: Arc<GatewayState>, memory: Arc<dyn MemoryStore>) -> Self {
        Self {
            state,
            memory,
            pending: PendingMeta::default(),
            tasks: TaskRegistry::default(),
        }
    }

    /// Consumes requests that became ACTIVE asynchronously (debounce
    /// consolidation, queue-head promotion) and dispatches them for
    /// processing. Runs for the lifetime of the gateway.
    pub async fn run_activation_consumer(self, mut rx: mpsc::UnboundedReceiver<clara_routing::ActivatedRequest>) {
        while let Some(activated) = rx.recv().await {
            self.clone().dispatch_activated(activated).await;
        }
    }

    async fn dispatch_activated(self, activated: clara_routing::ActivatedRequest) {
        let Some(meta) = self.pending.take(&activated.request_id).await else {
            warn!(request_id = %activated.request_id, "activated request has no stashed context");
            return;
        };
        let clients = self.state.clients.read().await;
        let Some(client) = clients.get(&meta.conn_id) else {
            drop(clients);
            self.state.router.complete(&activated.request_id, RequestStatus::Failed).await;
            return;
        };
        let sender = client.sender.clone();
        drop(clients);
        self.spawn_processing(activated, meta, sender).await;
    }

    async fn spawn_processing(&self, activated: clara_routing::ActivatedRequest, meta: RequestMeta, sender: mpsc::UnboundedSender<String>) {
        let request_id = activated.request_id.clone();
        let state = self.state.clone();
        let memory = self.memory.clone();
        let events = self.state.events.clone();
        let is_batchable = meta.is_batchable;

        let handle = tokio::spawn(async move {
            let send = |frame: &GatewayFrame| {
                if let Ok(json) = serde_json::to_string(frame) {
                    let _ = sender.send(json);
                }
            };
            processor::process(
                activated,
                meta.channel_kind,
                meta.channel_name,
                meta.platform,
                meta.display_name,
                state.orchestrator.clone(),
                memory,
                events,
                send,
            )
            .await
        });
        self.tasks.insert(request_id.clone(), handle.abort_handle()).await;

        // A hard bug (unhandled panic) inside `processor::process` must
        // still release the channel, so this supervisory task awaits the
        // handle rather than only running cleanup after a bare `.await`
        // on the processing future itself.
        let state = self.state.clone();
        let tasks = self.tasks.clone();
        tokio::spawn(async move {
            let status = match handle.await {
                Ok(true) => Some(RequestStatus::Completed),
                Ok(false) => Some(RequestStatus::Failed),
                Err(e) if e.is_cancelled() => {
                    // A CANCEL frame already moved this request to
                    // `RequestStatus::Cancelled`; don't overwrite it.
                    debug!(request_id = %request_id, "processing task cancelled");
                    None
                }
                Err(_) => {
                    warn!(request_id = %request_id, "processing task panicked");
                    Some(RequestStatus::Failed)
                }
            };
            if let Some(status) = status {
                if is_batchable {
                    state.router.complete_batch(&request_id, status).await;
                } else {
                    state.router.complete(&request_id, status).await;
                }
            }
            tasks.remove(&request_id).await;
        });
    }
}

/// Handle a single WebSocket connection through its full lifecycle.
pub async fn handle_connection(socket: WebSocket, runtime: ConnectionRuntime, remote_addr: SocketAddr) {
    let conn_id = runtime.state.next_conn_id();
    info!(conn_id, remote = %remote_addr, "ws: new connection");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<String>();

    let write_handle = tokio::spawn(async move {
        while let Some(msg) = client_rx.recv().await {
            if ws_tx.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    runtime
        .state
        .register_client(ConnectedClient {
            conn_id,
            sender: client_tx.clone(),
            node_id: None,
            connected_at: std::time::Instant::now(),
        })
        .await;
    record_connections_active(runtime.state.client_count().await);

    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t.to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(conn_id, error = %e, "ws: read error");
                break;
            }
        };

        match parse_frame(&text) {
            Ok(frame) => {
                record_frame_received();
                handle_frame(&runtime, conn_id, &client_tx, frame).await;
            }
            Err(ParseError::UnknownType(tag)) => {
                debug!(conn_id, tag, "ws: ignoring unknown frame type");
            }
            Err(e) => {
                warn!(conn_id, error = %e, "ws: malformed frame");
                send_error(&client_tx, new_id(), None, e.code(), &e.to_string());
            }
        }
    }

    // ── Cleanup ──────────────────────────────────────────────────────────
    let removed = runtime.state.remove_client(conn_id).await;
    record_connections_active(runtime.state.client_count().await);
    if let Some(node_id) = removed.and_then(|c| c.node_id) {
        runtime.state.registry.unregister_by_conn(conn_id).await;
        info!(conn_id, node_id = %node_id, "ws: node unregistered");
        runtime
            .state
            .events
            .emit(Event::new(EventType::AdapterDisconnected).with_node(node_id, ""))
            .await;
    }

    drop(client_tx);
    write_handle.abort();
    info!(conn_id, "ws: connection closed");
}

async fn handle_frame(runtime: &ConnectionRuntime, conn_id: u64, client_tx: &mpsc::UnboundedSender<String>, frame: GatewayFrame) {
    match frame {
        GatewayFrame::Register { id, node_id, platform, capabilities, prior_session_id } => {
            let (session_id, outcome) = runtime
                .state
                .registry
                .register(conn_id, node_id.clone(), platform.clone(), capabilities, prior_session_id, now_ms())
                .await;
            runtime.state.set_client_node(conn_id, node_id.clone()).await;
            send(client_tx, &GatewayFrame::Registered { id, session_id, is_reconnection: outcome.is_reconnection });

            let event_type = if outcome.is_reconnection { EventType::AdapterReconnected } else { EventType::AdapterConnected };
            runtime.state.events.emit(Event::new(event_type).with_node(node_id.clone(), platform.clone())).await;
            info!(conn_id, node_id = %node_id, platform = %platform, reconnection = outcome.is_reconnection, "ws: registered");
        }
        GatewayFrame::Unregister { .. } => {
            let node_id = runtime.state.clients.read().await.get(&conn_id).and_then(|c| c.node_id.clone());
            if let Some(node_id) = node_id
                && let Some(node) = runtime.state.registry.get(&node_id).await
            {
                runtime.state.registry.forget_session(&node.session_id).await;
                runtime.state.set_client_node_none(conn_id).await;
                info!(conn_id, node_id = %node_id, "ws: explicit unregister");
            }
        }
        GatewayFrame::Ping { id } => {
            runtime.state.registry.update_ping(conn_id, now_ms()).await;
            send(client_tx, &GatewayFrame::Pong { id });
        }
        GatewayFrame::Message { id, user, channel, content, attachments, reply_to, tier_override, metadata, is_mention } => {
            handle_message(runtime, conn_id, client_tx, id, user, channel, content, attachments, reply_to, tier_override, metadata, is_mention).await;
        }
        GatewayFrame::Cancel { id, request_id } => {
            match runtime.state.router.cancel(&request_id).await {
                Ok(()) => {
                    runtime.tasks.abort(&request_id).await;
                    send(client_tx, &GatewayFrame::Cancelled { id, request_id });
                }
                Err(e) => send_error(client_tx, id, Some(request_id), e.code(), &e.to_string()),
            }
        }
        GatewayFrame::Status { id } => {
            send(client_tx, &GatewayFrame::Status {
                id,
                active_count: runtime.state.router.active_count().await,
                queue_length: 0,
                uptime_secs: Some(runtime.state.uptime_secs()),
            });
        }
        other => {
            debug!(conn_id, frame = other.type_name(), "ws: ignoring adapter-unexpected frame");
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_message(
    runtime: &ConnectionRuntime,
    conn_id: u64,
    client_tx: &mpsc::UnboundedSender<String>,
    id: String,
    user: clara_protocol::UserInfo,
    channel: clara_protocol::ChannelInfo,
    content: String,
    attachments: Vec<clara_protocol::AttachmentInfo>,
    reply_to: Option<String>,
    tier_override: Option<String>,
    metadata: serde_json::Map<String, serde_json::Value>,
    is_mention: bool,
) {
    let node = {
        let clients = runtime.state.clients.read().await;
        clients.get(&conn_id).and_then(|c| c.node_id.clone())
    };
    let Some(node_id) = node else {
        send_error(client_tx, id, None, error_codes::NOT_REGISTERED, "node not registered");
        return;
    };
    let Some(node_session) = runtime.state.registry.get(&node_id).await else {
        send_error(client_tx, id, None, error_codes::NOT_REGISTERED, "node not registered");
        return;
    };

    runtime.state.record_message();
    runtime
        .state
        .events
        .emit(
            Event::new(EventType::MessageReceived)
                .with_node(node_id.clone(), node_session.platform.clone())
                .with_user(user.id.clone(), channel.id.clone())
                .with_request(id.clone()),
        )
        .await;

    let is_dm = channel.kind == clara_protocol::ChannelKind::Dm;
    let is_batchable = channel.kind == clara_protocol::ChannelKind::Server && !is_mention;

    runtime
        .pending
        .insert(
            id.clone(),
            RequestMeta {
                conn_id,
                platform: node_session.platform.clone(),
                channel_kind: channel.kind,
                channel_name: channel.name.clone(),
                display_name: user.display_name.clone(),
                is_batchable,
            },
        )
        .await;

    let attachments_json: Vec<serde_json::Value> = attachments
        .iter()
        .map(|a| serde_json::to_value(a).unwrap_or(serde_json::Value::Null))
        .collect();

    let submit_request = SubmitRequest {
        request_id: id.clone(),
        channel_id: channel.id.clone(),
        user_id: user.id.clone(),
        content,
        bypass_debounce: is_dm || is_mention,
        is_batchable,
        reply_to,
        attachments: attachments_json,
        tier_override,
        metadata,
    };

    match runtime.state.router.submit(submit_request).await {
        SubmitOutcome::Duplicate => {
            runtime.pending.take(&id).await;
            send_error(client_tx, id, None, error_codes::DUPLICATE, "duplicate message within dedupe window");
        }
        SubmitOutcome::Debounced => {
            // Consolidated request will surface on the activation channel
            // once the debounce window elapses.
        }
        SubmitOutcome::Queued { position } => {
            send(client_tx, &GatewayFrame::Status {
                id: new_id(),
                active_count: 1,
                queue_length: position,
                uptime_secs: None,
            });
        }
        SubmitOutcome::Active(activated) => {
            let meta = runtime.pending.take(&activated.request_id).await.expect("meta just inserted");
            let sender = client_tx.clone();
            runtime.spawn_processing(activated, meta, sender).await;
        }
    }
}

fn send(client_tx: &mpsc::UnboundedSender<String>, frame: &GatewayFrame) {
    if let Ok(json) = serde_json::to_string(frame) {
        let _ = client_tx.send(json);
        record_frame_sent();
    }
}

fn send_error(client_tx: &mpsc::UnboundedSender<String>, id: String, request_id: Option<String>, code: &str, message: &str) {
    send(client_tx, &GatewayFrame::error(id, request_id, ErrorShape::new(code, message, true)));
}

#[cfg(feature = "metrics")]
fn record_connections_active(count: usize) {
    clara_metrics::gauge!(clara_metrics::gateway::CONNECTIONS_ACTIVE).set(count as f64);
}
#[cfg(not(feature = "metrics"))]
fn record_connections_active(_count: usize) {}

#[cfg(feature = "metrics")]
fn record_frame_received() {
    clara_metrics::counter!(clara_metrics::gateway::FRAMES_RECEIVED_TOTAL).increment(1);
}
#[cfg(not(feature = "metrics"))]
fn record_frame_received() {}

#[cfg(feature = "metrics")]
fn record_frame_sent() {
    clara_metrics::counter!(clara_metrics::gateway::FRAMES_SENT_TOTAL).increment(1);
}
#[cfg(not(feature = "metrics"))]
fn record_frame_sent() {}
