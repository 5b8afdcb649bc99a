//! Shared gateway runtime state, wired from the composing crates. No auth/
//! webauthn/pairing/sandbox layers — Clara Gateway's only collaborators
//! besides adapters are the session registry, message router, orchestrator,
//! supervisor, scheduler, events, and hooks composed below.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use clara_orchestrator::LlmOrchestrator;
use clara_routing::MessageRouter;
use clara_scheduler::Scheduler;
use clara_sessions::NodeRegistry;
use clara_supervisor::AdapterSupervisor;
use tokio::sync::{RwLock, mpsc};

use crate::events::EventEmitter;
use crate::hooks::HookManager;

/// A connected WebSocket client, keyed by `conn_id` in
/// [`GatewayState::clients`]. Not every client is a registered adapter node
/// (one hasn't sent REGISTER yet, or never will); `node_id` is set once
/// registration completes.
pub struct ConnectedClient {
    pub conn_id: u64,
    pub sender: mpsc::UnboundedSender<String>,
    pub node_id: Option<String>,
    pub connected_at: Instant,
}

impl ConnectedClient {
    /// Send a serialized frame to this client; `false` if its write loop
    /// has already exited.
    pub fn send(&self, frame: &str) -> bool {
        self.sender.send(frame.to_string()).is_ok()
    }
}

/// Shared gateway state, composing the Session & Node Registry, Message
/// Router, LLM Orchestrator, Adapter Supervisor, Scheduler, Event Emitter,
/// and Hook Manager behind a single `Arc` for use across connection tasks.
pub struct GatewayState {
    pub clients: RwLock<HashMap<u64, ConnectedClient>>,
    next_conn_id: AtomicU64,
    pub registry: NodeRegistry,
    pub router: MessageRouter,
    pub orchestrator: Arc<LlmOrchestrator>,
    pub supervisor: Arc<AdapterSupervisor>,
    pub scheduler: Arc<Scheduler>,
    pub events: EventEmitter,
    pub hooks: HookManager,
    pub shared_secret: Option<String>,
    pub started_at: Instant,
    message_count: AtomicU64,
}

impl GatewayState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        router: MessageRouter,
        orchestrator: Arc<LlmOrchestrator>,
        supervisor: Arc<AdapterSupervisor>,
        scheduler: Arc<Scheduler>,
        events: EventEmitter,
        hooks: HookManager,
        shared_secret: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            clients: RwLock::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
            registry: NodeRegistry::new(),
            router,
            orchestrator,
            supervisor,
            scheduler,
            events,
            hooks,
            shared_secret,
            started_at: Instant::now(),
            message_count: AtomicU64::new(0),
        })
    }

    pub fn next_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn record_message(&self) -> u64 {
        self.message_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub async fn register_client(&self, client: ConnectedClient) {
        self.clients.write().await.insert(client.conn_id, client);
    }

    pub async fn set_client_node(&self, conn_id: u64, node_id: String) {
        if let Some(client) = self.clients.write().await.get_mut(&conn_id) {
            client.node_id = Some(node_id);
        }
    }

    pub async fn set_client_node_none(&self, conn_id: u64) {
        if let Some(client) = self.clients.write().await.get_mut(&conn_id) {
            client.node_id = None;
        }
    }

    pub async fn remove_client(&self, conn_id: u64) -> Option<ConnectedClient> {
        self.clients.write().await.remove(&conn_id)
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
