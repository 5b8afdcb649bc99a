//! Gateway: the central WebSocket/HTTP server adapters connect to.
//!
//! Lifecycle:
//! 1. Load config, resolve shared secret and bind address
//! 2. Wire the Node Registry, Message Router, LLM Orchestrator, Adapter
//!    Supervisor, and Scheduler into one [`state::GatewayState`]
//! 3. Start the HTTP server (`/health`, `/ws`)
//! 4. Run the router's activation consumer alongside it, so debounce- and
//!    queue-promoted requests get processed even with no inbound traffic
//!
//! Tool execution, LLM calls, and adapter process supervision live in their
//! own crates; this crate is wire protocol, routing glue, and the event/hook
//! bus that ties them together for observability.

pub mod broadcast;
pub mod events;
pub mod hooks;
pub mod processor;
pub mod server;
pub mod state;
pub mod ws;

pub use events::{Event, EventEmitter, EventType};
pub use hooks::{Hook, HookManager, HookResult};
pub use server::{build_app, start_gateway};
pub use state::{ConnectedClient, GatewayState};
pub use ws::ConnectionRuntime;
