//! LLM Orchestrator: the multi-turn tool-calling loop that turns an
//! `ActivatedRequest` (paired with this crate at the gateway layer) into a
//! stream of response events.
//!
//! A plain iteration bound by `MAX_TOOL_ITERATIONS`, with a typed event enum
//! describing each step, rather than open-ended recursion over untyped
//! payloads.

mod auto_continue;
mod events;
mod messages;
mod orchestrator;

pub use auto_continue::should_auto_continue;
pub use events::OrchestratorEvent;
pub use messages::Message;
pub use orchestrator::{GenerateRequest, LlmOrchestrator, OrchestratorError};
