//! Session & Node Registry: connection lifecycle and reconnection with
//! session preservation.
//!
//! A node moved straight out of the live table on unregister would make
//! `is_reconnection` impossible to ever report true again for that session,
//! so this registry instead keeps a `preserved` table keyed by `session_id`,
//! letting a later REGISTER with the same `session_id` be correctly
//! reported as a reconnection.

mod registry;

pub use registry::{NodeRegistry, NodeSession, RegisterOutcome};
