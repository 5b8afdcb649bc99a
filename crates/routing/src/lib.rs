//! Message Router: per-channel serialization, deduplication, debounce,
//! batching, and cancellation. The hardest core subsystem.
//!
//! Debounce state is one small task per debouncing channel, selecting over
//! timer-expiry, new-message, and cancel; a generation counter invalidates
//! a stale sleeping task without needing to cancel it directly.

mod dedup;
mod router;
mod types;

pub use dedup::DedupeCache;
pub use router::MessageRouter;
pub use types::{ActivatedRequest, RequestStatus, SubmitOutcome, SubmitRequest};
