use serde_json::Map;
use serde_json::Value;

/// Lifecycle status of a single inbound request, per §3 of the
/// specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Debounce,
    Queued,
    Active,
    Completed,
    Cancelled,
    Failed,
}

/// One inbound `MESSAGE`, as submitted to the router.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub request_id: String,
    pub channel_id: String,
    pub user_id: String,
    pub content: String,
    /// Direct mentions and DMs bypass debounce entirely.
    pub bypass_debounce: bool,
    /// May be merged with adjacent peers on dequeue via `complete_batch`.
    pub is_batchable: bool,
    pub reply_to: Option<String>,
    pub attachments: Vec<Value>,
    pub tier_override: Option<String>,
    pub metadata: Map<String, Value>,
}

/// Result of [`crate::MessageRouter::submit`].
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// Fingerprint seen within the dedup window; not accepted.
    Duplicate,
    /// Added to (or started) the channel's debounce list.
    Debounced,
    /// Enqueued behind a busy channel, 1-indexed position.
    Queued { position: usize },
    /// Acquired the channel immediately; ready to process.
    Active(ActivatedRequest),
}

/// A request that has transitioned to ACTIVE, whether by immediate
/// acquisition, debounce-timer consolidation, or queue-head promotion.
#[derive(Debug, Clone)]
pub struct ActivatedRequest {
    /// The ID the adapter should see in `RESPONSE_*` frames: for a
    /// debounce-consolidated group this is the *first* message's ID.
    pub request_id: String,
    pub channel_id: String,
    pub user_id: String,
    /// Consolidated (debounce) or batched (complete_batch) content,
    /// newline-joined in arrival order.
    pub content: String,
    pub reply_to: Option<String>,
    pub attachments: Vec<Value>,
    pub tier_override: Option<String>,
    pub metadata: Map<String, Value>,
    /// Other request ids absorbed into this one (debounce consolidation or
    /// batching); they transition to COMPLETED, not processed individually.
    pub absorbed_ids: Vec<String>,
}
