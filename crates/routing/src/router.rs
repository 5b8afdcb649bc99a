use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use clara_common::{GatewayError, GatewayResult, now_ms};
use tokio::sync::{Mutex, mpsc};

use crate::dedup::{DedupeCache, fingerprint};
use crate::types::{ActivatedRequest, RequestStatus, SubmitOutcome, SubmitRequest};

struct QueuedRequest {
    req: SubmitRequest,
}

struct ActiveRequest {
    request_id: String,
    /// Other request ids sharing this active slot, from a batch.
    batched_ids: Vec<String>,
}

struct DebounceEntry {
    messages: Vec<SubmitRequest>,
    generation: u64,
}

struct Inner {
    active: HashMap<String, ActiveRequest>,
    queues: HashMap<String, VecDeque<QueuedRequest>>,
    debounce: HashMap<String, DebounceEntry>,
    status: HashMap<String, RequestStatus>,
    /// request_id -> channel_id, so `complete`/`cancel` don't need the
    /// caller to remember which channel a request belongs to.
    channel_of: HashMap<String, String>,
    dedupe: DedupeCache,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            active: HashMap::new(),
            queues: HashMap::new(),
            debounce: HashMap::new(),
            status: HashMap::new(),
            channel_of: HashMap::new(),
            dedupe: DedupeCache::default(),
        }
    }
}

/// The Message Router. Cheap to clone; all state lives behind a single
/// `Arc<Mutex<Inner>>` — the dedup cache, request status table, active map,
/// queue table, and debounce table are all modified only under that one
/// lock, so there's no cross-structure races to reason about.
#[derive(Clone)]
pub struct MessageRouter {
    inner: Arc<Mutex<Inner>>,
    debounce_window: Duration,
    activated_tx: mpsc::UnboundedSender<ActivatedRequest>,
}

impl MessageRouter {
    /// Returns the router and the receiving half of the "requests that
    /// became ACTIVE asynchronously" channel (debounce-timer consolidation,
    /// and queue-head promotion on `complete`). Synchronous activation from
    /// `submit` itself is returned directly as `SubmitOutcome::Active` and
    /// is *not* duplicated onto this channel.
    pub fn new(debounce_window: Duration) -> (Self, mpsc::UnboundedReceiver<ActivatedRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                inner: Arc::new(Mutex::new(Inner::default())),
                debounce_window,
                activated_tx: tx,
            },
            rx,
        )
    }

    pub async fn submit(&self, req: SubmitRequest) -> SubmitOutcome {
        let fp = fingerprint(&req.user_id, &req.channel_id, &req.content);
        let now = now_ms();

        let mut inner = self.inner.lock().await;
        if !inner.dedupe.check_and_insert(&fp, now) {
            record_dedupe_rejected();
            return SubmitOutcome::Duplicate;
        }

        if !req.bypass_debounce && !inner.active.contains_key(&req.channel_id) {
            return self.enqueue_debounce(&mut inner, req);
        }

        if inner.active.contains_key(&req.channel_id) {
            inner
                .status
                .insert(req.request_id.clone(), RequestStatus::Queued);
            inner
                .channel_of
                .insert(req.request_id.clone(), req.channel_id.clone());
            let queue = inner.queues.entry(req.channel_id.clone()).or_default();
            queue.push_back(QueuedRequest { req });
            record_queued();
            return SubmitOutcome::Queued {
                position: queue.len(),
            };
        }

        let activated = self.activate(&mut inner, req, Vec::new());
        record_active_requests(inner.active.len());
        SubmitOutcome::Active(activated)
    }

    fn enqueue_debounce(&self, inner: &mut Inner, req: SubmitRequest) -> SubmitOutcome {
        inner
            .status
            .insert(req.request_id.clone(), RequestStatus::Debounce);
        inner
            .channel_of
            .insert(req.request_id.clone(), req.channel_id.clone());

        let channel_id = req.channel_id.clone();
        let entry = inner
            .debounce
            .entry(channel_id.clone())
            .or_insert_with(|| DebounceEntry {
                messages: Vec::new(),
                generation: 0,
            });
        entry.messages.push(req);
        entry.generation += 1;
        let generation = entry.generation;

        let router = self.clone();
        let window = self.debounce_window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            router.expire_debounce(&channel_id, generation).await;
        });

        SubmitOutcome::Debounced
    }

    async fn expire_debounce(&self, channel_id: &str, generation: u64) {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.debounce.get(channel_id) else {
            return;
        };
        if entry.generation != generation {
            // A later message reset the timer; that spawn will fire later.
            return;
        }
        let entry = inner.debounce.remove(channel_id).expect("just checked");
        let Some((first, rest)) = entry.messages.split_first() else {
            return;
        };

        let mut consolidated = first.clone();
        for extra in rest {
            if !extra.content.is_empty() {
                consolidated.content.push('\n');
                consolidated.content.push_str(&extra.content);
            }
            // Latest message's reply chain/attachments/metadata/tier win.
            consolidated.reply_to = extra.reply_to.clone();
            consolidated.attachments = extra.attachments.clone();
            consolidated.metadata = extra.metadata.clone();
            consolidated.tier_override = extra.tier_override.clone();
        }
        let absorbed_ids: Vec<String> = rest.iter().map(|m| m.request_id.clone()).collect();
        for id in &absorbed_ids {
            inner.status.insert(id.clone(), RequestStatus::Completed);
        }

        if inner.active.contains_key(channel_id) {
            // Raced with another channel becoming active between this
            // timer firing and the lock being taken; fall back to queueing.
            inner
                .status
                .insert(consolidated.request_id.clone(), RequestStatus::Queued);
            let queue = inner.queues.entry(channel_id.to_string()).or_default();
            queue.push_back(QueuedRequest { req: consolidated });
            return;
        }

        let activated = self.activate(&mut inner, consolidated, absorbed_ids);
        record_debounce_flushed();
        record_active_requests(inner.active.len());
        let _ = self.activated_tx.send(activated);
    }

    fn activate(
        &self,
        inner: &mut Inner,
        req: SubmitRequest,
        absorbed_ids: Vec<String>,
    ) -> ActivatedRequest {
        inner.status.insert(req.request_id.clone(), RequestStatus::Active);
        inner.active.insert(
            req.channel_id.clone(),
            ActiveRequest {
                request_id: req.request_id.clone(),
                batched_ids: Vec::new(),
            },
        );
        ActivatedRequest {
            request_id: req.request_id,
            channel_id: req.channel_id,
            user_id: req.user_id,
            content: req.content,
            reply_to: req.reply_to,
            attachments: req.attachments,
            tier_override: req.tier_override,
            metadata: req.metadata,
            absorbed_ids,
        }
    }

    /// A request reached a terminal state. Releases the channel and
    /// promotes the queue head, if any, to ACTIVE.
    pub async fn complete(&self, request_id: &str, status: RequestStatus) {
        let mut inner = self.inner.lock().await;
        inner.status.insert(request_id.to_string(), status);
        let Some(channel_id) = inner.channel_of.get(request_id).cloned() else {
            return;
        };

        let Some(active) = inner.active.get(&channel_id) else {
            return;
        };
        if active.request_id != request_id && !active.batched_ids.contains(&request_id.to_string())
        {
            return;
        }
        inner.active.remove(&channel_id);
        record_active_requests(inner.active.len());

        let Some(next) = inner
            .queues
            .get_mut(&channel_id)
            .and_then(VecDeque::pop_front)
        else {
            return;
        };
        let activated = self.activate(&mut inner, next.req, Vec::new());
        record_active_requests(inner.active.len());
        let _ = self.activated_tx.send(activated);
    }

    /// Like [`Self::complete`], but pops every *consecutive* batchable
    /// request from the queue head into one shared active slot.
    pub async fn complete_batch(&self, request_id: &str, status: RequestStatus) {
        let mut inner = self.inner.lock().await;
        inner.status.insert(request_id.to_string(), status);
        let Some(channel_id) = inner.channel_of.get(request_id).cloned() else {
            return;
        };
        inner.active.remove(&channel_id);

        let mut batch = Vec::new();
        if let Some(queue) = inner.queues.get_mut(&channel_id) {
            while let Some(front) = queue.front() {
                if !front.req.is_batchable {
                    break;
                }
                batch.push(queue.pop_front().expect("front just peeked").req);
            }
        }
        let Some(last) = batch.pop() else {
            return;
        };
        let batched_ids: Vec<String> = batch.iter().map(|r| r.request_id.clone()).collect();
        for id in &batched_ids {
            inner.status.insert(id.clone(), RequestStatus::Completed);
        }

        inner.status.insert(last.request_id.clone(), RequestStatus::Active);
        inner.active.insert(
            channel_id,
            ActiveRequest {
                request_id: last.request_id.clone(),
                batched_ids: batched_ids.clone(),
            },
        );
        let activated = ActivatedRequest {
            request_id: last.request_id,
            channel_id: last.channel_id,
            user_id: last.user_id,
            content: last.content,
            reply_to: last.reply_to,
            attachments: last.attachments,
            tier_override: last.tier_override,
            metadata: last.metadata,
            absorbed_ids: batched_ids,
        };
        let _ = self.activated_tx.send(activated);
    }

    /// Cancel one request, wherever it currently lives. Returns an error if
    /// it is already terminal or unknown, matching the `not_found` error
    /// code and the "cancel of an already-terminal request has no side
    /// effects" invariant.
    pub async fn cancel(&self, request_id: &str) -> GatewayResult<()> {
        let mut inner = self.inner.lock().await;
        let Some(&status) = inner.status.get(request_id) else {
            return Err(GatewayError::NotFound(request_id.to_string()));
        };
        if matches!(
            status,
            RequestStatus::Completed | RequestStatus::Cancelled | RequestStatus::Failed
        ) {
            return Err(GatewayError::NotFound(request_id.to_string()));
        }

        let Some(channel_id) = inner.channel_of.get(request_id).cloned() else {
            return Err(GatewayError::NotFound(request_id.to_string()));
        };

        if let Some(queue) = inner.queues.get_mut(&channel_id) {
            queue.retain(|q| q.req.request_id != request_id);
        }
        if let Some(entry) = inner.debounce.get_mut(&channel_id) {
            entry.messages.retain(|m| m.request_id != request_id);
            entry.generation += 1;
        }
        if let Some(active) = inner.active.get(&channel_id)
            && active.request_id == request_id
        {
            inner.active.remove(&channel_id);
        }
        inner
            .status
            .insert(request_id.to_string(), RequestStatus::Cancelled);
        Ok(())
    }

    /// Cancel everything in flight for a channel: debounce list, active
    /// request, and every queued entry.
    pub async fn cancel_channel(&self, channel_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.debounce.remove(channel_id) {
            for m in entry.messages {
                inner
                    .status
                    .insert(m.request_id, RequestStatus::Cancelled);
            }
        }
        if let Some(active) = inner.active.remove(channel_id) {
            inner
                .status
                .insert(active.request_id, RequestStatus::Cancelled);
            for id in active.batched_ids {
                inner.status.insert(id, RequestStatus::Cancelled);
            }
        }
        if let Some(queue) = inner.queues.remove(channel_id) {
            for q in queue {
                inner
                    .status
                    .insert(q.req.request_id, RequestStatus::Cancelled);
            }
        }
    }

    pub async fn status_of(&self, request_id: &str) -> Option<RequestStatus> {
        self.inner.lock().await.status.get(request_id).copied()
    }

    pub async fn active_count(&self) -> usize {
        self.inner.lock().await.active.len()
    }

    pub async fn queue_length(&self, channel_id: &str) -> usize {
        self.inner
            .lock()
            .await
            .queues
            .get(channel_id)
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

#[cfg(feature = "metrics")]
fn record_active_requests(count: usize) {
    clara_metrics::gauge!(clara_metrics::router::ACTIVE_REQUESTS).set(count as f64);
}
#[cfg(not(feature = "metrics"))]
fn record_active_requests(_count: usize) {}

#[cfg(feature = "metrics")]
fn record_queued() {
    clara_metrics::counter!(clara_metrics::router::QUEUED_TOTAL).increment(1);
}
#[cfg(not(feature = "metrics"))]
fn record_queued() {}

#[cfg(feature = "metrics")]
fn record_dedupe_rejected() {
    clara_metrics::counter!(clara_metrics::router::DEDUPE_REJECTED_TOTAL).increment(1);
}
#[cfg(not(feature = "metrics"))]
fn record_dedupe_rejected() {}

#[cfg(feature = "metrics")]
fn record_debounce_flushed() {
    clara_metrics::counter!(clara_metrics::router::DEBOUNCE_FLUSHED_TOTAL).increment(1);
}
#[cfg(not(feature = "metrics"))]
fn record_debounce_flushed() {}

impl Clone for SubmitRequest {
    fn clone(&self) -> Self {
        Self {
            request_id: self.request_id.clone(),
            channel_id: self.channel_id.clone(),
            user_id: self.user_id.clone(),
            content: self.content.clone(),
            bypass_debounce: self.bypass_debounce,
            is_batchable: self.is_batchable,
            reply_to: self.reply_to.clone(),
            attachments: self.attachments.clone(),
            tier_override: self.tier_override.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(id: &str, channel: &str, content: &str) -> SubmitRequest {
        SubmitRequest {
            request_id: id.to_string(),
            channel_id: channel.to_string(),
            user_id: "user-1".to_string(),
            content: content.to_string(),
            bypass_debounce: true,
            is_batchable: false,
            reply_to: None,
            attachments: Vec::new(),
            tier_override: None,
            metadata: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn first_submission_on_idle_channel_activates_immediately() {
        let (router, _rx) = MessageRouter::new(Duration::from_millis(50));
        let outcome = router.submit(req("m1", "c1", "hi")).await;
        assert!(matches!(outcome, SubmitOutcome::Active(_)));
    }

    #[tokio::test]
    async fn second_submission_on_busy_channel_queues() {
        let (router, _rx) = MessageRouter::new(Duration::from_millis(50));
        router.submit(req("m1", "c1", "hi")).await;
        let outcome = router.submit(req("m2", "c1", "again")).await;
        assert!(matches!(outcome, SubmitOutcome::Queued { position: 1 }));
    }

    #[tokio::test]
    async fn duplicate_within_window_is_rejected() {
        let (router, _rx) = MessageRouter::new(Duration::from_millis(50));
        router.submit(req("m1", "c1", "hi")).await;
        let outcome = router.submit(req("m2", "c1", "hi")).await;
        assert!(matches!(outcome, SubmitOutcome::Duplicate));
    }

    #[tokio::test]
    async fn complete_promotes_queue_head() {
        let (router, mut rx) = MessageRouter::new(Duration::from_millis(50));
        router.submit(req("m1", "c1", "hi")).await;
        router.submit(req("m2", "c1", "next")).await;
        router.complete("m1", RequestStatus::Completed).await;
        let activated = rx.recv().await.expect("m2 should activate");
        assert_eq!(activated.request_id, "m2");
    }

    #[tokio::test]
    async fn debounce_consolidates_burst_into_one_request() {
        let (router, mut rx) = MessageRouter::new(Duration::from_millis(30));
        let mut m1 = req("m1", "c1", "I was thinking");
        m1.bypass_debounce = false;
        let mut m2 = req("m2", "c1", "about the project");
        m2.bypass_debounce = false;
        let mut m3 = req("m3", "c1", "what do you think?");
        m3.bypass_debounce = false;

        assert!(matches!(
            router.submit(m1).await,
            SubmitOutcome::Debounced
        ));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(matches!(
            router.submit(m2).await,
            SubmitOutcome::Debounced
        ));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(matches!(
            router.submit(m3).await,
            SubmitOutcome::Debounced
        ));

        let activated = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("should fire")
            .expect("channel open");
        assert_eq!(activated.request_id, "m1");
        assert_eq!(
            activated.content,
            "I was thinking\nabout the project\nwhat do you think?"
        );
        assert_eq!(router.status_of("m2").await, Some(RequestStatus::Completed));
        assert_eq!(router.status_of("m3").await, Some(RequestStatus::Completed));
    }

    #[tokio::test]
    async fn cancel_of_terminal_request_is_not_found() {
        let (router, _rx) = MessageRouter::new(Duration::from_millis(50));
        router.submit(req("m1", "c1", "hi")).await;
        router.complete("m1", RequestStatus::Completed).await;
        assert!(router.cancel("m1").await.is_err());
    }

    #[tokio::test]
    async fn cancel_queued_request_releases_its_slot() {
        let (router, _rx) = MessageRouter::new(Duration::from_millis(50));
        router.submit(req("m1", "c1", "hi")).await;
        router.submit(req("m2", "c1", "queued")).await;
        router.cancel("m2").await.expect("m2 is queued");
        assert_eq!(router.status_of("m2").await, Some(RequestStatus::Cancelled));
        assert_eq!(router.queue_length("c1").await, 0);
    }
}
