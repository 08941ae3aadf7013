//! Durable outbound request queue.
//!
//! Wraps the pure [`OutboundQueue`] core with persistence, connectivity
//! observation, and the drain loop. Callers always submit through the
//! queue; the queue decides whether delivery happens now or after
//! connectivity returns.

use crate::connectivity::ConnectivityMonitor;
use crate::store::{MemoryStore, QueueStore};
use async_trait::async_trait;
use serde_json::Value;
use session_core::connection::reconnect_backoff;
use session_core::{EnqueueOutcome, OutboundQueue, RetryVerdict};
use session_types::{HttpMethod, QueuedRequest, RequestId};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Errors a delivery backend can report, grouped by what the queue should
/// do next.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The backend was unreachable. The request stays queued untouched and
    /// the drain stops until connectivity returns.
    #[error("delivery blocked by connectivity: {0}")]
    Connectivity(String),

    /// The backend answered with a retryable failure. The request's retry
    /// budget is charged.
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// The backend rejected the request for good. It is dropped and
    /// reported.
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

/// Delivers a queued request to the backend.
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Attempt delivery of one request.
    async fn deliver(&self, request: &QueuedRequest) -> Result<(), DeliveryError>;
}

/// Why a request left the queue without being delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Evicted as the oldest entry when the queue was full.
    Evicted,
    /// Retry budget exhausted after repeated transient failures.
    RetriesExhausted,
    /// The backend rejected the request permanently.
    Rejected,
}

/// A request the queue gave up on, surfaced to the embedding application.
#[derive(Debug, Clone)]
pub struct DroppedRequest {
    /// The request that was dropped.
    pub request: QueuedRequest,
    /// Why it was dropped.
    pub reason: DropReason,
}

/// Persistent FIFO queue with bounded capacity and retry budgets.
pub struct DurableQueue {
    inner: Mutex<OutboundQueue>,
    store: Mutex<Arc<dyn QueueStore>>,
    delivery: Arc<dyn Delivery>,
    connectivity: ConnectivityMonitor,
    drain_lock: Mutex<()>,
    redrain: Mutex<Option<JoinHandle<()>>>,
    dropped_tx: mpsc::UnboundedSender<DroppedRequest>,
    max_retries: u32,
}

impl DurableQueue {
    /// Create a queue. Returns the queue and the channel on which dropped
    /// requests are reported.
    pub fn new(
        capacity: usize,
        max_retries: u32,
        store: Arc<dyn QueueStore>,
        delivery: Arc<dyn Delivery>,
        connectivity: ConnectivityMonitor,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<DroppedRequest>) {
        let (dropped_tx, dropped_rx) = mpsc::unbounded_channel();
        let queue = Arc::new(Self {
            inner: Mutex::new(OutboundQueue::new(capacity)),
            store: Mutex::new(store),
            delivery,
            connectivity,
            drain_lock: Mutex::new(()),
            redrain: Mutex::new(None),
            dropped_tx,
            max_retries,
        });
        (queue, dropped_rx)
    }

    /// Restore pending entries from the store. A missing or unreadable
    /// snapshot starts the queue empty.
    pub async fn load(&self) -> usize {
        let store = self.store.lock().await.clone();
        let entries = match store.load().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "could not load queue snapshot, starting empty");
                Vec::new()
            }
        };
        let mut inner = self.inner.lock().await;
        let capacity = inner.capacity();
        *inner = OutboundQueue::restore(capacity, entries);
        let loaded = inner.len();
        if loaded > 0 {
            info!(pending = loaded, "restored queued requests");
        }
        loaded
    }

    /// Whether a submitted request will sit in the queue rather than be
    /// delivered immediately.
    pub fn should_queue(&self) -> bool {
        !self.connectivity.is_online()
    }

    /// Enqueue a request and, when online, drain immediately.
    pub async fn submit(self: &Arc<Self>, endpoint: impl Into<String>, method: HttpMethod, body: Value) {
        let request = QueuedRequest::new(endpoint, method, body, self.max_retries, now_ms());
        {
            let mut inner = self.inner.lock().await;
            if let EnqueueOutcome::AcceptedEvicted(evicted) = inner.push(request) {
                warn!(endpoint = %evicted.endpoint, "queue full, evicting oldest request");
                self.report_drop(evicted, DropReason::Evicted);
            }
        }
        self.persist().await;

        if !self.should_queue() {
            self.drain().await;
        }
    }

    /// Deliver pending requests in FIFO order until the queue is empty or
    /// delivery stalls. Concurrent calls collapse into the running drain.
    ///
    /// A transient failure leaves the request at the front and schedules a
    /// redrain after a backoff scaled by its retry count.
    pub async fn drain(self: &Arc<Self>) {
        let Ok(_guard) = self.drain_lock.try_lock() else {
            return;
        };

        loop {
            let request = {
                let inner = self.inner.lock().await;
                match inner.front() {
                    Some(request) => request.clone(),
                    None => break,
                }
            };

            match self.delivery.deliver(&request).await {
                Ok(()) => {
                    debug!(endpoint = %request.endpoint, "request delivered");
                    let mut inner = self.inner.lock().await;
                    Self::pop_if_front(&mut inner, request.id);
                    drop(inner);
                    self.persist().await;
                }
                Err(DeliveryError::Connectivity(reason)) => {
                    debug!(reason, "delivery blocked, pausing drain");
                    self.connectivity.set_online(false);
                    break;
                }
                Err(DeliveryError::Transient(reason)) => {
                    let mut inner = self.inner.lock().await;
                    // The front can have been evicted by a concurrent
                    // submit while delivery was in flight; only the
                    // request we actually sent is charged.
                    let Some(failed) = Self::pop_if_front(&mut inner, request.id) else {
                        drop(inner);
                        continue;
                    };
                    match inner.record_failure(failed) {
                        RetryVerdict::Retry(updated) => {
                            let attempt = updated.retry_count;
                            debug!(
                                endpoint = %updated.endpoint,
                                attempt,
                                reason,
                                "transient failure, will retry"
                            );
                            inner.push_front(updated);
                            drop(inner);
                            self.persist().await;
                            self.schedule_redrain(reconnect_backoff(attempt)).await;
                            break;
                        }
                        RetryVerdict::GiveUp(exhausted) => {
                            warn!(
                                endpoint = %exhausted.endpoint,
                                "retry budget exhausted, dropping request"
                            );
                            drop(inner);
                            self.report_drop(exhausted, DropReason::RetriesExhausted);
                            self.persist().await;
                        }
                    }
                }
                Err(DeliveryError::Permanent(reason)) => {
                    warn!(endpoint = %request.endpoint, reason, "request rejected, dropping");
                    let mut inner = self.inner.lock().await;
                    let popped = Self::pop_if_front(&mut inner, request.id);
                    drop(inner);
                    if popped.is_some() {
                        self.report_drop(request, DropReason::Rejected);
                    }
                    self.persist().await;
                }
            }
        }
    }

    /// Remove the front entry only if it is still the request that was
    /// delivered.
    fn pop_if_front(inner: &mut OutboundQueue, id: RequestId) -> Option<QueuedRequest> {
        if inner.front().map(|f| f.id) == Some(id) {
            inner.pop_front()
        } else {
            None
        }
    }

    /// Arrange a later drain attempt. A newer schedule replaces a pending
    /// one.
    async fn schedule_redrain(self: &Arc<Self>, delay: std::time::Duration) {
        let queue = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.drain_boxed().await;
        });
        if let Some(old) = self.redrain.lock().await.replace(handle) {
            old.abort();
        }
    }

    /// Boxed drain entry point for the redrain task; the drain can
    /// schedule another redrain, making the future type recursive.
    fn drain_boxed(
        self: Arc<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move { self.drain().await })
    }

    /// Spawn a task that drains the queue on every offline-to-online edge.
    pub fn watch_connectivity(self: &Arc<Self>) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        let mut rx = self.connectivity.subscribe();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                if *rx.borrow() {
                    debug!("connectivity restored, draining queue");
                    queue.drain().await;
                }
            }
        })
    }

    /// Number of pending requests.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Whether the queue is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    fn report_drop(&self, request: QueuedRequest, reason: DropReason) {
        // Receiver gone means the application stopped listening; nothing
        // more to do with the request either way.
        let _ = self.dropped_tx.send(DroppedRequest { request, reason });
    }

    async fn persist(&self) {
        let snapshot = self.inner.lock().await.snapshot();
        let store = self.store.lock().await.clone();
        if let Err(e) = store.save(&snapshot).await {
            warn!(error = %e, "queue persistence failed, degrading to in-memory");
            let fallback: Arc<dyn QueueStore> = Arc::new(MemoryStore::new());
            // Best effort; the fallback save cannot fail.
            let _ = fallback.save(&snapshot).await;
            *self.store.lock().await = fallback;
        }
    }
}

impl std::fmt::Debug for DurableQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableQueue")
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Delivery stub that plays back a script of results, recording the
    /// endpoints it was asked to deliver.
    #[derive(Default)]
    struct ScriptedDelivery {
        script: StdMutex<VecDeque<Result<(), DeliveryError>>>,
        delivered: StdMutex<Vec<String>>,
    }

    impl ScriptedDelivery {
        fn push_ok(&self) {
            self.script.lock().unwrap().push_back(Ok(()));
        }

        fn push_err(&self, error: DeliveryError) {
            self.script.lock().unwrap().push_back(Err(error));
        }

        fn attempts(&self) -> Vec<String> {
            self.delivered.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Delivery for ScriptedDelivery {
        async fn deliver(&self, request: &QueuedRequest) -> Result<(), DeliveryError> {
            self.delivered
                .lock()
                .unwrap()
                .push(request.endpoint.clone());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(()))
        }
    }

    struct FailingStore;

    #[async_trait]
    impl QueueStore for FailingStore {
        async fn load(&self) -> Result<Vec<QueuedRequest>, StoreError> {
            Err(std::io::Error::other("disk gone").into())
        }

        async fn save(&self, _entries: &[QueuedRequest]) -> Result<(), StoreError> {
            Err(std::io::Error::other("disk gone").into())
        }
    }

    fn make_queue(
        capacity: usize,
        max_retries: u32,
        delivery: Arc<ScriptedDelivery>,
        online: bool,
    ) -> (
        Arc<DurableQueue>,
        mpsc::UnboundedReceiver<DroppedRequest>,
        ConnectivityMonitor,
    ) {
        let connectivity = ConnectivityMonitor::new(online);
        let (queue, dropped) = DurableQueue::new(
            capacity,
            max_retries,
            Arc::new(MemoryStore::new()),
            delivery,
            connectivity.clone(),
        );
        (queue, dropped, connectivity)
    }

    #[tokio::test]
    async fn online_submit_delivers_immediately() {
        let delivery = Arc::new(ScriptedDelivery::default());
        let (queue, _dropped, _conn) = make_queue(10, 3, Arc::clone(&delivery), true);

        queue.submit("/api/events", HttpMethod::Post, json!({})).await;

        assert_eq!(delivery.attempts(), vec!["/api/events"]);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn offline_submit_queues_without_delivery() {
        let delivery = Arc::new(ScriptedDelivery::default());
        let (queue, _dropped, _conn) = make_queue(10, 3, Arc::clone(&delivery), false);

        queue.submit("/api/events", HttpMethod::Post, json!({})).await;

        assert!(delivery.attempts().is_empty());
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connectivity_edge_drains_queued_requests_in_order() {
        let delivery = Arc::new(ScriptedDelivery::default());
        let (queue, _dropped, connectivity) = make_queue(10, 3, Arc::clone(&delivery), false);

        queue.submit("/api/first", HttpMethod::Post, json!({})).await;
        queue.submit("/api/second", HttpMethod::Post, json!({})).await;
        let watcher = queue.watch_connectivity();

        connectivity.set_online(true);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(delivery.attempts(), vec!["/api/first", "/api/second"]);
        assert!(queue.is_empty().await);
        watcher.abort();
    }

    /// Delivery stub that, on its first call, stuffs the queue past
    /// capacity so the in-flight front entry gets evicted mid-delivery,
    /// then fails transiently.
    struct EvictingDelivery {
        queue: StdMutex<Option<Arc<DurableQueue>>>,
    }

    #[async_trait]
    impl Delivery for EvictingDelivery {
        async fn deliver(&self, _request: &QueuedRequest) -> Result<(), DeliveryError> {
            let target = self.queue.lock().unwrap().take();
            if let Some(queue) = target {
                queue.submit("/api/newer-a", HttpMethod::Post, json!({})).await;
                queue.submit("/api/newer-b", HttpMethod::Post, json!({})).await;
                return Err(DeliveryError::Transient("503".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_schedules_a_backoff_redrain() {
        let delivery = Arc::new(ScriptedDelivery::default());
        delivery.push_err(DeliveryError::Transient("503".to_string()));
        delivery.push_ok();
        let (queue, _dropped, _conn) = make_queue(10, 3, Arc::clone(&delivery), true);

        queue.submit("/api/flaky", HttpMethod::Post, json!({})).await;
        assert_eq!(delivery.attempts().len(), 1);
        assert_eq!(queue.len().await, 1);

        // No submit, no connectivity edge: the backoff timer alone must
        // bring the retry.
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;

        assert_eq!(delivery.attempts(), vec!["/api/flaky", "/api/flaky"]);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn should_queue_tracks_connectivity() {
        let delivery = Arc::new(ScriptedDelivery::default());
        let (queue, _dropped, connectivity) = make_queue(10, 3, delivery, false);

        assert!(queue.should_queue());
        connectivity.set_online(true);
        assert!(!queue.should_queue());
    }

    #[tokio::test]
    async fn eviction_during_delivery_does_not_charge_a_newer_request() {
        let delivery = Arc::new(EvictingDelivery {
            queue: StdMutex::new(None),
        });
        let connectivity = ConnectivityMonitor::new(true);
        let (queue, mut dropped) = DurableQueue::new(
            2,
            3,
            Arc::new(MemoryStore::new()),
            Arc::clone(&delivery) as Arc<dyn Delivery>,
            connectivity,
        );
        *delivery.queue.lock().unwrap() = Some(Arc::clone(&queue));

        queue.submit("/api/original", HttpMethod::Post, json!({})).await;

        // The original was evicted mid-delivery; its transient failure
        // must not pop or charge the newer entries, which then deliver.
        let report = dropped.try_recv().unwrap();
        assert_eq!(report.request.endpoint, "/api/original");
        assert_eq!(report.reason, DropReason::Evicted);
        assert!(dropped.try_recv().is_err(), "nothing else was dropped");
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn permanent_failure_drops_and_reports() {
        let delivery = Arc::new(ScriptedDelivery::default());
        delivery.push_err(DeliveryError::Permanent("422".to_string()));
        delivery.push_ok();
        let (queue, mut dropped, _conn) = make_queue(10, 3, Arc::clone(&delivery), true);

        queue.submit("/api/bad", HttpMethod::Post, json!({})).await;
        queue.submit("/api/good", HttpMethod::Post, json!({})).await;

        let report = dropped.try_recv().unwrap();
        assert_eq!(report.request.endpoint, "/api/bad");
        assert_eq!(report.reason, DropReason::Rejected);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn transient_failure_charges_retry_budget_then_gives_up() {
        let delivery = Arc::new(ScriptedDelivery::default());
        delivery.push_err(DeliveryError::Transient("503".to_string()));
        delivery.push_err(DeliveryError::Transient("503".to_string()));
        let (queue, mut dropped, _conn) = make_queue(10, 2, Arc::clone(&delivery), true);

        queue.submit("/api/flaky", HttpMethod::Post, json!({})).await;
        assert_eq!(queue.len().await, 1);

        queue.drain().await;

        let report = dropped.try_recv().unwrap();
        assert_eq!(report.reason, DropReason::RetriesExhausted);
        assert_eq!(report.request.retry_count, 2);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn connectivity_failure_keeps_request_and_flips_offline() {
        let delivery = Arc::new(ScriptedDelivery::default());
        delivery.push_err(DeliveryError::Connectivity("dns".to_string()));
        let (queue, _dropped, connectivity) = make_queue(10, 3, Arc::clone(&delivery), true);

        queue.submit("/api/events", HttpMethod::Post, json!({})).await;

        assert!(!connectivity.is_online());
        assert_eq!(queue.len().await, 1);
        // No retry budget burned on pure connectivity failures.
        let snapshot = queue.inner.lock().await.snapshot();
        assert_eq!(snapshot[0].retry_count, 0);
    }

    #[tokio::test]
    async fn full_queue_evicts_oldest_and_reports() {
        let delivery = Arc::new(ScriptedDelivery::default());
        let (queue, mut dropped, _conn) = make_queue(2, 3, delivery, false);

        queue.submit("/api/a", HttpMethod::Post, json!({})).await;
        queue.submit("/api/b", HttpMethod::Post, json!({})).await;
        queue.submit("/api/c", HttpMethod::Post, json!({})).await;

        let report = dropped.try_recv().unwrap();
        assert_eq!(report.request.endpoint, "/api/a");
        assert_eq!(report.reason, DropReason::Evicted);
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn pending_entries_survive_restart() {
        let store: Arc<dyn QueueStore> = Arc::new(MemoryStore::new());
        let delivery = Arc::new(ScriptedDelivery::default());
        let connectivity = ConnectivityMonitor::new(false);

        let (queue, _dropped) = DurableQueue::new(
            10,
            3,
            Arc::clone(&store),
            Arc::clone(&delivery) as Arc<dyn Delivery>,
            connectivity.clone(),
        );
        queue.submit("/api/persisted", HttpMethod::Post, json!({})).await;

        let (restarted, _dropped2) =
            DurableQueue::new(10, 3, store, delivery as Arc<dyn Delivery>, connectivity);
        assert_eq!(restarted.load().await, 1);
        assert_eq!(restarted.len().await, 1);
    }

    #[tokio::test]
    async fn store_failure_degrades_to_memory() {
        let delivery = Arc::new(ScriptedDelivery::default());
        let connectivity = ConnectivityMonitor::new(false);
        let (queue, _dropped) = DurableQueue::new(
            10,
            3,
            Arc::new(FailingStore),
            delivery,
            connectivity,
        );

        queue.submit("/api/a", HttpMethod::Post, json!({})).await;
        queue.submit("/api/b", HttpMethod::Post, json!({})).await;

        // Requests are still queued and persisted in the fallback store.
        assert_eq!(queue.len().await, 2);
        let store = queue.store.lock().await.clone();
        assert_eq!(store.load().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unreadable_snapshot_starts_empty() {
        let delivery = Arc::new(ScriptedDelivery::default());
        let connectivity = ConnectivityMonitor::new(false);
        let (queue, _dropped) =
            DurableQueue::new(10, 3, Arc::new(FailingStore), delivery, connectivity);

        assert_eq!(queue.load().await, 0);
        assert!(queue.is_empty().await);
    }
}
