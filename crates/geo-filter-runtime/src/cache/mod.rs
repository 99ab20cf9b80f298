//! Author → classification cache with deduplicated cross-context lookups.
//!
//! ## Invariants
//!
//! - An author is either cached, in flight, or neither; never both.
//! - At most one lookup per author is outstanding. A second caller for an
//!   in-flight author gets `None` immediately instead of waiting.
//! - Exactly one pending entry exists per outstanding request id, removed by
//!   whichever comes first: the matching response or the timeout.
//!
//! All state sits behind one synchronous mutex that is never held across an
//! await point, so a snapshot always observes a consistent mapping.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

use geo_filter::{
    load_snapshot, save_snapshot, AuthorId, GeoClassification, KeyValueStore, LocationSnapshot,
};

use crate::transport::{Endpoint, MessageReceiver, MessageSender};
use crate::types::{BridgeMessage, LookupRequest, LookupResponse, RuntimeResult};

/// Detailed outcome of one resolve call.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Served from memory without a lookup.
    Cached(GeoClassification),
    /// Resolved by a lookup issued for this call.
    Resolved(GeoClassification),
    /// Another lookup for this author is already in flight.
    Coalesced,
    /// The bridge reported a failure.
    Failed(String),
    /// No response arrived within the lookup budget.
    TimedOut,
    /// The request could not be dispatched (bridge gone).
    Unavailable,
}

impl Resolution {
    /// Collapse to the fail-open view: anything but a classification is `None`.
    pub fn into_classification(self) -> Option<GeoClassification> {
        match self {
            Resolution::Cached(c) | Resolution::Resolved(c) => Some(c),
            _ => None,
        }
    }
}

type Reply = Result<GeoClassification, String>;

struct PendingRequest {
    author: AuthorId,
    reply: oneshot::Sender<Reply>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<AuthorId, GeoClassification>,
    in_flight: HashSet<AuthorId>,
    pending: HashMap<u64, PendingRequest>,
}

/// Counters for status output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub in_flight: usize,
    pub pending: usize,
    pub requests_sent: u64,
}

/// Resolution cache owning the consuming side of the lookup channel.
pub struct ResolutionCache {
    state: Mutex<CacheState>,
    next_request_id: AtomicU64,
    outbound: MessageSender,
    timeout: Duration,
}

impl ResolutionCache {
    /// Create a cache that dispatches requests through `outbound`. Responses
    /// must be fed back with [`ResolutionCache::handle_message`].
    pub fn new(outbound: MessageSender, timeout: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            next_request_id: AtomicU64::new(0),
            outbound,
            timeout,
        }
    }

    /// Create a cache bound to an endpoint and start consuming its responses.
    pub fn connect(endpoint: Endpoint, timeout: Duration) -> (Arc<Self>, JoinHandle<()>) {
        let (outbound, inbound) = endpoint.split();
        let cache = Arc::new(Self::new(outbound, timeout));
        let receiver = Arc::clone(&cache).spawn_receiver(inbound);
        (cache, receiver)
    }

    /// Resolve an author, or `None` if unavailable for any reason.
    pub async fn resolve(&self, author: &AuthorId) -> Option<GeoClassification> {
        self.resolve_detailed(author).await.into_classification()
    }

    /// Resolve an author, reporting why no classification was produced.
    pub async fn resolve_detailed(&self, author: &AuthorId) -> Resolution {
        let (request_id, mut reply) = {
            let mut state = self.lock();
            if let Some(entry) = state.entries.get(author) {
                return Resolution::Cached(entry.clone());
            }
            if state.in_flight.contains(author) {
                tracing::debug!("Lookup for {author} already in flight");
                return Resolution::Coalesced;
            }

            let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst) + 1;
            let (tx, rx) = oneshot::channel();
            state.in_flight.insert(author.clone());
            state.pending.insert(
                request_id,
                PendingRequest {
                    author: author.clone(),
                    reply: tx,
                },
            );
            (request_id, rx)
        };

        let request = BridgeMessage::LookupRequest(LookupRequest {
            request_id,
            author_id: author.clone(),
        });
        if let Err(e) = self.outbound.send(&request) {
            tracing::warn!("Failed to dispatch lookup for {author}: {e}");
            self.abandon(request_id);
            return Resolution::Unavailable;
        }

        match tokio::time::timeout(self.timeout, &mut reply).await {
            Ok(Ok(Ok(classification))) => Resolution::Resolved(classification),
            Ok(Ok(Err(message))) => Resolution::Failed(message),
            Ok(Err(_)) => Resolution::Unavailable,
            Err(_) => {
                if self.abandon(request_id) {
                    tracing::warn!("Timeout fetching location for {author}");
                    return Resolution::TimedOut;
                }
                // The response won the race against the timer. Its handler
                // owns the sender now and will send or drop it.
                match reply.await {
                    Ok(Ok(classification)) => Resolution::Resolved(classification),
                    Ok(Err(message)) => Resolution::Failed(message),
                    Err(_) => Resolution::TimedOut,
                }
            }
        }
    }

    /// Route one inbound message. Requests are not expected on this side.
    pub fn handle_message(&self, message: BridgeMessage) {
        match message {
            BridgeMessage::LookupResponse(response) => self.handle_response(response),
            BridgeMessage::LookupRequest(request) => {
                tracing::warn!(
                    "Ignoring LookupRequest {} sent to the consuming side",
                    request.request_id
                );
            }
        }
    }

    /// Complete the pending request matching `response.request_id`.
    ///
    /// Responses for unknown or already timed-out ids are dropped.
    pub fn handle_response(&self, response: LookupResponse) {
        let mut state = self.lock();
        let Some(pending) = state.pending.remove(&response.request_id) else {
            tracing::debug!("Dropping stale response {}", response.request_id);
            return;
        };
        state.in_flight.remove(&pending.author);

        if pending.author != response.author_id {
            tracing::warn!(
                "Response {} names {} but was issued for {}",
                response.request_id,
                response.author_id,
                pending.author
            );
        }

        let reply = match (response.success, response.raw_location_text) {
            (true, Some(text)) => {
                let classification = GeoClassification::from_location_text(text, Utc::now());
                state
                    .entries
                    .insert(pending.author.clone(), classification.clone());
                Ok(classification)
            }
            (_, _) => {
                let message = response
                    .error_message
                    .unwrap_or_else(|| "Lookup failed".to_string());
                tracing::warn!("Failed to get location for {}: {message}", pending.author);
                Err(message)
            }
        };
        drop(state);

        // The caller may have given up already; nothing to do then.
        let _ = pending.reply.send(reply);
    }

    /// Consume responses from the bridge until the channel closes.
    pub fn spawn_receiver(self: Arc<Self>, mut inbound: MessageReceiver) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                match message {
                    Ok(message) => self.handle_message(message),
                    Err(e) => tracing::warn!("Dropping malformed bridge message: {e}"),
                }
            }
            tracing::info!("Bridge channel closed");
        })
    }

    /// Cached classification, without dispatching anything.
    pub fn get(&self, author: &AuthorId) -> Option<GeoClassification> {
        self.lock().entries.get(author).cloned()
    }

    pub fn is_in_flight(&self, author: &AuthorId) -> bool {
        self.lock().in_flight.contains(author)
    }

    /// True when no lookup is outstanding.
    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.in_flight.is_empty() && state.pending.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entries.len(),
            in_flight: state.in_flight.len(),
            pending: state.pending.len(),
            requests_sent: self.next_request_id.load(Ordering::SeqCst),
        }
    }

    /// Consistent copy of every cached entry.
    pub fn snapshot(&self) -> LocationSnapshot {
        self.lock()
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Merge a stored snapshot. Entries already resolved this session and
    /// authors currently in flight keep their live state. Returns the number
    /// of entries added.
    pub fn rehydrate(&self, snapshot: LocationSnapshot) -> usize {
        let mut state = self.lock();
        let mut added = 0;
        for (author, classification) in snapshot {
            if state.in_flight.contains(&author) || state.entries.contains_key(&author) {
                continue;
            }
            state.entries.insert(author, classification);
            added += 1;
        }
        added
    }

    /// Load and merge the snapshot held in `store`.
    pub async fn restore(&self, store: &dyn KeyValueStore) -> RuntimeResult<usize> {
        let snapshot = load_snapshot(store).await?;
        let added = self.rehydrate(snapshot);
        tracing::info!("Rehydrated {added} cached locations");
        Ok(added)
    }

    /// Write the current mapping to `store`.
    pub async fn persist(&self, store: &dyn KeyValueStore) -> RuntimeResult<()> {
        let snapshot = self.snapshot();
        save_snapshot(store, &snapshot).await?;
        tracing::debug!("Persisted {} cached locations", snapshot.len());
        Ok(())
    }

    /// Persist every `every` until `shutdown` is notified.
    pub fn spawn_snapshot_task(
        self: &Arc<Self>,
        store: Arc<dyn KeyValueStore>,
        every: Duration,
        shutdown: Arc<Notify>,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            loop {
                tokio::select! {
                    _ = shutdown.notified() => {
                        tracing::debug!("Snapshot loop stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = cache.persist(store.as_ref()).await {
                            tracing::error!("Failed to persist location cache: {e}");
                        }
                    }
                }
            }
        })
    }

    /// Drop a pending request and its in-flight marker. Returns false if a
    /// response already consumed it.
    fn abandon(&self, request_id: u64) -> bool {
        let mut state = self.lock();
        match state.pending.remove(&request_id) {
            Some(pending) => {
                state.in_flight.remove(&pending.author);
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // Nothing panics while holding the lock; recover the data if it ever does.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
