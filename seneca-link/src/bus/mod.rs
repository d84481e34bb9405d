//! In-process event bus
//!
//! Fans events out to any number of subscribers. Each subscriber owns a
//! bounded queue; publishing never waits on a subscriber. A full queue drops
//! its oldest entry, and a subscriber that stays full without draining for
//! longer than the stall timeout is evicted.

mod filter;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use seneca_protocol::Event;

pub use filter::EventFilter;

/// Unique subscriber identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Get the raw value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Subscriber({})", self.0)
    }
}

/// Bus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Per-subscriber queue bound (default: 256)
    pub queue_capacity: usize,
    /// How long a full queue may go undrained before eviction (default: 60s)
    pub stall_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            stall_timeout_ms: 60_000,
        }
    }
}

impl BusConfig {
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }
}

/// Point-in-time bus counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub subscribers: usize,
    pub published: u64,
    pub dropped: u64,
    pub evicted: u64,
}

struct QueueState {
    events: VecDeque<Arc<Event>>,
    /// Last pop, or when the queue last went from empty to non-empty
    backlog_since: Instant,
}

struct SubscriberQueue {
    filter: EventFilter,
    capacity: usize,
    state: Mutex<QueueState>,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl SubscriberQueue {
    fn new(filter: EventFilter, capacity: usize) -> Self {
        Self {
            filter,
            capacity: capacity.max(1),
            state: Mutex::new(QueueState {
                events: VecDeque::with_capacity(capacity.clamp(1, 1024)),
                backlog_since: Instant::now(),
            }),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue, dropping the oldest entry if full. Returns
    /// `(dropped_one, stalled)`.
    fn push(&self, event: Arc<Event>, stall_timeout: Duration) -> (bool, bool) {
        let mut state = self.state.lock();
        let mut dropped = false;
        let mut stalled = false;

        if state.events.is_empty() {
            state.backlog_since = Instant::now();
        }
        if state.events.len() >= self.capacity {
            state.events.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            dropped = true;
            stalled = state.backlog_since.elapsed() >= stall_timeout;
        }
        state.events.push_back(event);
        drop(state);

        self.notify.notify_one();
        (dropped, stalled)
    }

    fn pop(&self) -> Option<Arc<Event>> {
        let mut state = self.state.lock();
        let event = state.events.pop_front();
        if event.is_some() {
            state.backlog_since = Instant::now();
        }
        event
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

struct BusInner {
    config: BusConfig,
    subscribers: DashMap<SubscriberId, Arc<SubscriberQueue>>,
    next_id: AtomicU64,
    published: AtomicU64,
    dropped: AtomicU64,
    evicted: AtomicU64,
}

impl BusInner {
    fn remove(&self, id: SubscriberId) -> bool {
        match self.subscribers.remove(&id) {
            Some((_, queue)) => {
                queue.close();
                true
            }
            None => false,
        }
    }
}

/// Publish/subscribe hub shared by producers and consumers
///
/// Cheap to clone; all clones share the same subscriber set.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.inner.subscribers.len())
            .finish()
    }
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                config,
                subscribers: DashMap::new(),
                next_id: AtomicU64::new(1),
                published: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                evicted: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe with a predicate evaluated at publish time
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let queue = Arc::new(SubscriberQueue::new(filter, self.inner.config.queue_capacity));
        self.inner.subscribers.insert(id, queue.clone());
        debug!("Registered {}", id);

        Subscription {
            id,
            queue,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscriber by id. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.inner.remove(id);
        if removed {
            debug!("Unregistered {}", id);
        }
        removed
    }

    /// Deliver an event to every matching subscriber without waiting
    ///
    /// Returns the number of subscribers the event was queued for.
    pub fn publish(&self, event: Event) -> usize {
        let event = Arc::new(event);
        let stall_timeout = self.inner.config.stall_timeout();
        let mut delivered = 0;
        let mut stalled = Vec::new();

        self.inner.published.fetch_add(1, Ordering::Relaxed);

        for entry in self.inner.subscribers.iter() {
            let queue = entry.value();
            if !queue.filter.matches(&event) {
                continue;
            }
            let (dropped, stall) = queue.push(event.clone(), stall_timeout);
            if dropped {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            }
            if stall {
                stalled.push(*entry.key());
            }
            delivered += 1;
        }

        // Removal happens after iteration so no shard lock is held
        for id in stalled {
            if self.inner.remove(id) {
                self.inner.evicted.fetch_add(1, Ordering::Relaxed);
                warn!("{} stopped draining its queue, evicted", id);
            }
        }

        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            subscribers: self.inner.subscribers.len(),
            published: self.inner.published.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            evicted: self.inner.evicted.load(Ordering::Relaxed),
        }
    }
}

/// Handle to one subscriber queue; dropping it unsubscribes
pub struct Subscription {
    id: SubscriberId,
    queue: Arc<SubscriberQueue>,
    bus: Weak<BusInner>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("queued", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next event. Returns `None` once the subscription has been
    /// closed (evicted or unsubscribed) and its queue is drained.
    pub async fn recv(&self) -> Option<Arc<Event>> {
        loop {
            if let Some(event) = self.queue.pop() {
                return Some(event);
            }
            if self.queue.is_closed() {
                return None;
            }
            self.queue.notify.notified().await;
        }
    }

    /// Take the next queued event without waiting
    pub fn try_recv(&self) -> Option<Arc<Event>> {
        self.queue.pop()
    }

    /// Events dropped from this queue because it was full
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.queue.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}
