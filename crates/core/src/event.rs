//! Run events and the broadcaster that fans them out to observers.
//!
//! Every state transition of a run emits a [`RunEvent`]. Any number of
//! observers (a live dashboard, the CLI's `--show-events`, tests) can
//! subscribe concurrently; publishing never waits on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, warn};
use uuid::Uuid;

/// Unique identifier for one run of the reasoning loop.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a run event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Raw model output for one THINKING step
    Thought,
    /// A resolved tool request about to be dispatched
    Action,
    /// A tool result, or a synthetic corrective observation
    Observation,
    /// The run accepted a final answer
    Finish,
    /// The run failed
    Error,
}

impl EventKind {
    /// Wire name (also used as the SSE event name).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Thought => "thought",
            Self::Action => "action",
            Self::Observation => "observation",
            Self::Finish => "finish",
            Self::Error => "error",
        }
    }

    /// Whether this kind ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish | Self::Error)
    }
}

/// A single progress record for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub execution_id: ExecutionId,
    /// Generation order within the run, starting at 0.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub payload: serde_json::Value,
}

impl RunEvent {
    pub fn new(
        execution_id: ExecutionId,
        sequence: u64,
        kind: EventKind,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            execution_id,
            sequence,
            timestamp: Utc::now(),
            kind,
            payload,
        }
    }
}

struct Registry {
    history: VecDeque<Arc<RunEvent>>,
    history_limit: usize,
    subscribers: HashSet<u64>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A broadcast-based fan-out of run events.
///
/// Uses `tokio::sync::broadcast`, so each subscriber owns a bounded
/// queue: a subscriber that falls behind loses its oldest events and
/// keeps receiving, and a publisher never blocks. A short history ring
/// gives new subscribers a best-effort snapshot of recent activity.
pub struct EventBroadcaster {
    sender: broadcast::Sender<Arc<RunEvent>>,
    registry: Arc<Mutex<Registry>>,
    next_id: AtomicU64,
}

impl EventBroadcaster {
    /// Create a broadcaster with a per-subscriber queue `capacity` and a
    /// replay history of `history` events.
    pub fn new(capacity: usize, history: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            registry: Arc::new(Mutex::new(Registry {
                history: VecDeque::with_capacity(history),
                history_limit: history,
                subscribers: HashSet::new(),
            })),
            next_id: AtomicU64::new(0),
        }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: RunEvent) {
        let event = Arc::new(event);
        let mut registry = lock(&self.registry);
        if registry.history_limit > 0 {
            if registry.history.len() == registry.history_limit {
                registry.history.pop_front();
            }
            registry.history.push_back(Arc::clone(&event));
        }
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events published from now on.
    ///
    /// The snapshot and the live receiver are taken under the same lock,
    /// so no event is both replayed and delivered live, and none is lost
    /// between the two.
    pub fn subscribe(&self) -> Subscription {
        let mut registry = lock(&self.registry);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        registry.subscribers.insert(id);
        debug!(subscriber = id, total = registry.subscribers.len(), "Event subscriber added");
        Subscription {
            id,
            snapshot: registry.history.iter().cloned().collect(),
            receiver: self.sender.subscribe(),
            registry: Arc::downgrade(&self.registry),
            missed: 0,
        }
    }

    /// Deregister a subscription. Equivalent to dropping it.
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).subscribers.len()
    }

    /// Recent events, oldest first.
    pub fn recent(&self) -> Vec<Arc<RunEvent>> {
        lock(&self.registry).history.iter().cloned().collect()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256, 64)
    }
}

/// A live handle on the event stream. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    snapshot: Vec<Arc<RunEvent>>,
    receiver: broadcast::Receiver<Arc<RunEvent>>,
    registry: Weak<Mutex<Registry>>,
    missed: u64,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Take the history snapshot captured at subscription time.
    pub fn take_snapshot(&mut self) -> Vec<Arc<RunEvent>> {
        std::mem::take(&mut self.snapshot)
    }

    /// Number of events dropped because this subscriber lagged.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    /// Wait for the next live event. Returns `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<Arc<RunEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(n)) => self.record_lag(n),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next live event if one is already queued.
    pub fn try_recv(&mut self) -> Option<Arc<RunEvent>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(n)) => self.record_lag(n),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    fn record_lag(&mut self, n: u64) {
        self.missed += n;
        warn!(subscriber = self.id, dropped = n, "Event subscriber lagged; oldest events dropped");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).subscribers.remove(&self.id);
            debug!(subscriber = self.id, "Event subscriber removed");
        }
    }
}
