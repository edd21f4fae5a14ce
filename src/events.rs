//! Timestamped events and the FIFO queue that carries them.
//!
//! Every producer owns one [`EventQueue`] and pushes accepted lines into it;
//! consumers block on [`EventQueue::pop_timeout`]. The queue is unbounded by
//! default. A capacity turns it into a rolling buffer that evicts the oldest
//! event and counts the drop.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::trace;

/// One raw line observed on a device stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub timestamp: DateTime<Local>,
    pub raw: String,
    pub source: String,
}

impl Event {
    /// Stamp a line with the current local time.
    pub fn new(source: &str, raw: String) -> Self {
        Self {
            timestamp: Local::now(),
            raw,
            source: source.to_string(),
        }
    }

    /// Case-sensitive substring check against any of `needles`.
    pub fn contains_any<S: AsRef<str>>(&self, needles: &[S]) -> bool {
        needles.iter().any(|n| self.raw.contains(n.as_ref()))
    }
}

/// FIFO event queue shared between one producer and its consumers.
///
/// Cloning shares the same underlying queue.
#[derive(Debug, Clone)]
pub struct EventQueue {
    inner: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<QueueState>,
    ready: Condvar,
}

#[derive(Debug)]
struct QueueState {
    events: VecDeque<Event>,
    capacity: Option<usize>,
    dropped: u64,
}

impl EventQueue {
    /// Queue with no capacity limit.
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    /// Queue holding at most `capacity` events (minimum one).
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity.max(1)))
    }

    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    events: VecDeque::new(),
                    capacity,
                    dropped: 0,
                }),
                ready: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event, evicting the oldest one if the queue is bounded and full.
    pub fn push(&self, event: Event) {
        let mut state = self.lock();
        if let Some(cap) = state.capacity {
            while state.events.len() >= cap {
                state.events.pop_front();
                state.dropped += 1;
            }
        }
        trace!(source = %event.source, "event queued");
        state.events.push_back(event);
        drop(state);
        self.inner.ready.notify_one();
    }

    /// Take the oldest event, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout; an empty queue is not an error.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Event> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(event) = state.events.pop_front() {
                return Some(event);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .inner
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    /// Take the oldest event without waiting.
    pub fn try_pop(&self) -> Option<Event> {
        self.lock().events.pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discard everything currently queued.
    pub fn clear(&self) {
        self.lock().events.clear();
    }

    /// Number of events evicted by the capacity limit so far.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::unbounded()
    }
}
