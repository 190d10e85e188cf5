use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// "Call back for this session at time T". Implementations decide how the
/// call is delivered; the engine only hands over the session and due time.
pub trait CleanupScheduler: Send + Sync {
    fn schedule(&self, session_id: &str, due_at: DateTime<Utc>);
}

/// Drops every request. Per-session timers are off.
pub struct NoopScheduler;

impl CleanupScheduler for NoopScheduler {
    fn schedule(&self, _session_id: &str, _due_at: DateTime<Utc>) {}
}

/// In-process min-heap of due cleanups, drained by the monitoring loop.
#[derive(Default)]
pub struct DueQueue {
    heap: Mutex<BinaryHeap<Reverse<(DateTime<Utc>, String)>>>,
}

impl DueQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BinaryHeap<Reverse<(DateTime<Utc>, String)>>> {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.lock().peek().map(|Reverse((due_at, _))| *due_at)
    }

    /// Pop every entry due at or before `now`, earliest first.
    pub fn drain_due(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut heap = self.lock();
        let mut due = Vec::new();
        while let Some(Reverse((due_at, _))) = heap.peek() {
            if *due_at > now {
                break;
            }
            if let Some(Reverse((_, session_id))) = heap.pop() {
                due.push(session_id);
            }
        }
        due
    }
}

impl CleanupScheduler for DueQueue {
    fn schedule(&self, session_id: &str, due_at: DateTime<Utc>) {
        trace!("Scheduled cleanup of {} at {}", session_id, due_at);
        self.lock().push(Reverse((due_at, session_id.to_string())));
    }
}
