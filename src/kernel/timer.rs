//! Timer System
//!
//! Deadline ordered queue backing the reactor's timers.
//!
//! Design:
//! - TimerQueue is a min-heap sorted by (deadline, id)
//! - Each timer carries a payload handed back when it expires or is cancelled
//! - Cancelled timers leave a stale heap entry that is skipped lazily
//! - Time is a `Duration` since the owning clock's origin

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

/// Unique identifier for a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub u64);

/// A timer that fires at a specific deadline
#[derive(Debug)]
struct Timer<T> {
    deadline: Duration,
    payload: T,
}

/// Entry in the timer heap (for ordering)
#[derive(Debug, PartialEq, Eq)]
struct TimerEntry {
    deadline: Duration,
    id: TimerId,
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline, then oldest id)
        (other.deadline, other.id).cmp(&(self.deadline, self.id))
    }
}

/// Timer queue - manages all active timers
#[derive(Debug)]
pub struct TimerQueue<T> {
    /// Min-heap of timer entries, possibly including cancelled ones
    heap: BinaryHeap<TimerEntry>,
    /// Pending timers by ID
    timers: HashMap<TimerId, Timer<T>>,
    next_id: u64,
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            timers: HashMap::new(),
            next_id: 1,
        }
    }

    /// Schedule a one-shot timer `delay` after `now`
    pub fn schedule(&mut self, delay: Duration, now: Duration, payload: T) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;

        let deadline = now.saturating_add(delay);
        self.heap.push(TimerEntry { deadline, id });
        self.timers.insert(id, Timer { deadline, payload });

        id
    }

    /// Cancel a timer, returning its payload if it was still pending
    ///
    /// The payload is returned rather than dropped so the caller can release
    /// it outside any borrow of the queue.
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        self.timers.remove(&id).map(|timer| timer.payload)
    }

    /// Remove the earliest timer whose deadline is at or before `now`
    pub fn pop_expired(&mut self, now: Duration) -> Option<T> {
        while let Some(entry) = self.heap.peek() {
            if entry.deadline > now {
                return None;
            }
            let id = entry.id;
            self.heap.pop();
            if let Some(timer) = self.timers.remove(&id) {
                return Some(timer.payload);
            }
        }
        None
    }

    /// Deadline of the earliest pending timer
    pub fn next_deadline(&mut self) -> Option<Duration> {
        self.purge_cancelled();
        self.heap.peek().map(|entry| entry.deadline)
    }

    fn purge_cancelled(&mut self) {
        while let Some(entry) = self.heap.peek() {
            if self.timers.contains_key(&entry.id) {
                break;
            }
            self.heap.pop();
        }
    }

    /// Number of pending timers
    pub fn pending_count(&self) -> usize {
        self.timers.len()
    }
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
