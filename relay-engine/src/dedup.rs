//! Bounded recent-event cache.
//!
//! Suppresses a second pass over an event the transport redelivers in the same session.
//! Membership is a hash lookup; eviction pops the oldest id from an insertion-order queue.

use std::collections::{HashSet, VecDeque};

use tracing::debug;

/// Default number of remembered event ids.
pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug)]
pub struct EventDeduplicator {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl EventDeduplicator {
    /// Creates a cache remembering at most `capacity` ids (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity + 1),
            seen: HashSet::with_capacity(capacity + 1),
        }
    }

    /// Returns true and remembers `event_id` the first time it is seen; false on a repeat.
    pub fn should_process(&mut self, event_id: &str) -> bool {
        if self.seen.contains(event_id) {
            debug!(event_id, "Skipping event already processed");
            return false;
        }

        self.seen.insert(event_id.to_string());
        self.order.push_back(event_id.to_string());

        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.seen.contains(event_id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventDeduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
