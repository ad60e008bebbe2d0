//! Inbound message deduplication.
//!
//! WhatsApp re-delivers webhook events whenever it is unsure the previous
//! delivery was acknowledged, so the same `wamid` can arrive several times
//! within seconds. `DedupCache` records message ids for a sliding window and
//! answers, atomically, whether an id has been seen within that window.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(20);
const MAX_TRACKED_IDS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// First sighting within the window: process the message.
    Accepted,
    /// Seen within the window: skip the message.
    Duplicate,
}

/// Sliding-window duplicate detector keyed by message id.
///
/// Check-and-record is a single operation under one lock so two concurrent
/// deliveries of the same id cannot both be accepted. Expired entries are
/// pruned lazily when the cache is touched.
pub struct DedupCache {
    window: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl DedupCache {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_default_window() -> Self {
        Self::new(DEFAULT_WINDOW)
    }

    /// Record `message_id` if it has not been seen within the window.
    pub fn observe(&self, message_id: &str) -> Observation {
        let now = Instant::now();
        let mut seen = self.seen.lock();

        if let Some(first_seen) = seen.get(message_id) {
            if now.duration_since(*first_seen) < self.window {
                return Observation::Duplicate;
            }
        }

        seen.retain(|_, at| now.duration_since(*at) < self.window);

        // Still full after pruning: drop the oldest entry rather than grow.
        if seen.len() >= MAX_TRACKED_IDS {
            if let Some(oldest) = seen
                .iter()
                .min_by_key(|(_, at)| **at)
                .map(|(id, _)| id.clone())
            {
                seen.remove(&oldest);
            }
        }

        seen.insert(message_id.to_string(), now);
        Observation::Accepted
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}
