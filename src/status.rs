//! Delivery receipt tracking for outbound messages.
//!
//! Receipts arrive out of order and are re-delivered at will, so recording is
//! idempotent per (message id, state, observed-at) and the current state of a
//! message is whichever receipt carries the latest `observed_at`, regardless
//! of arrival order. Ties are broken by state progression rank.

use crate::webhook::{DeliveryState, DeliveryStatus};
use parking_lot::Mutex;
use std::collections::HashMap;

const MAX_RECEIPTS_PER_MESSAGE: usize = 16;
const MAX_TRACKED_MESSAGES: usize = 4096;

pub struct StatusTracker {
    history: Mutex<HashMap<String, Vec<DeliveryStatus>>>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self {
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Record a receipt. Returns `true` if it was new, `false` if it was an
    /// exact duplicate of one already recorded.
    pub fn record(&self, status: DeliveryStatus) -> bool {
        let mut history = self.history.lock();

        // Bound total tracked messages; receipts for long-gone messages are
        // the first to go.
        if !history.contains_key(&status.message_id) && history.len() >= MAX_TRACKED_MESSAGES {
            if let Some(oldest) = history
                .iter()
                .min_by_key(|(_, receipts)| {
                    receipts.iter().map(|r| r.observed_at).max().unwrap_or(0)
                })
                .map(|(id, _)| id.clone())
            {
                history.remove(&oldest);
            }
        }

        let receipts = history.entry(status.message_id.clone()).or_default();
        if receipts
            .iter()
            .any(|r| r.state == status.state && r.observed_at == status.observed_at)
        {
            return false;
        }
        if receipts.len() >= MAX_RECEIPTS_PER_MESSAGE {
            receipts.remove(0);
        }
        receipts.push(status);
        true
    }

    /// Current state of a message: the receipt with the latest `observed_at`,
    /// ties broken by progression rank.
    pub fn current_state(&self, message_id: &str) -> Option<DeliveryState> {
        let history = self.history.lock();
        history.get(message_id).and_then(|receipts| {
            receipts
                .iter()
                .max_by_key(|r| (r.observed_at, r.state.rank()))
                .map(|r| r.state)
        })
    }

    pub fn tracked_messages(&self) -> usize {
        self.history.lock().len()
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}
