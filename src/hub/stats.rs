//! Hub counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time view of a hub's activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Connections currently in the registry
    pub connections: usize,
    /// Connections accepted since start
    pub accepted: u64,
    /// Payloads received from open connections
    pub received: u64,
    /// Payloads that passed validation and were broadcast
    pub relayed: u64,
    /// Frames handed to recipients' outbound queues
    pub deliveries: u64,
    /// Payloads dropped because they were not valid JSON
    pub malformed: u64,
    /// Frames dropped because a recipient's outbound queue was full
    pub dropped: u64,
}

#[derive(Debug, Default)]
pub(super) struct HubCounters {
    pub accepted: AtomicU64,
    pub received: AtomicU64,
    pub relayed: AtomicU64,
    pub deliveries: AtomicU64,
    pub malformed: AtomicU64,
    pub dropped: AtomicU64,
}

impl HubCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self, connections: usize) -> HubStats {
        HubStats {
            connections,
            accepted: self.accepted.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            relayed: self.relayed.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
