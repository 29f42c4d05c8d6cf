use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Dispatcher counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub(crate) handled: AtomicU64,
    pub(crate) not_handled: AtomicU64,
    pub(crate) delivered: AtomicU64,
    pub(crate) queued_for_retry: AtomicU64,
    pub(crate) transform_failures: AtomicU64,
    pub(crate) persist_failures: AtomicU64,
}

impl DispatchStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            handled: self.handled.load(Ordering::Relaxed),
            not_handled: self.not_handled.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            queued_for_retry: self.queued_for_retry.load(Ordering::Relaxed),
            transform_failures: self.transform_failures.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub handled: u64,
    pub not_handled: u64,
    pub delivered: u64,
    pub queued_for_retry: u64,
    pub transform_failures: u64,
    pub persist_failures: u64,
}
