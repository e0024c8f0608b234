//! Atomic usage counters.
//!
//! Counters use relaxed ordering — they are advisory, not synchronization
//! primitives. `peak_used_bytes` is maintained with a compare-exchange loop
//! so it always equals the historical maximum of `current_used_bytes`.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Shared usage counters updated on every hand-out and accepted release.
#[derive(Debug, Default)]
pub struct AllocStats {
    alloc_calls: AtomicUsize,
    free_calls: AtomicUsize,
    current_used_bytes: AtomicUsize,
    peak_used_bytes: AtomicUsize,
}

/// One-shot view of the counters. Reads are per-counter atomic but not
/// jointly atomic: a snapshot taken under concurrent traffic may be skewed
/// across fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub alloc_calls: usize,
    pub free_calls: usize,
    pub current_used_bytes: usize,
    pub peak_used_bytes: usize,
}

impl AllocStats {
    /// Creates zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            alloc_calls: AtomicUsize::new(0),
            free_calls: AtomicUsize::new(0),
            current_used_bytes: AtomicUsize::new(0),
            peak_used_bytes: AtomicUsize::new(0),
        }
    }

    /// Records a successful hand-out of `bytes` backing bytes.
    pub fn record_alloc(&self, bytes: usize) {
        self.alloc_calls.fetch_add(1, Ordering::Relaxed);
        let used = self.current_used_bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        let mut peak = self.peak_used_bytes.load(Ordering::Relaxed);
        while used > peak {
            match self.peak_used_bytes.compare_exchange_weak(
                peak,
                used,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => peak = observed,
            }
        }
    }

    /// Records an accepted release of `bytes` backing bytes.
    pub fn record_free(&self, bytes: usize) {
        self.free_calls.fetch_add(1, Ordering::Relaxed);
        // Saturating: an underflow would mean mismatched accounting upstream;
        // clamp rather than wrap so the gauge stays usable.
        let _ = self
            .current_used_bytes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(bytes))
            });
    }

    /// Reads each counter once.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            alloc_calls: self.alloc_calls.load(Ordering::Relaxed),
            free_calls: self.free_calls.load(Ordering::Relaxed),
            current_used_bytes: self.current_used_bytes.load(Ordering::Relaxed),
            peak_used_bytes: self.peak_used_bytes.load(Ordering::Relaxed),
        }
    }
}
