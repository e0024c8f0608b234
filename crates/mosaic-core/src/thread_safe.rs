//! Thread-safe allocator facades.
//!
//! The same two arena engines behind one coarse `parking_lot::Mutex` per
//! allocator: every public operation holds the mutex for its whole
//! duration, so operations appear in a single total order. Stats accumulate
//! while the lock is held.

use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::arena::basic::BasicArena;
use crate::arena::coalescing::CoalescingArena;
use crate::block::MAX_ALIGN;
use crate::error::CreateError;
use crate::stats::{AllocStats, StatsSnapshot};
use crate::trace;

/// Mutex-guarded first-fit allocator without coalescing.
#[derive(Debug)]
pub struct ThreadSafeBasicAllocator {
    arena: Mutex<BasicArena>,
    stats: AllocStats,
}

impl ThreadSafeBasicAllocator {
    /// Creates an allocator over a fresh `pool_size`-byte arena.
    pub fn new(pool_size: usize) -> Result<Self, CreateError> {
        Ok(Self {
            arena: Mutex::new(BasicArena::new(pool_size)?),
            stats: AllocStats::new(),
        })
    }

    /// Allocates `size` bytes at the maximum fundamental alignment.
    pub fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        self.allocate_aligned(size, MAX_ALIGN)
    }

    /// Allocates `size` bytes at `align`, a power of two.
    pub fn allocate_aligned(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        self.arena.lock().allocate(size, align, &self.stats)
    }

    /// Releases `ptr`. Null, foreign, and double frees are ignored (and
    /// recorded as anomalies).
    pub fn deallocate(&self, ptr: *mut u8) {
        let outcome = self.arena.lock().deallocate(ptr, &self.stats);
        if let Some(kind) = outcome.anomaly() {
            trace::record(kind, ptr as usize);
        }
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Bytes currently reserved by allocated blocks.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.arena.lock().used_bytes()
    }
}

/// Mutex-guarded first-fit allocator with boundary-tagged coalescing.
#[derive(Debug)]
pub struct ThreadSafeCoalescingAllocator {
    arena: Mutex<CoalescingArena>,
    stats: AllocStats,
}

impl ThreadSafeCoalescingAllocator {
    /// Creates an allocator over a fresh `pool_size`-byte arena.
    pub fn new(pool_size: usize) -> Result<Self, CreateError> {
        Ok(Self {
            arena: Mutex::new(CoalescingArena::new(pool_size)?),
            stats: AllocStats::new(),
        })
    }

    /// Allocates `size` bytes at the maximum fundamental alignment.
    pub fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        self.allocate_aligned(size, MAX_ALIGN)
    }

    /// Allocates `size` bytes at `align`, a power of two.
    pub fn allocate_aligned(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        self.arena.lock().allocate(size, align, &self.stats)
    }

    /// Releases `ptr`, merging with free neighbors. Null, foreign, and
    /// double frees are ignored (and recorded as anomalies).
    pub fn deallocate(&self, ptr: *mut u8) {
        let outcome = self.arena.lock().deallocate(ptr, &self.stats);
        if let Some(kind) = outcome.anomaly() {
            trace::record(kind, ptr as usize);
        }
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Bytes currently reserved by allocated blocks.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.arena.lock().used_bytes()
    }

    /// Number of free blocks (diagnostic).
    #[must_use]
    pub fn free_block_count(&self) -> usize {
        self.arena.lock().free_blocks().len()
    }
}
