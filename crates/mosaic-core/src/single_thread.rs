//! Single-threaded allocator facades.
//!
//! Thin shells exposing the two arena engines directly: no locking, no
//! per-thread routing. [`BasicAllocator`] never merges freed blocks;
//! [`CoalescingAllocator`] merges eagerly. Both carry their own stats and a
//! free-list debug dump.

use std::ptr::NonNull;

use crate::arena::basic::BasicArena;
use crate::arena::coalescing::CoalescingArena;
use crate::arena::FreeBlockInfo;
use crate::block::MAX_ALIGN;
use crate::error::CreateError;
use crate::stats::{AllocStats, StatsSnapshot};
use crate::trace;

/// First-fit allocator without coalescing.
#[derive(Debug)]
pub struct BasicAllocator {
    arena: BasicArena,
    stats: AllocStats,
}

impl BasicAllocator {
    /// Creates an allocator over a fresh `pool_size`-byte arena.
    pub fn new(pool_size: usize) -> Result<Self, CreateError> {
        Ok(Self {
            arena: BasicArena::new(pool_size)?,
            stats: AllocStats::new(),
        })
    }

    /// Allocates `size` bytes at the maximum fundamental alignment.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        self.allocate_aligned(size, MAX_ALIGN)
    }

    /// Allocates `size` bytes at `align`, a power of two.
    pub fn allocate_aligned(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        self.arena.allocate(size, align, &self.stats)
    }

    /// Releases `ptr`. Null, foreign, and double frees are ignored (and
    /// recorded as anomalies).
    pub fn deallocate(&mut self, ptr: *mut u8) {
        let outcome = self.arena.deallocate(ptr, &self.stats);
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
        self.arena.used_bytes()
    }

    /// Free blocks in list order.
    #[must_use]
    pub fn free_blocks(&self) -> Vec<FreeBlockInfo> {
        self.arena.free_blocks()
    }

    /// Human-readable free-list dump.
    #[must_use]
    pub fn free_list_report(&self) -> String {
        self.arena.free_list_report()
    }

    /// Prints the free-list dump to stdout.
    pub fn debug_print_free_list(&self) {
        println!("{}", self.free_list_report());
    }
}

/// First-fit allocator with boundary-tagged immediate coalescing.
#[derive(Debug)]
pub struct CoalescingAllocator {
    arena: CoalescingArena,
    stats: AllocStats,
}

impl CoalescingAllocator {
    /// Creates an allocator over a fresh `pool_size`-byte arena.
    pub fn new(pool_size: usize) -> Result<Self, CreateError> {
        Ok(Self {
            arena: CoalescingArena::new(pool_size)?,
            stats: AllocStats::new(),
        })
    }

    /// Allocates `size` bytes at the maximum fundamental alignment.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        self.allocate_aligned(size, MAX_ALIGN)
    }

    /// Allocates `size` bytes at `align`, a power of two.
    pub fn allocate_aligned(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        self.arena.allocate(size, align, &self.stats)
    }

    /// Releases `ptr`, merging with free neighbors. Null, foreign, and
    /// double frees are ignored (and recorded as anomalies).
    pub fn deallocate(&mut self, ptr: *mut u8) {
        let outcome = self.arena.deallocate(ptr, &self.stats);
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
        self.arena.used_bytes()
    }

    /// Free blocks in ascending address order.
    #[must_use]
    pub fn free_blocks(&self) -> Vec<FreeBlockInfo> {
        self.arena.free_blocks()
    }

    /// Human-readable free-list dump.
    #[must_use]
    pub fn free_list_report(&self) -> String {
        self.arena.free_list_report()
    }

    /// Prints the free-list dump to stdout.
    pub fn debug_print_free_list(&self) {
        println!("{}", self.free_list_report());
    }
}
