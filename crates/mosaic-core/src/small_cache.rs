//! Thread-private size-classed chunk cache.
//!
//! Requests up to 256 bytes are served from four bins of recycled host
//! chunks rather than from an arena. Each chunk is one host allocation of
//! `SMALL_HEADER_SIZE + class_size` bytes whose header ends in the
//! [`SMALL_TAG`] the free path reads at `ptr - 4`. Bins are LIFO stacks;
//! a chunk returns to the bin recorded in its header, never moves between
//! bins, and is only released to the host when the cache is dropped.
//!
//! The cache is deliberately unsynchronized: each instance belongs to
//! exactly one thread.

#![allow(unsafe_code)]

use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;

use crate::block::{
    SmallChunkHeader, MAX_ALIGN, SMALL_HEADER_SIZE, SMALL_STATE_CACHED, SMALL_STATE_LIVE,
    SMALL_TAG,
};
use crate::stats::AllocStats;

/// Number of size-class bins.
pub const SMALL_BIN_COUNT: usize = 4;

/// Chunk payload size per bin.
pub const SMALL_BIN_SIZES: [usize; SMALL_BIN_COUNT] = [32, 64, 128, 256];

/// Largest request the cache serves.
pub const SMALL_MAX: usize = SMALL_BIN_SIZES[SMALL_BIN_COUNT - 1];

/// Per-thread cache of small chunks, one LIFO stack per size class.
pub struct SmallCache {
    /// Stacks of chunk base pointers (the header, not the payload).
    bins: [Vec<NonNull<u8>>; SMALL_BIN_COUNT],
}

impl SmallCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bins: [const { Vec::new() }; SMALL_BIN_COUNT],
        }
    }

    /// The bin serving `size` requests, or `None` above [`SMALL_MAX`].
    #[must_use]
    pub fn bin_for(size: usize) -> Option<usize> {
        SMALL_BIN_SIZES.iter().position(|&class| size <= class)
    }

    /// Number of chunks currently cached across all bins.
    #[must_use]
    pub fn cached_chunks(&self) -> usize {
        self.bins.iter().map(Vec::len).sum()
    }

    /// Hands out a chunk for `size` bytes (zero is normalized to one),
    /// recycling a cached chunk or asking the host for a fresh one.
    /// Returns `None` if `size` exceeds [`SMALL_MAX`] or the host refuses.
    pub fn allocate(&mut self, size: usize, stats: &AllocStats) -> Option<NonNull<u8>> {
        let size = size.max(1);
        let bin = Self::bin_for(size)?;

        let base = match self.bins[bin].pop() {
            Some(base) => base,
            None => {
                let layout = Self::chunk_layout(bin);
                // SAFETY: layout has non-zero size.
                let raw = unsafe { alloc(layout) };
                NonNull::new(raw)?
            }
        };

        let header = SmallChunkHeader {
            bin_index: bin as u32,
            user_size: size as u32,
            state: SMALL_STATE_LIVE,
            tag: SMALL_TAG,
        };
        // SAFETY: base points at a chunk of SMALL_HEADER_SIZE + class bytes,
        // 16-aligned, owned by this cache.
        unsafe { base.as_ptr().cast::<SmallChunkHeader>().write(header) };

        stats.record_alloc(Self::backing_size(bin));
        // SAFETY: the payload starts directly after the header, in-bounds.
        let user = unsafe { base.as_ptr().add(SMALL_HEADER_SIZE) };
        NonNull::new(user)
    }

    /// Takes back a chunk previously handed out by a small cache. Returns
    /// `false` (leaving all state untouched) if the bytes before `ptr` do
    /// not carry a small-chunk header.
    ///
    /// The caller must have established that `ptr` is non-null and carries
    /// the [`SMALL_TAG`] at `ptr - 4`; this re-validates before trusting
    /// the header.
    pub fn deallocate(&mut self, ptr: NonNull<u8>, stats: &AllocStats) -> bool {
        // SAFETY: per contract, ptr was produced by a small-cache hand-out,
        // so a full header precedes it.
        let base = unsafe { ptr.as_ptr().sub(SMALL_HEADER_SIZE) };
        // SAFETY: as above; the header is in-bounds and owned by a cache.
        let mut header = unsafe { base.cast::<SmallChunkHeader>().read() };
        if header.tag != SMALL_TAG
            || header.bin_index as usize >= SMALL_BIN_COUNT
            || header.state == SMALL_STATE_CACHED
        {
            return false;
        }
        let bin = header.bin_index as usize;
        header.state = SMALL_STATE_CACHED;
        // SAFETY: same placement as the read above.
        unsafe { base.cast::<SmallChunkHeader>().write(header) };
        let base = NonNull::new(base).expect("chunk base is non-null");
        self.bins[bin].push(base);
        stats.record_free(Self::backing_size(bin));
        true
    }

    /// Backing bytes of one chunk in `bin` (header plus class payload).
    #[must_use]
    pub fn backing_size(bin: usize) -> usize {
        SMALL_HEADER_SIZE + SMALL_BIN_SIZES[bin]
    }

    fn chunk_layout(bin: usize) -> Layout {
        Layout::from_size_align(Self::backing_size(bin), MAX_ALIGN)
            .expect("small chunk layout is valid")
    }
}

impl Default for SmallCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SmallCache {
    fn drop(&mut self) {
        for bin in 0..SMALL_BIN_COUNT {
            let layout = Self::chunk_layout(bin);
            for base in self.bins[bin].drain(..) {
                // SAFETY: every stacked chunk was produced by alloc with
                // exactly this bin's layout and is owned by the cache.
                unsafe { dealloc(base.as_ptr(), layout) };
            }
        }
    }
}

impl std::fmt::Debug for SmallCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmallCache")
            .field("cached_chunks", &self.cached_chunks())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::ARENA_MAGIC;

    #[test]
    fn bin_rounds_up_to_smallest_class() {
        assert_eq!(SmallCache::bin_for(1), Some(0));
        assert_eq!(SmallCache::bin_for(32), Some(0));
        assert_eq!(SmallCache::bin_for(33), Some(1));
        assert_eq!(SmallCache::bin_for(128), Some(2));
        assert_eq!(SmallCache::bin_for(129), Some(3));
        assert_eq!(SmallCache::bin_for(256), Some(3));
        assert_eq!(SmallCache::bin_for(257), None);
    }

    #[test]
    fn hand_out_is_aligned_and_tagged() {
        let mut cache = SmallCache::new();
        let stats = AllocStats::new();
        let p = cache.allocate(100, &stats).expect("small allocation");
        assert_eq!(p.as_ptr() as usize % MAX_ALIGN, 0);

        // SAFETY: the four bytes before the payload are the header tag.
        let tag = unsafe { p.as_ptr().sub(4).cast::<u32>().read() };
        assert_eq!(tag, SMALL_TAG);
        assert_ne!(tag, ARENA_MAGIC);

        assert!(cache.deallocate(p, &stats));
    }

    #[test]
    fn freed_chunk_is_recycled_lifo() {
        let mut cache = SmallCache::new();
        let stats = AllocStats::new();
        let a = cache.allocate(40, &stats).expect("a");
        let b = cache.allocate(40, &stats).expect("b");
        cache.deallocate(a, &stats);
        cache.deallocate(b, &stats);
        assert_eq!(cache.cached_chunks(), 2);

        // Same class comes back most-recent-first; the host is not asked.
        assert_eq!(cache.allocate(64, &stats).expect("reuse"), b);
        assert_eq!(cache.allocate(50, &stats).expect("reuse"), a);
        assert_eq!(cache.cached_chunks(), 0);
    }

    #[test]
    fn classes_do_not_mix() {
        let mut cache = SmallCache::new();
        let stats = AllocStats::new();
        let small = cache.allocate(16, &stats).expect("bin 0");
        cache.deallocate(small, &stats);

        // A bin-1 request must not be served from bin 0's stack.
        let bigger = cache.allocate(64, &stats).expect("bin 1");
        assert_ne!(bigger, small);
        cache.deallocate(bigger, &stats);
    }

    #[test]
    fn requests_above_the_largest_class_are_refused() {
        let mut cache = SmallCache::new();
        let stats = AllocStats::new();
        assert!(cache.allocate(257, &stats).is_none());
        assert_eq!(stats.snapshot().alloc_calls, 0);
    }

    #[test]
    fn stats_balance_over_hits_and_misses() {
        let mut cache = SmallCache::new();
        let stats = AllocStats::new();
        let p = cache.allocate(100, &stats).expect("miss");
        cache.deallocate(p, &stats);
        let q = cache.allocate(100, &stats).expect("hit");
        cache.deallocate(q, &stats);

        let snap = stats.snapshot();
        assert_eq!(snap.alloc_calls, 2);
        assert_eq!(snap.free_calls, 2);
        assert_eq!(snap.current_used_bytes, 0);
        assert_eq!(snap.peak_used_bytes, SmallCache::backing_size(2));
    }

    #[test]
    fn double_free_of_a_chunk_is_rejected() {
        let mut cache = SmallCache::new();
        let stats = AllocStats::new();
        let p = cache.allocate(48, &stats).expect("allocation");
        assert!(cache.deallocate(p, &stats));
        assert!(!cache.deallocate(p, &stats));
        assert_eq!(cache.cached_chunks(), 1);
        assert_eq!(stats.snapshot().free_calls, 1);
    }

    #[test]
    fn zero_size_request_is_normalized() {
        let mut cache = SmallCache::new();
        let stats = AllocStats::new();
        let p = cache.allocate(0, &stats).expect("zero-size allocation");
        cache.deallocate(p, &stats);
    }

    #[test]
    fn user_size_is_recorded_in_the_header() {
        let mut cache = SmallCache::new();
        let stats = AllocStats::new();
        let p = cache.allocate(77, &stats).expect("allocation");
        // SAFETY: a full header precedes every hand-out.
        let header = unsafe {
            p.as_ptr()
                .sub(SMALL_HEADER_SIZE)
                .cast::<SmallChunkHeader>()
                .read()
        };
        assert_eq!(header.user_size, 77);
        assert_eq!(header.bin_index, 2);
        cache.deallocate(p, &stats);
    }
}
