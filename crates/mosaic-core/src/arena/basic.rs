//! First-fit arena without coalescing.
//!
//! Blocks are `[pad | Header | payload]` — no boundary tags. The free list
//! is singly linked and unordered: frees push at the head, splits push the
//! leftover at the head. Adjacent free blocks are never merged, so this
//! arena fragments under churn; that behavior is the point of the variant.

use std::ptr::NonNull;

use crate::arena::{compute_fit, render_free_list, FreeBlockInfo, FreeOutcome};
use crate::block::{
    align_up, ARENA_MAGIC, BlockHeader, FreeLinks, HEADER_SIZE, LINKS_SIZE, MAX_ALIGN, NIL,
};
use crate::error::CreateError;
use crate::region::Region;
use crate::stats::AllocStats;
use crate::trace::{self, AnomalyKind};

/// Smallest block that can host a free-list node: header plus links.
pub(crate) const MIN_FREE_BLOCK: usize = HEADER_SIZE + LINKS_SIZE;

/// Single-threaded non-coalescing allocation engine over one owned region.
pub struct BasicArena {
    region: Region,
    /// Offset of the most recently freed block, or [`NIL`].
    free_head: usize,
    used_bytes: usize,
}

impl BasicArena {
    /// Acquires a region of (at least) `size` bytes and formats it as one
    /// spanning free block.
    pub fn new(size: usize) -> Result<Self, CreateError> {
        let rounded = align_up(size.max(1), MAX_ALIGN);
        if rounded < MIN_FREE_BLOCK {
            return Err(CreateError::SizeTooSmall {
                requested: size,
                minimum: MIN_FREE_BLOCK,
            });
        }
        let region = Region::new(rounded)?;
        // Deterministic ground state: stray header probes into never-written
        // bytes must read zeros, not leftovers from the host.
        region.zero(0, rounded);
        region.write(0, BlockHeader::free(rounded));
        region.write(
            HEADER_SIZE,
            FreeLinks {
                prev: NIL,
                next: NIL,
            },
        );
        Ok(Self {
            region,
            free_head: 0,
            used_bytes: 0,
        })
    }

    /// Base address of the backing region.
    #[must_use]
    pub fn base_addr(&self) -> usize {
        self.region.base_addr()
    }

    /// Region length in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.region.size()
    }

    /// Bytes currently reserved by allocated blocks.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    /// True if `addr` lies inside this arena's region.
    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        self.region.contains(addr)
    }

    /// Allocates `req_size` bytes (zero is normalized to one) at `align`,
    /// a power of two. Returns `None` iff no free block can satisfy the
    /// request.
    pub fn allocate(
        &mut self,
        req_size: usize,
        align: usize,
        stats: &AllocStats,
    ) -> Option<NonNull<u8>> {
        if align == 0 || !align.is_power_of_two() {
            return None;
        }
        let req = req_size.max(1);
        let base = self.region.base_addr();

        let mut prev = NIL;
        let mut cur = self.free_head;
        let mut steps = 0usize;
        while cur != NIL {
            steps += 1;
            if steps > self.node_cap() {
                trace::record(AnomalyKind::CorruptFreeList, base + cur);
                self.truncate_after(prev);
                return None;
            }
            let Some(hdr) = self.valid_free_node(cur) else {
                trace::record(AnomalyKind::CorruptFreeList, base + cur);
                self.truncate_after(prev);
                return None;
            };
            let next = self.next_of(cur);

            if let Some((padding, needed)) = compute_fit(base + cur + HEADER_SIZE, align, req, 0) {
                if needed <= hdr.total_size {
                    // Unlink cur from the singly-linked list.
                    if prev == NIL {
                        self.free_head = next;
                    } else {
                        self.set_next(prev, next);
                    }

                    let block_total = if hdr.total_size - needed >= MIN_FREE_BLOCK {
                        let leftover_off = cur + needed;
                        let leftover = hdr.total_size - needed;
                        self.region.write(leftover_off, BlockHeader::free(leftover));
                        self.push_head(leftover_off);
                        needed
                    } else {
                        hdr.total_size
                    };

                    if padding > 0 {
                        self.region.zero(cur, padding);
                    }
                    self.region.write(
                        cur + padding,
                        BlockHeader::allocated(block_total, req, padding),
                    );
                    self.used_bytes += block_total;
                    stats.record_alloc(block_total);
                    let ptr = self.region.ptr_at(cur + padding + HEADER_SIZE);
                    return Some(NonNull::new(ptr).expect("region pointers are non-null"));
                }
            }

            prev = cur;
            cur = next;
        }
        None
    }

    /// Releases a pointer previously returned by [`allocate`] by pushing the
    /// block onto the free-list head. No merging happens. Null, foreign,
    /// corrupt, and already-free pointers are classified and leave the arena
    /// untouched.
    ///
    /// [`allocate`]: BasicArena::allocate
    pub fn deallocate(&mut self, ptr: *mut u8, stats: &AllocStats) -> FreeOutcome {
        if ptr.is_null() {
            return FreeOutcome::NullPointer;
        }
        let addr = ptr as usize;
        if !self.region.contains(addr) {
            return FreeOutcome::ForeignPointer;
        }
        let user_off = addr - self.region.base_addr();
        if user_off % MAX_ALIGN != 0 || user_off < HEADER_SIZE {
            return FreeOutcome::CorruptHeader;
        }
        let hdr_off = user_off - HEADER_SIZE;
        let hdr: BlockHeader = self.region.read(hdr_off);
        if hdr.magic != ARENA_MAGIC {
            return FreeOutcome::CorruptHeader;
        }
        if hdr.is_free() {
            return FreeOutcome::DoubleFree;
        }
        if hdr.padding > hdr_off {
            return FreeOutcome::CorruptHeader;
        }
        let start = hdr_off - hdr.padding;
        if start % MAX_ALIGN != 0
            || hdr.total_size < MIN_FREE_BLOCK
            || hdr.total_size % MAX_ALIGN != 0
            || hdr.total_size > self.region.size() - start
        {
            return FreeOutcome::CorruptHeader;
        }

        self.used_bytes = self.used_bytes.saturating_sub(hdr.total_size);
        stats.record_free(hdr.total_size);

        self.region.write(start, BlockHeader::free(hdr.total_size));
        self.push_head(start);
        FreeOutcome::Freed
    }

    /// Free blocks in list order (most recently freed first).
    #[must_use]
    pub fn free_blocks(&self) -> Vec<FreeBlockInfo> {
        let mut out = Vec::new();
        let mut cur = self.free_head;
        let mut steps = 0usize;
        while cur != NIL && steps <= self.node_cap() {
            let Some(hdr) = self.valid_free_node(cur) else {
                break;
            };
            out.push(FreeBlockInfo {
                offset: cur,
                size: hdr.total_size,
            });
            cur = self.next_of(cur);
            steps += 1;
        }
        out
    }

    /// Human-readable free-list dump.
    #[must_use]
    pub fn free_list_report(&self) -> String {
        render_free_list("basic", self.region.base_addr(), &self.free_blocks())
    }

    fn node_cap(&self) -> usize {
        self.region.size() / MIN_FREE_BLOCK + 1
    }

    fn plausible_off(&self, off: usize) -> bool {
        off != NIL && off % MAX_ALIGN == 0 && off + MIN_FREE_BLOCK <= self.region.size()
    }

    fn valid_free_node(&self, off: usize) -> Option<BlockHeader> {
        if !self.plausible_off(off) {
            return None;
        }
        let hdr: BlockHeader = self.region.read(off);
        (hdr.magic == ARENA_MAGIC
            && hdr.is_free()
            && hdr.total_size >= MIN_FREE_BLOCK
            && hdr.total_size % MAX_ALIGN == 0
            && hdr.total_size <= self.region.size() - off)
            .then_some(hdr)
    }

    fn next_of(&self, off: usize) -> usize {
        let links: FreeLinks = self.region.read(off + HEADER_SIZE);
        links.next
    }

    fn set_next(&mut self, off: usize, next: usize) {
        let mut links: FreeLinks = self.region.read(off + HEADER_SIZE);
        links.next = next;
        self.region.write(off + HEADER_SIZE, links);
    }

    fn push_head(&mut self, off: usize) {
        self.region.write(
            off + HEADER_SIZE,
            FreeLinks {
                prev: NIL,
                next: self.free_head,
            },
        );
        self.free_head = off;
    }

    fn truncate_after(&mut self, prev: usize) {
        if prev == NIL {
            self.free_head = NIL;
        } else {
            self.set_next(prev, NIL);
        }
    }
}

impl std::fmt::Debug for BasicArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicArena")
            .field("region", &self.region)
            .field("used_bytes", &self.used_bytes)
            .field("free_blocks", &self.free_blocks().len())
            .finish()
    }
}
