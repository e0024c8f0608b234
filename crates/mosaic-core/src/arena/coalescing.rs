//! Boundary-tagged coalescing arena.
//!
//! First-fit placement over an address-ordered doubly-linked free list, with
//! immediate forward and backward coalescing on free. Every block carries a
//! footer replicating `total_size` and the free bit, so both neighbors of a
//! freed block are reachable in O(1).
//!
//! Defensive posture: metadata is validated before every structural use.
//! A free-list node that fails validation is cut off (the walk stops and the
//! list is truncated at the last good node) and recorded; the arena never
//! attempts to repair its own heap.

use std::ptr::NonNull;

use crate::arena::{compute_fit, render_free_list, FreeBlockInfo, FreeOutcome};
use crate::block::{
    BlockFooter, BlockHeader, FreeLinks, align_up, ARENA_MAGIC, FOOTER_SIZE, HEADER_SIZE,
    LINKS_SIZE, MAX_ALIGN, NIL,
};
use crate::error::CreateError;
use crate::region::Region;
use crate::stats::AllocStats;
use crate::trace::{self, AnomalyKind};

/// Smallest block that can host a free-list node: header, links, footer.
pub(crate) const MIN_FREE_BLOCK: usize = HEADER_SIZE + LINKS_SIZE + FOOTER_SIZE;

/// Single-threaded coalescing allocation engine over one owned region.
pub struct CoalescingArena {
    region: Region,
    /// Offset of the lowest-addressed free block, or [`NIL`].
    free_head: usize,
    used_bytes: usize,
}

impl CoalescingArena {
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
        region.write(rounded - FOOTER_SIZE, BlockFooter::new(rounded, true));
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

    /// Bytes currently reserved by allocated blocks (including metadata and
    /// fragmentation slack).
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
            let links = self.links_of(cur);

            if let Some((padding, needed)) =
                compute_fit(base + cur + HEADER_SIZE, align, req, FOOTER_SIZE)
            {
                if needed <= hdr.total_size {
                    return Some(self.place(cur, links, hdr.total_size, padding, needed, req, stats));
                }
            }

            prev = cur;
            cur = links.next;
        }
        None
    }

    /// Releases a pointer previously returned by [`allocate`], merging the
    /// block with any free neighbors. Null, foreign, corrupt, and
    /// already-free pointers are classified and leave the arena untouched.
    ///
    /// [`allocate`]: CoalescingArena::allocate
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
        self.region.write(
            start + hdr.total_size - FOOTER_SIZE,
            BlockFooter::new(hdr.total_size, true),
        );
        self.insert_ordered(start);
        self.coalesce_forward(start);
        self.coalesce_backward(start);
        FreeOutcome::Freed
    }

    /// Free blocks in ascending address order.
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
            cur = self.links_of(cur).next;
            steps += 1;
        }
        out
    }

    /// Human-readable free-list dump.
    #[must_use]
    pub fn free_list_report(&self) -> String {
        render_free_list("coalescing", self.region.base_addr(), &self.free_blocks())
    }

    // ------------------------------------------------------------------
    // Placement
    // ------------------------------------------------------------------

    /// Carves an allocation out of the free block at `cur` and returns the
    /// user pointer. `needed <= total` must hold.
    fn place(
        &mut self,
        cur: usize,
        links: FreeLinks,
        total: usize,
        padding: usize,
        needed: usize,
        req: usize,
        stats: &AllocStats,
    ) -> NonNull<u8> {
        let block_total = if total - needed >= MIN_FREE_BLOCK {
            let leftover_off = cur + needed;
            let leftover = total - needed;
            self.region.write(leftover_off, BlockHeader::free(leftover));
            self.region.write(
                leftover_off + leftover - FOOTER_SIZE,
                BlockFooter::new(leftover, true),
            );
            // The leftover inherits cur's position: it lies between cur's
            // list neighbors by address, so order is preserved.
            self.replace_node(links, leftover_off);
            needed
        } else {
            self.unlink(links);
            total
        };

        if padding > 0 {
            // Pad bytes must never look like a valid header to a forward
            // coalesce landing on the block start.
            self.region.zero(cur, padding);
        }
        self.region
            .write(cur + padding, BlockHeader::allocated(block_total, req, padding));
        self.region.write(
            cur + block_total - FOOTER_SIZE,
            BlockFooter::new(block_total, false),
        );
        self.used_bytes += block_total;
        stats.record_alloc(block_total);

        let ptr = self.region.ptr_at(cur + padding + HEADER_SIZE);
        NonNull::new(ptr).expect("region pointers are non-null")
    }

    // ------------------------------------------------------------------
    // Coalescing
    // ------------------------------------------------------------------

    /// Absorbs the successor block if it is free and intact. `start` must be
    /// a listed free block.
    fn coalesce_forward(&mut self, start: usize) {
        let hdr: BlockHeader = self.region.read(start);
        let next = start + hdr.total_size;
        if next >= self.region.size() {
            return;
        }
        let Some(next_hdr) = self.valid_free_node(next) else {
            return;
        };
        let next_links = self.links_of(next);
        self.unlink(next_links);

        let merged = hdr.total_size + next_hdr.total_size;
        self.region.write(start, BlockHeader::free(merged));
        self.region
            .write(start + merged - FOOTER_SIZE, BlockFooter::new(merged, true));
        // The stale tags at the old boundary become payload bytes.
    }

    /// Absorbs `start` into its predecessor if that block is free and
    /// intact, via the predecessor's footer.
    fn coalesce_backward(&mut self, start: usize) {
        // The smallest possible predecessor is one minimal block.
        if start < MIN_FREE_BLOCK {
            return;
        }
        let foot: BlockFooter = self.region.read(start - FOOTER_SIZE);
        if foot.magic != ARENA_MAGIC || !foot.is_free() {
            return;
        }
        let prev_total = foot.total_size;
        if prev_total < MIN_FREE_BLOCK || prev_total % MAX_ALIGN != 0 || prev_total > start {
            return;
        }
        let prev_start = start - prev_total;
        let Some(prev_hdr) = self.valid_free_node(prev_start) else {
            return;
        };
        if prev_hdr.total_size != prev_total {
            return;
        }

        let my_hdr: BlockHeader = self.region.read(start);
        let my_links = self.links_of(start);
        self.unlink(my_links);

        let merged = prev_total + my_hdr.total_size;
        self.region.write(prev_start, BlockHeader::free(merged));
        self.region.write(
            prev_start + merged - FOOTER_SIZE,
            BlockFooter::new(merged, true),
        );
    }

    // ------------------------------------------------------------------
    // Free-list maintenance
    // ------------------------------------------------------------------

    /// Upper bound on list length; exceeding it means a cycle or corruption.
    fn node_cap(&self) -> usize {
        self.region.size() / MIN_FREE_BLOCK + 1
    }

    /// A node offset that can at least be read as a free block.
    fn plausible_off(&self, off: usize) -> bool {
        off != NIL && off % MAX_ALIGN == 0 && off + MIN_FREE_BLOCK <= self.region.size()
    }

    /// Reads and fully validates the free block at `off`.
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

    fn links_of(&self, off: usize) -> FreeLinks {
        self.region.read(off + HEADER_SIZE)
    }

    fn set_next(&mut self, off: usize, next: usize) {
        let mut links = self.links_of(off);
        links.next = next;
        self.region.write(off + HEADER_SIZE, links);
    }

    fn set_prev(&mut self, off: usize, prev: usize) {
        let mut links = self.links_of(off);
        links.prev = prev;
        self.region.write(off + HEADER_SIZE, links);
    }

    /// Unlinks the node whose links are `links`. Neighbor offsets are
    /// bound-checked so a corrupted link cannot direct a write out of range.
    fn unlink(&mut self, links: FreeLinks) {
        if links.prev == NIL {
            self.free_head = links.next;
        } else if self.plausible_off(links.prev) {
            self.set_next(links.prev, links.next);
        } else {
            trace::record(AnomalyKind::CorruptFreeList, links.prev);
        }
        if links.next != NIL {
            if self.plausible_off(links.next) {
                self.set_prev(links.next, links.prev);
            } else {
                trace::record(AnomalyKind::CorruptFreeList, links.next);
            }
        }
    }

    /// Installs `new` in the exact list position held by the node that owned
    /// `links`.
    fn replace_node(&mut self, links: FreeLinks, new: usize) {
        self.region.write(new + HEADER_SIZE, links);
        if links.prev == NIL {
            self.free_head = new;
        } else if self.plausible_off(links.prev) {
            self.set_next(links.prev, new);
        }
        if links.next != NIL && self.plausible_off(links.next) {
            self.set_prev(links.next, new);
        }
    }

    /// Links the free block at `off` into the list in ascending address
    /// order.
    fn insert_ordered(&mut self, off: usize) {
        let mut prev = NIL;
        let mut cur = self.free_head;
        let mut steps = 0usize;
        while cur != NIL && cur < off {
            steps += 1;
            if steps > self.node_cap() || !self.plausible_off(cur) {
                trace::record(AnomalyKind::CorruptFreeList, cur);
                break;
            }
            prev = cur;
            cur = self.links_of(cur).next;
        }
        self.region.write(off + HEADER_SIZE, FreeLinks { prev, next: cur });
        if prev == NIL {
            self.free_head = off;
        } else {
            self.set_next(prev, off);
        }
        if cur != NIL && self.plausible_off(cur) {
            self.set_prev(cur, off);
        }
    }

    fn truncate_after(&mut self, prev: usize) {
        if prev == NIL {
            self.free_head = NIL;
        } else {
            self.set_next(prev, NIL);
        }
    }
}

impl std::fmt::Debug for CoalescingArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoalescingArena")
            .field("region", &self.region)
            .field("used_bytes", &self.used_bytes)
            .field("free_blocks", &self.free_blocks().len())
            .finish()
    }
}
