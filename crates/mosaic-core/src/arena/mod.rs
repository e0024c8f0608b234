//! Arena allocation engines.
//!
//! Two flavors over the same in-place metadata scheme: [`basic::BasicArena`]
//! (first-fit, unordered singly-linked free list, no coalescing) and
//! [`coalescing::CoalescingArena`] (first-fit, address-ordered doubly-linked
//! free list, boundary-tagged immediate coalescing). Both hand out pointers
//! into a [`Region`](crate::region::Region) they exclusively own and record
//! every placement in block headers written directly into that region.

pub mod basic;
pub mod coalescing;

use crate::block::{HEADER_SIZE, MAX_ALIGN};
use crate::trace::AnomalyKind;

/// Classified result of a deallocation attempt. Everything except `Freed`
/// leaves the arena untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeOutcome {
    /// The block was released (and, in the coalescing arena, merged with
    /// any free neighbors).
    Freed,
    /// Null pointer; ignored.
    NullPointer,
    /// Pointer outside this arena's region; ignored.
    ForeignPointer,
    /// Metadata before the pointer failed the magic or sanity checks;
    /// ignored.
    CorruptHeader,
    /// The block was already free; ignored.
    DoubleFree,
}

impl FreeOutcome {
    /// True when the free was accepted and state changed.
    #[must_use]
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Freed)
    }

    /// The anomaly classification for a rejected free, if it warrants a
    /// record. Null frees are legal no-ops and are not recorded.
    #[must_use]
    pub fn anomaly(self) -> Option<AnomalyKind> {
        match self {
            Self::Freed | Self::NullPointer => None,
            Self::ForeignPointer => Some(AnomalyKind::ForeignFree),
            Self::CorruptHeader => Some(AnomalyKind::CorruptHeader),
            Self::DoubleFree => Some(AnomalyKind::DoubleFree),
        }
    }
}

/// One entry of a free-list dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlockInfo {
    /// Block start, as a byte offset from the arena base.
    pub offset: usize,
    /// Block length in bytes.
    pub size: usize,
}

/// Computes the placement of `req` bytes at alignment `align` inside a free
/// block whose payload area begins at absolute address `user_area_addr`.
///
/// Returns `(padding, needed)`: the gap before the header and the total
/// block length (rounded up to [`MAX_ALIGN`] so block starts stay aligned),
/// or `None` on arithmetic overflow. `overhead_after` is the footer size,
/// or zero for the basic arena.
pub(crate) fn compute_fit(
    user_area_addr: usize,
    align: usize,
    req: usize,
    overhead_after: usize,
) -> Option<(usize, usize)> {
    let aligned = user_area_addr.checked_add(align - 1)? & !(align - 1);
    let padding = aligned - user_area_addr;
    let raw = HEADER_SIZE
        .checked_add(padding)?
        .checked_add(req)?
        .checked_add(overhead_after)?;
    let needed = raw.checked_add(MAX_ALIGN - 1)? & !(MAX_ALIGN - 1);
    Some((padding, needed))
}

/// Renders a free-list dump in the shared human-readable format.
pub(crate) fn render_free_list(label: &str, base_addr: usize, blocks: &[FreeBlockInfo]) -> String {
    use std::fmt::Write as _;

    let total: usize = blocks.iter().map(|b| b.size).sum();
    let mut out = format!(
        "{} free list: {} block(s), {} free byte(s)\n",
        label,
        blocks.len(),
        total
    );
    for (i, b) in blocks.iter().enumerate() {
        let _ = writeln!(
            out,
            "  [{i}] @{:#x} offset={} size={}",
            base_addr + b.offset,
            b.offset,
            b.size
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{align_up, FOOTER_SIZE};

    #[test]
    fn fit_without_extra_alignment_has_no_padding() {
        let (padding, needed) = compute_fit(0x1000 + HEADER_SIZE, 16, 64, FOOTER_SIZE).unwrap();
        assert_eq!(padding, 0);
        assert_eq!(needed, align_up(HEADER_SIZE + 64 + FOOTER_SIZE, MAX_ALIGN));
    }

    #[test]
    fn fit_with_wide_alignment_pads_in_16_byte_steps() {
        // Payload area starts 16 bytes past a 64-byte boundary.
        let user_area = 0x1000 + 16;
        let (padding, needed) = compute_fit(user_area, 64, 10, FOOTER_SIZE).unwrap();
        assert_eq!((user_area + padding) % 64, 0);
        assert_eq!(padding % 16, 0);
        assert_eq!(needed % MAX_ALIGN, 0);
        assert!(needed >= HEADER_SIZE + padding + 10 + FOOTER_SIZE);
    }

    #[test]
    fn fit_overflow_is_none() {
        assert!(compute_fit(0x1000, 16, usize::MAX - 8, FOOTER_SIZE).is_none());
    }

    #[test]
    fn rejected_outcomes_map_to_anomalies() {
        assert_eq!(FreeOutcome::Freed.anomaly(), None);
        assert_eq!(FreeOutcome::NullPointer.anomaly(), None);
        assert_eq!(
            FreeOutcome::ForeignPointer.anomaly(),
            Some(AnomalyKind::ForeignFree)
        );
        assert_eq!(
            FreeOutcome::DoubleFree.anomaly(),
            Some(AnomalyKind::DoubleFree)
        );
        assert!(FreeOutcome::Freed.is_accepted());
        assert!(!FreeOutcome::DoubleFree.is_accepted());
    }

    #[test]
    fn render_free_list_is_human_readable() {
        let blocks = [
            FreeBlockInfo {
                offset: 0,
                size: 128,
            },
            FreeBlockInfo {
                offset: 512,
                size: 64,
            },
        ];
        let report = render_free_list("coalescing", 0x1000, &blocks);
        assert!(report.contains("2 block(s)"));
        assert!(report.contains("192 free byte(s)"));
        assert!(report.contains("offset=512"));
    }
}
