//! Multi-threaded churn against the per-thread allocator: mixed sizes
//! across the small/large boundary, cross-thread frees, and a final
//! balance check. Deterministic, bounded pressure — not a fuzz campaign.

use std::sync::mpsc;

use mosaic_core::PerThreadAllocator;

const THREADS: usize = 8;
const OPS_RELEASE: usize = 200_000;
const OPS_DEBUG: usize = 20_000;
const SLOTS: usize = 64;
const ARENA_SIZE: usize = 8 * 1024 * 1024;

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range(&mut self, low: usize, high_inclusive: usize) -> usize {
        low + (self.next_u64() as usize % (high_inclusive - low + 1))
    }
}

fn target_ops() -> usize {
    if cfg!(debug_assertions) {
        OPS_DEBUG
    } else {
        OPS_RELEASE
    }
}

#[test]
fn mixed_churn_across_threads_balances_to_zero() {
    let alloc = PerThreadAllocator::new(ARENA_SIZE).expect("allocator");

    std::thread::scope(|scope| {
        for t in 0..THREADS {
            let alloc = &alloc;
            scope.spawn(move || {
                let mut rng = XorShift64::new(0x9E37_79B9 + t as u64);
                let mut slots: [Option<usize>; SLOTS] = [None; SLOTS];

                for _ in 0..target_ops() {
                    let idx = rng.gen_range(0, SLOTS - 1);
                    // 60/40 alloc/free mix.
                    if rng.gen_range(0, 99) < 60 {
                        if slots[idx].is_none() {
                            let size = rng.gen_range(1, 4096);
                            if let Some(p) = alloc.allocate(size) {
                                slots[idx] = Some(p.as_ptr() as usize);
                            }
                        }
                    } else if let Some(addr) = slots[idx].take() {
                        alloc.deallocate(addr as *mut u8);
                    }
                }

                for addr in slots.into_iter().flatten() {
                    alloc.deallocate(addr as *mut u8);
                }
            });
        }
    });

    let snap = alloc.stats_snapshot();
    assert_eq!(snap.alloc_calls, snap.free_calls);
    assert_eq!(snap.current_used_bytes, 0);
    assert!(snap.peak_used_bytes > 0);
}

#[test]
fn pointers_freed_on_a_different_thread_than_they_were_allocated() {
    let alloc = PerThreadAllocator::new(ARENA_SIZE).expect("allocator");
    let (tx, rx) = mpsc::channel::<usize>();

    std::thread::scope(|scope| {
        // Producer: allocates on its own arena and ships addresses out.
        {
            let alloc = &alloc;
            scope.spawn(move || {
                let mut rng = XorShift64::new(42);
                for _ in 0..1_000 {
                    // Straddle the small/large boundary.
                    let size = rng.gen_range(1, 1024);
                    if let Some(p) = alloc.allocate(size) {
                        tx.send(p.as_ptr() as usize).expect("receiver alive");
                    }
                }
                drop(tx);
            });
        }
        // Consumer: frees everything from a thread that allocated nothing.
        {
            let alloc = &alloc;
            scope.spawn(move || {
                for addr in rx {
                    alloc.deallocate(addr as *mut u8);
                }
            });
        }
    });

    let snap = alloc.stats_snapshot();
    assert_eq!(snap.alloc_calls, snap.free_calls);
    assert_eq!(
        snap.current_used_bytes, 0,
        "cross-thread frees must reach the producing arena"
    );
}

#[test]
fn payloads_written_by_one_thread_survive_neighbor_churn() {
    let alloc = PerThreadAllocator::new(ARENA_SIZE).expect("allocator");

    std::thread::scope(|scope| {
        for t in 0..4 {
            let alloc = &alloc;
            scope.spawn(move || {
                let fill = 0x40 + t as u8;
                let mut rng = XorShift64::new(7 + t as u64);
                for _ in 0..2_000 {
                    let size = rng.gen_range(16, 2048);
                    let Some(p) = alloc.allocate(size) else {
                        continue;
                    };
                    // SAFETY: the allocation was granted exclusively.
                    unsafe { std::ptr::write_bytes(p.as_ptr(), fill, size) };
                    for offset in [0, size / 2, size - 1] {
                        // SAFETY: in-bounds of the live allocation.
                        let byte = unsafe { p.as_ptr().add(offset).read() };
                        assert_eq!(byte, fill, "payload clobbered at +{offset}");
                    }
                    alloc.deallocate(p.as_ptr());
                }
            });
        }
    });

    assert_eq!(alloc.stats_snapshot().current_used_bytes, 0);
}
