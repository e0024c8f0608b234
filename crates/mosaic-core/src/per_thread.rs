//! Per-thread allocator facade.
//!
//! Each calling thread is lazily bound to its own small cache plus its own
//! manager-owned coalescing arena. Allocation dispatches by size class:
//! requests up to 256 bytes go to the thread's small cache, larger ones to
//! the thread's arena at the maximum fundamental alignment.
//!
//! Deallocation dispatches by classification, in order: null is a no-op; a
//! pointer inside any managed arena's range is routed to that owning arena
//! (so frees from the "wrong" thread land correctly); otherwise the four
//! bytes before the pointer are read and a small-chunk tag routes the free
//! to the calling thread's cache. Anything else is recorded and ignored.
//!
//! Bindings die with their thread: the small cache returns its chunks to
//! the host and the arena's binding count drops, making an empty arena
//! eligible for reclamation.

#![allow(unsafe_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::block::{MAX_ALIGN, SMALL_TAG};
use crate::error::CreateError;
use crate::manager::{ArenaManager, ManagedArena, ManagerConfig};
use crate::small_cache::{SmallCache, SMALL_MAX};
use crate::stats::{AllocStats, StatsSnapshot};
use crate::trace::{self, AnomalyKind};

/// Default per-thread arena size.
pub const DEFAULT_ARENA_SIZE: usize = 4 * 1024 * 1024;

/// Construction-time settings for [`PerThreadAllocator`].
#[derive(Debug, Clone, Copy)]
pub struct PerThreadConfig {
    /// Size of each thread's arena.
    pub arena_size: usize,
    /// Whether the manager runs the background reclaimer.
    pub enable_reclamation: bool,
    /// Reclaimer wake interval.
    pub reclaim_interval: Duration,
}

impl Default for PerThreadConfig {
    fn default() -> Self {
        Self {
            arena_size: DEFAULT_ARENA_SIZE,
            enable_reclamation: false,
            reclaim_interval: Duration::from_secs(1),
        }
    }
}

/// A thread's lazily created allocation state: its private small cache and,
/// once a large allocation happens, its private arena.
struct ThreadBinding {
    arena: Option<Arc<ManagedArena>>,
    cache: SmallCache,
}

impl Drop for ThreadBinding {
    fn drop(&mut self) {
        if let Some(arena) = &self.arena {
            arena.unbind();
        }
    }
}

thread_local! {
    /// Bindings for every live [`PerThreadAllocator`], keyed by allocator id.
    static BINDINGS: RefCell<HashMap<usize, ThreadBinding>> = RefCell::new(HashMap::new());
}

/// Process-wide allocator id source; ids are never reused.
static NEXT_ALLOCATOR_ID: AtomicUsize = AtomicUsize::new(1);

/// Allocator with a thread-local fast path for small objects and a private
/// arena per thread for everything else.
pub struct PerThreadAllocator {
    id: usize,
    manager: ArenaManager,
    stats: AllocStats,
}

impl PerThreadAllocator {
    /// Creates an allocator whose threads each get an `arena_size`-byte
    /// arena; reclamation off.
    pub fn new(arena_size: usize) -> Result<Self, CreateError> {
        Self::with_config(PerThreadConfig {
            arena_size,
            ..PerThreadConfig::default()
        })
    }

    /// Creates an allocator from explicit settings.
    pub fn with_config(config: PerThreadConfig) -> Result<Self, CreateError> {
        // Fail construction, not the first allocation, on a hopeless size.
        let minimum = crate::arena::coalescing::MIN_FREE_BLOCK;
        if crate::block::align_up(config.arena_size.max(1), MAX_ALIGN) < minimum {
            return Err(CreateError::SizeTooSmall {
                requested: config.arena_size,
                minimum,
            });
        }

        let mut manager_config = ManagerConfig::new(config.arena_size);
        manager_config.enable_reclamation = config.enable_reclamation;
        manager_config.reclaim_interval = config.reclaim_interval;
        Ok(Self {
            id: NEXT_ALLOCATOR_ID.fetch_add(1, Ordering::Relaxed),
            manager: ArenaManager::new(manager_config),
            stats: AllocStats::new(),
        })
    }

    /// Allocates `size` bytes (zero is normalized to one) at the maximum
    /// fundamental alignment. Returns `None` when the thread's arena cannot
    /// satisfy the request or a fresh arena cannot be created.
    pub fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let size = size.max(1);
        if size <= SMALL_MAX {
            self.with_binding(|binding, _| binding.cache.allocate(size, &self.stats))
        } else {
            self.with_binding(|binding, manager| {
                let arena = match &binding.arena {
                    Some(arena) => Arc::clone(arena),
                    None => {
                        let arena = manager.create_arena().ok()?;
                        arena.bind();
                        binding.arena = Some(Arc::clone(&arena));
                        arena
                    }
                };
                arena.allocate(size, MAX_ALIGN, &self.stats)
            })
        }
    }

    /// Releases `ptr`, which may have been produced on any thread. Null,
    /// foreign, corrupt, and double frees are ignored (and recorded).
    pub fn deallocate(&self, ptr: *mut u8) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };
        let addr = ptr.as_ptr() as usize;

        // Arena pointers are classified by address range, so the free is
        // routed to the producing arena even across threads.
        if let Some(arena) = self.manager.arena_for(addr) {
            let outcome = arena.deallocate(ptr.as_ptr(), &self.stats);
            if let Some(kind) = outcome.anomaly() {
                trace::record(kind, addr);
            }
            return;
        }

        // SAFETY: every pointer this allocator hands out has at least a
        // 4-byte tag directly before it; for anything else the read stays
        // within the caller's own allocation granule per the dispatch
        // contract.
        let tag = unsafe { ptr.as_ptr().sub(4).cast::<u32>().read_unaligned() };
        if tag == SMALL_TAG {
            let accepted = self
                .with_binding(|binding, _| Some(binding.cache.deallocate(ptr, &self.stats)))
                .unwrap_or(false);
            if !accepted {
                trace::record(AnomalyKind::CorruptHeader, addr);
            }
        } else {
            trace::record(AnomalyKind::ForeignFree, addr);
        }
    }

    /// Counter snapshot across all threads using this allocator.
    #[must_use]
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of arenas currently owned by the manager.
    #[must_use]
    pub fn live_arena_count(&self) -> usize {
        self.manager.live_arena_count()
    }

    /// Runs one reclamation pass immediately. Returns how many arenas were
    /// released.
    pub fn sweep_now(&self) -> usize {
        self.manager.sweep_now()
    }

    /// Runs `f` with this thread's binding, creating it on first use.
    /// Returns `None` when thread-local storage is being torn down.
    fn with_binding<R>(
        &self,
        f: impl FnOnce(&mut ThreadBinding, &ArenaManager) -> Option<R>,
    ) -> Option<R> {
        BINDINGS
            .try_with(|cell| {
                let mut map = cell.borrow_mut();
                let binding = map.entry(self.id).or_insert_with(|| ThreadBinding {
                    arena: None,
                    cache: SmallCache::new(),
                });
                f(binding, &self.manager)
            })
            .ok()
            .flatten()
    }
}

impl std::fmt::Debug for PerThreadAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerThreadAllocator")
            .field("id", &self.id)
            .field("live_arenas", &self.live_arena_count())
            .finish()
    }
}
