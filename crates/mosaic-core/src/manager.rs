//! Arena ownership, address-range lookup, and background reclamation.
//!
//! The manager owns every shared arena behind an `Arc`, hands them to
//! thread bindings, and answers "which arena owns this address?" so frees
//! can be routed to the producing arena regardless of the calling thread.
//!
//! With reclamation enabled, a worker thread wakes on a timer (or on the
//! shutdown signal) and removes every arena that is both empty
//! (`used_bytes == 0`) and unbound (no live thread binding), returning its
//! backing region to the host.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::arena::coalescing::CoalescingArena;
use crate::arena::FreeOutcome;
use crate::error::CreateError;
use crate::stats::AllocStats;

/// Construction-time manager settings.
#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    /// Size of each arena the manager creates.
    pub arena_size: usize,
    /// Whether to run the background reclaimer.
    pub enable_reclamation: bool,
    /// Reclaimer wake interval.
    pub reclaim_interval: Duration,
}

impl ManagerConfig {
    /// Settings for `arena_size`-byte arenas with reclamation off.
    #[must_use]
    pub fn new(arena_size: usize) -> Self {
        Self {
            arena_size,
            enable_reclamation: false,
            reclaim_interval: Duration::from_secs(1),
        }
    }

    /// Turns the background reclaimer on.
    #[must_use]
    pub fn with_reclamation(mut self) -> Self {
        self.enable_reclamation = true;
        self
    }
}

/// One shared arena: the coalescing engine behind its own mutex, plus the
/// address range and binding count the manager reads without taking that
/// mutex.
pub struct ManagedArena {
    arena: Mutex<CoalescingArena>,
    base: usize,
    size: usize,
    /// Live thread bindings. A bound arena is never reclaimed, even when
    /// empty.
    bindings: AtomicUsize,
}

impl ManagedArena {
    fn new(size: usize) -> Result<Self, CreateError> {
        let arena = CoalescingArena::new(size)?;
        Ok(Self {
            base: arena.base_addr(),
            size: arena.size(),
            arena: Mutex::new(arena),
            bindings: AtomicUsize::new(0),
        })
    }

    /// True if `addr` lies inside this arena's region.
    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.base + self.size
    }

    /// Bytes currently reserved by allocated blocks.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.arena.lock().used_bytes()
    }

    /// Live thread bindings.
    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.bindings.load(Ordering::Acquire)
    }

    /// Allocates under this arena's mutex.
    pub fn allocate(
        &self,
        size: usize,
        align: usize,
        stats: &AllocStats,
    ) -> Option<NonNull<u8>> {
        self.arena.lock().allocate(size, align, stats)
    }

    /// Deallocates under this arena's mutex.
    pub fn deallocate(&self, ptr: *mut u8, stats: &AllocStats) -> FreeOutcome {
        self.arena.lock().deallocate(ptr, stats)
    }

    pub(crate) fn bind(&self) {
        self.bindings.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn unbind(&self) {
        self.bindings.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for ManagedArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedArena")
            .field("base", &format_args!("{:#x}", self.base))
            .field("size", &self.size)
            .field("bindings", &self.binding_count())
            .finish()
    }
}

/// State shared between the manager handle and the reclaimer worker.
struct ManagerShared {
    arenas: Mutex<Vec<Arc<ManagedArena>>>,
    stop: Mutex<bool>,
    wakeup: Condvar,
}

impl ManagerShared {
    /// Removes every empty, unbound arena. Returns how many were reclaimed.
    fn sweep(&self) -> usize {
        let mut arenas = self.arenas.lock();
        let before = arenas.len();
        arenas.retain(|arena| arena.binding_count() > 0 || arena.used_bytes() > 0);
        before - arenas.len()
    }
}

/// Owner of all shared arenas and of the optional reclaimer worker.
pub struct ArenaManager {
    shared: Arc<ManagerShared>,
    worker: Option<JoinHandle<()>>,
    config: ManagerConfig,
}

impl ArenaManager {
    /// Creates a manager; spawns the reclaimer worker when enabled.
    #[must_use]
    pub fn new(config: ManagerConfig) -> Self {
        let shared = Arc::new(ManagerShared {
            arenas: Mutex::new(Vec::new()),
            stop: Mutex::new(false),
            wakeup: Condvar::new(),
        });
        let worker = config.enable_reclamation.then(|| {
            let shared = Arc::clone(&shared);
            let interval = config.reclaim_interval;
            std::thread::spawn(move || reclaimer_loop(&shared, interval))
        });
        Self {
            shared,
            worker,
            config,
        }
    }

    /// Creates a fresh arena of the configured size and takes ownership.
    pub fn create_arena(&self) -> Result<Arc<ManagedArena>, CreateError> {
        let arena = Arc::new(ManagedArena::new(self.config.arena_size)?);
        self.shared.arenas.lock().push(Arc::clone(&arena));
        Ok(arena)
    }

    /// The arena whose region contains `addr`, if any.
    #[must_use]
    pub fn arena_for(&self, addr: usize) -> Option<Arc<ManagedArena>> {
        self.shared
            .arenas
            .lock()
            .iter()
            .find(|arena| arena.contains(addr))
            .map(Arc::clone)
    }

    /// Number of arenas currently owned.
    #[must_use]
    pub fn live_arena_count(&self) -> usize {
        self.shared.arenas.lock().len()
    }

    /// Runs one reclamation pass immediately. Returns how many arenas were
    /// released.
    pub fn sweep_now(&self) -> usize {
        self.shared.sweep()
    }
}

impl Drop for ArenaManager {
    fn drop(&mut self) {
        *self.shared.stop.lock() = true;
        self.shared.wakeup.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.shared.arenas.lock().clear();
    }
}

impl std::fmt::Debug for ArenaManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArenaManager")
            .field("arenas", &self.live_arena_count())
            .field("reclamation", &self.config.enable_reclamation)
            .finish()
    }
}

fn reclaimer_loop(shared: &ManagerShared, interval: Duration) {
    loop {
        {
            let mut stop = shared.stop.lock();
            if *stop {
                return;
            }
            let _ = shared.wakeup.wait_for(&mut stop, interval);
            if *stop {
                return;
            }
        }
        shared.sweep();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ManagerConfig {
        ManagerConfig::new(64 * 1024)
    }

    #[test]
    fn create_and_look_up_by_address() {
        let manager = ArenaManager::new(config());
        let a = manager.create_arena().expect("arena a");
        let b = manager.create_arena().expect("arena b");
        assert_eq!(manager.live_arena_count(), 2);

        let stats = AllocStats::new();
        let p = a.allocate(100, 16, &stats).expect("allocation");
        let owner = manager
            .arena_for(p.as_ptr() as usize)
            .expect("owning arena");
        assert!(Arc::ptr_eq(&owner, &a));
        assert!(manager.arena_for(0x10).is_none());
        drop(b);
    }

    #[test]
    fn sweep_releases_only_empty_unbound_arenas() {
        let manager = ArenaManager::new(config());
        let busy = manager.create_arena().expect("busy arena");
        let _idle = manager.create_arena().expect("idle arena");
        let bound = manager.create_arena().expect("bound arena");

        let stats = AllocStats::new();
        let p = busy.allocate(100, 16, &stats).expect("allocation");
        bound.bind();

        assert_eq!(manager.sweep_now(), 1);
        assert_eq!(manager.live_arena_count(), 2);

        busy.deallocate(p.as_ptr(), &stats);
        bound.unbind();
        assert_eq!(manager.sweep_now(), 2);
        assert_eq!(manager.live_arena_count(), 0);
    }

    #[test]
    fn reclaimer_worker_sweeps_on_its_own() {
        let mut cfg = config().with_reclamation();
        cfg.reclaim_interval = Duration::from_millis(20);
        let manager = ArenaManager::new(cfg);
        let _ = manager.create_arena().expect("arena");
        assert_eq!(manager.live_arena_count(), 1);

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while manager.live_arena_count() > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(manager.live_arena_count(), 0);
    }

    #[test]
    fn shutdown_joins_the_worker_promptly() {
        let mut cfg = config().with_reclamation();
        cfg.reclaim_interval = Duration::from_secs(3600);
        let manager = ArenaManager::new(cfg);
        let started = std::time::Instant::now();
        drop(manager);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn cross_arena_free_routes_by_range() {
        let manager = ArenaManager::new(config());
        let a = manager.create_arena().expect("arena a");
        let b = manager.create_arena().expect("arena b");
        let stats = AllocStats::new();

        let p = a.allocate(200, 16, &stats).expect("allocation");
        // Freeing through the wrong arena is rejected; the owner accepts.
        assert_eq!(
            b.deallocate(p.as_ptr(), &stats),
            FreeOutcome::ForeignPointer
        );
        let owner = manager.arena_for(p.as_ptr() as usize).expect("owner");
        assert_eq!(owner.deallocate(p.as_ptr(), &stats), FreeOutcome::Freed);
        assert_eq!(owner.used_bytes(), 0);
    }
}
