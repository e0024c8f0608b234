//! # mosaic-core
//!
//! A family of in-process arena allocators built on contiguous byte regions
//! carved from the host allocator, with in-place block metadata and
//! first-fit placement.
//!
//! # Architecture
//!
//! - **Block metadata** (`block`): boundary-tagged headers/footers written
//!   in place at computed offsets
//! - **Backing regions** (`region`): RAII ownership of host-allocated ranges
//! - **Arenas** (`arena`): the `basic` (no coalescing) and `coalescing`
//!   (boundary-tag merge) allocation engines
//! - **Small cache** (`small_cache`): thread-private size-classed chunk
//!   cache for requests up to 256 bytes
//! - **Stats** (`stats`): atomic usage counters with consistent snapshots
//! - **Manager** (`manager`): arena collection, address-range lookup, and
//!   the optional background reclaimer
//! - **Facades** (`single_thread`, `thread_safe`, `per_thread`): the four
//!   public allocator variants
//! - **Trace** (`trace`): bounded structured records of rejected frees and
//!   corruption skips

#![deny(unsafe_code)]

pub mod arena;
pub mod block;
pub mod error;
pub mod manager;
pub mod per_thread;
pub mod region;
pub mod single_thread;
pub mod small_cache;
pub mod stats;
pub mod thread_safe;
pub mod trace;

pub use arena::FreeOutcome;
pub use error::CreateError;
pub use manager::{ArenaManager, ManagedArena, ManagerConfig};
pub use per_thread::{PerThreadAllocator, PerThreadConfig};
pub use single_thread::{BasicAllocator, CoalescingAllocator};
pub use stats::{AllocStats, StatsSnapshot};
pub use thread_safe::{ThreadSafeBasicAllocator, ThreadSafeCoalescingAllocator};
pub use trace::{drain_anomalies, AnomalyKind, AnomalyRecord};
