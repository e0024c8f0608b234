//! Structured records of rejected operations.
//!
//! Every free that the allocators refuse (null, foreign, corrupt metadata,
//! double free) is classified and recorded here instead of aborting or
//! repairing. The buffer is bounded: once full, the oldest record is
//! evicted. Tests and debugging drain it; production callers may ignore it
//! entirely.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Maximum retained records; older entries are evicted first.
const ANOMALY_CAPACITY: usize = 256;

/// Classification of a rejected operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyKind {
    /// Pointer outside every known region and without a small-chunk tag.
    ForeignFree,
    /// Metadata at the pointer failed the magic or sanity checks.
    CorruptHeader,
    /// The block was already free.
    DoubleFree,
    /// A free-list node failed validation during a walk and the walk was
    /// cut short.
    CorruptFreeList,
}

/// One rejected operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnomalyRecord {
    pub kind: AnomalyKind,
    /// Address involved, if any.
    pub addr: usize,
}

static ANOMALIES: Mutex<VecDeque<AnomalyRecord>> = Mutex::new(VecDeque::new());

/// Appends a record, evicting the oldest past capacity.
pub(crate) fn record(kind: AnomalyKind, addr: usize) {
    let mut buf = ANOMALIES.lock();
    if buf.len() >= ANOMALY_CAPACITY {
        buf.pop_front();
    }
    buf.push_back(AnomalyRecord { kind, addr });
}

/// Removes and returns all retained records.
pub fn drain_anomalies() -> Vec<AnomalyRecord> {
    ANOMALIES.lock().drain(..).collect()
}
