//! Allocation seam for the objects an SRQ owns.
//!
//! The memory itself is owned by ordinary Rust values. An `ObjectAllocator` only
//! decides whether a new SRQ or receive WQE may exist, and is told when one goes
//! away. Every allocation is paired with exactly one deallocation through
//! [`Slot`], which releases on drop.
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Srq,
    RecvWqe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocationError {
    /// The allocator can't back another object of this kind.
    #[error("Out of memory for {0:?}")]
    OutOfMemory(ObjectKind),
}

impl From<AllocationError> for Error {
    fn from(other: AllocationError) -> Self {
        let AllocationError::OutOfMemory(kind) = other;
        match kind {
            ObjectKind::Srq => Error::ResourceExhausted("no memory for SRQ"),
            ObjectKind::RecvWqe => Error::ResourceExhausted("no memory for receive WQE"),
        }
    }
}

pub trait ObjectAllocator: Send + Sync {
    fn allocate(&self, kind: ObjectKind) -> Result<(), AllocationError>;
    fn deallocate(&self, kind: ObjectKind);
}

#[derive(Debug, Default)]
struct LiveCounters {
    srqs: AtomicUsize,
    wqes: AtomicUsize,
}

impl LiveCounters {
    #[inline]
    fn get(&self, kind: ObjectKind) -> &AtomicUsize {
        match kind {
            ObjectKind::Srq => &self.srqs,
            ObjectKind::RecvWqe => &self.wqes,
        }
    }
}

/// Never refuses an allocation. Keeps track of how many objects are alive.
#[derive(Debug, Default)]
pub struct SystemAllocator {
    live: LiveCounters,
}

impl SystemAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn live(&self, kind: ObjectKind) -> usize {
        self.live.get(kind).load(Ordering::Acquire)
    }
}

impl ObjectAllocator for SystemAllocator {
    fn allocate(&self, kind: ObjectKind) -> Result<(), AllocationError> {
        self.live.get(kind).fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn deallocate(&self, kind: ObjectKind) {
        self.live.get(kind).fetch_sub(1, Ordering::AcqRel);
    }
}

/// Caps the number of live objects per kind, like a fixed-size slab cache.
#[derive(Debug)]
pub struct QuotaAllocator {
    max_srqs: usize,
    max_wqes: usize,
    live: LiveCounters,
}

impl QuotaAllocator {
    pub fn new(max_srqs: usize, max_wqes: usize) -> Self {
        QuotaAllocator {
            max_srqs,
            max_wqes,
            live: LiveCounters::default(),
        }
    }

    #[inline]
    pub fn live(&self, kind: ObjectKind) -> usize {
        self.live.get(kind).load(Ordering::Acquire)
    }

    #[inline]
    fn quota(&self, kind: ObjectKind) -> usize {
        match kind {
            ObjectKind::Srq => self.max_srqs,
            ObjectKind::RecvWqe => self.max_wqes,
        }
    }
}

impl ObjectAllocator for QuotaAllocator {
    fn allocate(&self, kind: ObjectKind) -> Result<(), AllocationError> {
        let quota = self.quota(kind);
        self.live
            .get(kind)
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < quota).then_some(live + 1)
            })
            .map(|_| ())
            .map_err(|_| AllocationError::OutOfMemory(kind))
    }

    fn deallocate(&self, kind: ObjectKind) {
        self.live.get(kind).fetch_sub(1, Ordering::AcqRel);
    }
}

/// One granted allocation. Dropping the slot hands it back to the allocator.
pub(crate) struct Slot {
    allocator: Arc<dyn ObjectAllocator>,
    kind: ObjectKind,
}

impl Slot {
    pub(crate) fn acquire(
        allocator: &Arc<dyn ObjectAllocator>,
        kind: ObjectKind,
    ) -> Result<Self, AllocationError> {
        allocator.allocate(kind)?;
        Ok(Slot {
            allocator: Arc::clone(allocator),
            kind,
        })
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.allocator.deallocate(self.kind);
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot").field("kind", &self.kind).finish()
    }
}
