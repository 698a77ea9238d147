use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use fnv::FnvBuildHasher;

use crate::Handle;

/// Handle-indexed table of live objects.
///
/// The table only holds weak references: an object stays alive as long as its
/// users hold an `Arc`, and removes itself from the table when it is dropped.
#[derive(Debug)]
pub(crate) struct ResourceTable<R> {
    table: DashMap<Handle, Weak<R>, FnvBuildHasher>,
    next_handle: AtomicU64,
}

impl<R> Default for ResourceTable<R> {
    fn default() -> Self {
        ResourceTable {
            table: DashMap::default(),
            next_handle: AtomicU64::new(0),
        }
    }
}

impl<R> ResourceTable<R> {
    #[inline]
    pub(crate) fn allocate_handle(&self) -> Handle {
        Handle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn insert(&self, h: Handle, r: &Arc<R>) {
        let prev = self.table.insert(h, Arc::downgrade(r));
        debug_assert!(prev.is_none(), "handle {:?} reused", h);
    }

    pub(crate) fn get(&self, h: &Handle) -> Option<Arc<R>> {
        self.table.get(h).and_then(|r| r.upgrade())
    }

    pub(crate) fn remove(&self, h: &Handle) -> bool {
        self.table.remove(h).is_some()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.table.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_entry_is_not_returned() {
        let table = ResourceTable::default();
        let h = table.allocate_handle();
        let r = Arc::new(5u32);
        table.insert(h, &r);
        assert_eq!(table.get(&h).as_deref(), Some(&5));
        drop(r);
        assert!(table.get(&h).is_none());
        assert!(table.remove(&h));
        assert!(!table.remove(&h));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn handles_are_unique() {
        let table: ResourceTable<()> = ResourceTable::default();
        let a = table.allocate_handle();
        let b = table.allocate_handle();
        assert_ne!(a, b);
    }
}
