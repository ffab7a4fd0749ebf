//! Fixed-capacity registry mapping integer handles to live nodes.
//!
//! The engine cannot carry a reference to its owning node, only an opaque
//! integer. Every callback resolves that integer here. Slots hold weak
//! references, so a resolved node is either fully alive or absent.
//!
//! Ordering contract:
//! - a handle is registered before the engine learns it
//! - a handle is released only after the engine and every tracked task
//!   have stopped

use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::error::NodeError;
use crate::node::NodeShared;

/// Maximum number of simultaneously live nodes per process.
pub const HANDLE_CAPACITY: usize = 8;

/// Opaque integer identifying a live node to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(usize);

impl NodeHandle {
    /// Reconstruct a handle from the integer the engine carried.
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Slot<T> {
    used: AtomicBool,
    node: RwLock<Option<Weak<T>>>,
}

impl<T> Slot<T> {
    const fn new() -> Self {
        Self {
            used: AtomicBool::new(false),
            node: parking_lot::const_rwlock(None),
        }
    }
}

/// Slot array with atomic occupancy flags.
pub struct HandleTable<T> {
    slots: [Slot<T>; HANDLE_CAPACITY],
}

impl<T> HandleTable<T> {
    pub const fn new() -> Self {
        Self {
            slots: [const { Slot::new() }; HANDLE_CAPACITY],
        }
    }

    /// Claim a free slot. Fails once every slot is occupied.
    pub fn acquire(&self) -> Result<NodeHandle, NodeError> {
        for (index, slot) in self.slots.iter().enumerate() {
            if slot
                .used
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(NodeHandle(index));
            }
        }
        Err(NodeError::HandlesExhausted)
    }

    /// Bind a node to an acquired handle.
    pub fn register(&self, handle: NodeHandle, node: &Arc<T>) {
        if let Some(slot) = self.slots.get(handle.0)
            && slot.used.load(Ordering::Acquire)
        {
            *slot.node.write() = Some(Arc::downgrade(node));
        }
    }

    /// The live node behind `handle`, if any.
    pub fn resolve(&self, handle: NodeHandle) -> Option<Arc<T>> {
        let slot = self.slots.get(handle.0)?;
        if !slot.used.load(Ordering::Acquire) {
            return None;
        }
        slot.node.read().as_ref()?.upgrade()
    }

    /// Return a handle to the pool. The node reference is cleared first.
    pub fn release(&self, handle: NodeHandle) {
        if let Some(slot) = self.slots.get(handle.0) {
            *slot.node.write() = None;
            slot.used.store(false, Ordering::Release);
        }
    }

    /// Number of occupied slots.
    pub fn in_use(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.used.load(Ordering::Acquire))
            .count()
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases an acquired handle on drop unless construction completed.
pub(crate) struct HandleReservation<'a, T> {
    table: &'a HandleTable<T>,
    handle: NodeHandle,
    armed: bool,
}

impl<'a, T> HandleReservation<'a, T> {
    pub(crate) fn acquire(table: &'a HandleTable<T>) -> Result<Self, NodeError> {
        Ok(Self {
            table,
            handle: table.acquire()?,
            armed: true,
        })
    }

    pub(crate) fn handle(&self) -> NodeHandle {
        self.handle
    }

    /// Keep the handle; the caller now owns its release.
    pub(crate) fn keep(mut self) -> NodeHandle {
        self.armed = false;
        self.handle
    }
}

impl<T> Drop for HandleReservation<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.table.release(self.handle);
        }
    }
}

static NODES: HandleTable<NodeShared> = HandleTable::new();

/// The process-wide table of live nodes.
pub(crate) fn nodes() -> &'static HandleTable<NodeShared> {
    &NODES
}

/// Whether `handle` currently resolves to a live node.
pub fn is_live(handle: NodeHandle) -> bool {
    NODES.resolve(handle).is_some()
}

/// Number of handles currently held by nodes in this process.
pub fn handles_in_use() -> usize {
    NODES.in_use()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_until_exhausted() {
        let table: HandleTable<u32> = HandleTable::new();
        let handles: Vec<_> = (0..HANDLE_CAPACITY)
            .map(|_| table.acquire().unwrap())
            .collect();
        assert_eq!(table.in_use(), HANDLE_CAPACITY);
        assert!(matches!(table.acquire(), Err(NodeError::HandlesExhausted)));

        let mut raw: Vec<usize> = handles.iter().map(|h| h.as_raw()).collect();
        raw.dedup();
        assert_eq!(raw.len(), HANDLE_CAPACITY);
    }

    #[test]
    fn released_handle_is_reused() {
        let table: HandleTable<u32> = HandleTable::new();
        let handles: Vec<_> = (0..HANDLE_CAPACITY)
            .map(|_| table.acquire().unwrap())
            .collect();
        table.release(handles[3]);
        assert_eq!(table.acquire().unwrap(), handles[3]);
    }

    #[test]
    fn resolve_follows_registration_and_release() {
        let table: HandleTable<String> = HandleTable::new();
        let node = Arc::new("node".to_string());
        let h = table.acquire().unwrap();

        assert!(table.resolve(h).is_none());
        table.register(h, &node);
        assert_eq!(table.resolve(h).as_deref(), Some(&"node".to_string()));

        table.release(h);
        assert!(table.resolve(h).is_none());
    }

    #[test]
    fn resolve_after_drop_is_none() {
        let table: HandleTable<u8> = HandleTable::new();
        let h = table.acquire().unwrap();
        let node = Arc::new(7u8);
        table.register(h, &node);
        drop(node);
        assert!(table.resolve(h).is_none());
    }

    #[test]
    fn out_of_range_handle_is_ignored() {
        let table: HandleTable<u8> = HandleTable::new();
        let bogus = NodeHandle::from_raw(HANDLE_CAPACITY + 3);
        assert!(table.resolve(bogus).is_none());
        table.register(bogus, &Arc::new(1));
        table.release(bogus);
        assert_eq!(table.in_use(), 0);
    }

    #[test]
    fn register_on_free_slot_is_ignored() {
        let table: HandleTable<u8> = HandleTable::new();
        let node = Arc::new(1u8);
        table.register(NodeHandle::from_raw(0), &node);
        assert!(table.resolve(NodeHandle::from_raw(0)).is_none());
    }

    #[test]
    fn reservation_releases_unless_kept() {
        let table: HandleTable<u8> = HandleTable::new();
        {
            let r = HandleReservation::acquire(&table).unwrap();
            assert_eq!(r.handle().as_raw(), 0);
            assert_eq!(table.in_use(), 1);
        }
        assert_eq!(table.in_use(), 0);

        let kept = HandleReservation::acquire(&table).unwrap().keep();
        assert_eq!(table.in_use(), 1);
        table.release(kept);
        assert_eq!(table.in_use(), 0);
    }

    #[test]
    fn concurrent_acquire_never_duplicates() {
        let table: Arc<HandleTable<u8>> = Arc::new(HandleTable::new());
        let threads: Vec<_> = (0..16)
            .map(|_| {
                let t = Arc::clone(&table);
                std::thread::spawn(move || t.acquire().ok())
            })
            .collect();
        let mut got: Vec<usize> = threads
            .into_iter()
            .filter_map(|t| t.join().unwrap())
            .map(|h| h.as_raw())
            .collect();
        got.sort_unstable();
        assert_eq!(got, (0..HANDLE_CAPACITY).collect::<Vec<_>>());
    }
}
