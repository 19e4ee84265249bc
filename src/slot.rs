//! Per-thread active-context slot.
//!
//! This is the only mutable state in the crate. Each thread lazily starts
//! with its own root context holding an empty store; the slot is torn down
//! with the thread. Borrows of the slot never span user code: callers take
//! an O(1) copy of the store, compute outside the borrow, and write back.
//! Replaced stores are dropped after the borrow is released so payload
//! destructors may themselves touch context variables. While the thread is
//! tearing the slot down, accessors see a detached empty store instead: reads
//! fall back to defaults and writes are discarded.

use std::cell::RefCell;
use std::mem;

use crate::context::{ContextId, ContextMap};

/// Active context identity and store version of one thread.
pub(crate) struct ActiveSlot {
    pub(crate) context: ContextId,
    pub(crate) store: ContextMap,
}

impl ActiveSlot {
    pub(crate) const fn new(context: ContextId, store: ContextMap) -> Self {
        Self { context, store }
    }

    /// Fresh context id with an empty store.
    fn detached() -> Self {
        Self::new(ContextId::new(), ContextMap::new())
    }
}

thread_local! {
    static ACTIVE: RefCell<ActiveSlot> = RefCell::new(ActiveSlot::detached());
}

/// Copies the active context id and store version.
pub(crate) fn snapshot() -> (ContextId, ContextMap) {
    ACTIVE
        .try_with(|slot| {
            let slot = slot.borrow();
            (slot.context, slot.store.clone())
        })
        .unwrap_or_else(|_| {
            let slot = ActiveSlot::detached();
            (slot.context, slot.store)
        })
}

/// Replaces the active store version, keeping the context id.
pub(crate) fn replace_store(store: ContextMap) {
    let previous = ACTIVE.try_with(|slot| mem::replace(&mut slot.borrow_mut().store, store));
    drop(previous);
}

/// Installs `next` and returns what was active before.
///
/// During teardown nothing can be installed and `next` comes straight back.
pub(crate) fn swap(next: ActiveSlot) -> ActiveSlot {
    let mut next = Some(next);
    let swapped = ACTIVE.try_with(|slot| {
        let next = next.take()?;
        Some(mem::replace(&mut *slot.borrow_mut(), next))
    });
    match swapped {
        Ok(Some(previous)) => previous,
        Ok(None) | Err(_) => next.unwrap_or_else(ActiveSlot::detached),
    }
}

/// Identity of the context active on the calling thread.
///
/// Outside any [`Context::run`](crate::Context::run) this is the thread's
/// root context, which stays the same for the lifetime of the thread.
#[must_use]
pub fn current_context_id() -> ContextId {
    ACTIVE
        .try_with(|slot| slot.borrow().context)
        .unwrap_or_else(|_| ActiveSlot::detached().context)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use crossbeam_channel::{bounded, Sender};

    use super::*;
    use crate::value::Value;
    use crate::var::{ContextVar, VarId};

    /// Reads a variable from its destructor and reports what it saw.
    struct ReadOnDrop {
        var: ContextVar<u32>,
        seen: Sender<u32>,
    }

    impl Drop for ReadOnDrop {
        fn drop(&mut self) {
            let _ = self.var.set(9);
            let _ = self.seen.send(self.var.get().unwrap_or(0));
        }
    }

    #[test]
    fn test_root_context_is_stable_per_thread() {
        let first = current_context_id();
        let second = current_context_id();
        assert_eq!(first, second);

        let other = thread::spawn(current_context_id).join().unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn test_replace_store_is_thread_local() {
        let id = VarId::new("slot_test");
        let store = snapshot().1.insert(id.clone(), Value::new(1u8));
        replace_store(store);
        assert!(snapshot().1.contains_key(&id));

        let seen_elsewhere = {
            let id = id.clone();
            thread::spawn(move || snapshot().1.contains_key(&id)).join().unwrap()
        };
        assert!(!seen_elsewhere);
    }

    #[test]
    fn test_swap_returns_previous_slot() {
        let (root_id, root_store) = snapshot();
        let installed = ContextId::new();
        let previous = swap(ActiveSlot::new(installed, ContextMap::new()));
        assert_eq!(previous.context, root_id);
        assert!(previous.store.ptr_eq(&root_store));
        assert_eq!(current_context_id(), installed);

        swap(previous);
        assert_eq!(current_context_id(), root_id);
    }

    #[test]
    fn test_payload_drop_during_thread_exit_sees_detached_store() {
        let (tx, rx) = bounded(1);
        let reader = ContextVar::with_default("teardown_reader", 7u32);
        let holder: ContextVar<Arc<ReadOnDrop>> = ContextVar::new("teardown_holder");

        let worker = thread::spawn(move || {
            let _ = holder.set(Arc::new(ReadOnDrop { var: reader, seen: tx }));
        });
        worker.join().unwrap();

        // The write inside the destructor is discarded; the read sees the default.
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
    }
}
