//! Per-producer-thread state
//!
//! Each thread that records events through a writer gets one [`ThreadHandle`],
//! created on first use and registered with the writer. The handle lives in a
//! thread-local list keyed by writer id; dropping that list entry (at thread
//! exit, or through `EventLogWriter::release_current_thread`) deregisters the
//! handle and persists whatever it still buffers.

use crate::buffer::{SlotId, NO_SLOT};
use crate::writer::WriterInner;
use evlog_core::error::Result;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
    static LOCAL_HANDLES: RefCell<Vec<LocalHandle>> = const { RefCell::new(Vec::new()) };
}

/// Stable id of the calling thread, as written into Prologs
///
/// Ids are assigned from a process-wide counter starting at 1.
pub fn current_thread_id() -> u64 {
    THREAD_ID.try_with(|id| *id).unwrap_or(0)
}

/// How a handle is being torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Teardown {
    /// Thread-local destructor at thread exit
    ThreadExit,
    /// `release_current_thread` on a live thread
    Explicit,
}

pub(crate) struct ThreadHandle {
    thread_id: u64,
    /// Slot the thread appends into, or `NO_SLOT` while the thread is mid-write
    active: AtomicU32,
    /// Slot claimed by an open `EventScope`; only the owning thread touches it
    pending: AtomicU32,
    /// Second buffer held while capturing
    deferred: AtomicU32,
    detached: AtomicBool,
    retired: AtomicBool,
    /// Serializes persisting this thread's buffers, and deferred-buffer
    /// transitions while capturing
    pub(crate) persist_guard: Mutex<()>,
    owner: Weak<WriterInner>,
}

impl ThreadHandle {
    pub(crate) fn new(
        thread_id: u64,
        active: SlotId,
        deferred: Option<SlotId>,
        owner: Weak<WriterInner>,
    ) -> Self {
        Self {
            thread_id,
            active: AtomicU32::new(active.raw()),
            pending: AtomicU32::new(NO_SLOT),
            deferred: AtomicU32::new(SlotId::raw_or_none(deferred)),
            detached: AtomicBool::new(false),
            retired: AtomicBool::new(false),
            persist_guard: Mutex::new(()),
            owner,
        }
    }

    pub(crate) fn thread_id(&self) -> u64 {
        self.thread_id
    }

    pub(crate) fn active(&self) -> Option<SlotId> {
        SlotId::from_raw(self.active.load(Ordering::Acquire))
    }

    /// Take the active buffer away from everyone else.
    ///
    /// Swaps the published slot for `NO_SLOT`, retrying with the freshly
    /// observed value until the swap lands. Coordinators only ever replace a
    /// published slot with another one, so the loop resolves in a handful of
    /// iterations. Returns `None` once the handle has been detached.
    pub(crate) fn claim_active(&self) -> Option<SlotId> {
        let mut observed = self.active.load(Ordering::Acquire);
        loop {
            if observed == NO_SLOT {
                if self.is_detached() {
                    return None;
                }
                std::hint::spin_loop();
                observed = self.active.load(Ordering::Acquire);
                continue;
            }
            match self.active.compare_exchange_weak(
                observed,
                NO_SLOT,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return SlotId::from_raw(observed),
                Err(actual) => observed = actual,
            }
        }
    }

    /// Single claim attempt for a thread that does not own the handle
    pub(crate) fn try_claim_active(&self) -> Option<SlotId> {
        let observed = SlotId::from_raw(self.active.load(Ordering::Acquire))?;
        self.active
            .compare_exchange(observed.raw(), NO_SLOT, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| observed)
    }

    /// Hand a claimed buffer back, making it visible to coordinators again
    pub(crate) fn publish_active(&self, slot: SlotId) {
        while self
            .active
            .compare_exchange_weak(NO_SLOT, slot.raw(), Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            std::hint::spin_loop();
        }
    }

    /// Coordinator-side claim: replace `observed` with `replacement`.
    ///
    /// Fails when the owner claimed the buffer in the meantime.
    pub(crate) fn swap_active(&self, observed: SlotId, replacement: SlotId) -> bool {
        self.active
            .compare_exchange(
                observed.raw(),
                replacement.raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Detach the active buffer for teardown; `None` if the owner holds it
    pub(crate) fn take_active(&self) -> Option<SlotId> {
        SlotId::from_raw(self.active.swap(NO_SLOT, Ordering::AcqRel))
    }

    pub(crate) fn pending(&self) -> Option<SlotId> {
        SlotId::from_raw(self.pending.load(Ordering::Relaxed))
    }

    pub(crate) fn set_pending(&self, slot: Option<SlotId>) {
        self.pending
            .store(SlotId::raw_or_none(slot), Ordering::Relaxed);
    }

    pub(crate) fn deferred(&self) -> Option<SlotId> {
        SlotId::from_raw(self.deferred.load(Ordering::Acquire))
    }

    pub(crate) fn set_deferred(&self, slot: Option<SlotId>) {
        self.deferred
            .store(SlotId::raw_or_none(slot), Ordering::Release);
    }

    pub(crate) fn take_deferred(&self) -> Option<SlotId> {
        SlotId::from_raw(self.deferred.swap(NO_SLOT, Ordering::AcqRel))
    }

    pub(crate) fn is_live(&self) -> bool {
        self.owner.strong_count() > 0
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    /// Mark the handle dead; returns false if it already was
    pub(crate) fn detach(&self) -> bool {
        !self.detached.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub(crate) fn set_retired(&self) {
        self.retired.store(true, Ordering::Release);
    }
}

struct LocalHandle {
    writer_id: u64,
    handle: Arc<ThreadHandle>,
    teardown: Teardown,
}

impl Drop for LocalHandle {
    fn drop(&mut self) {
        if let Some(owner) = self.handle.owner.upgrade() {
            // Write failures are logged and counted by the writer.
            let _ = owner.deregister(&self.handle, self.teardown);
        }
    }
}

/// Resolve the calling thread's handle for `writer`.
///
/// With `register` set, a missing or detached handle is replaced by a freshly
/// registered one. Returns `None` when registration is refused or the thread is
/// already tearing down its thread-locals.
pub(crate) fn local_handle(writer: &Arc<WriterInner>, register: bool) -> Option<Arc<ThreadHandle>> {
    LOCAL_HANDLES
        .try_with(|cell| {
            let (existing, stale) = {
                let mut handles = cell.borrow_mut();
                // Entries of dropped writers have nothing left to deregister from.
                handles.retain(|h| h.handle.is_live());
                match handles.iter().position(|h| h.writer_id == writer.id()) {
                    Some(pos) if !handles[pos].handle.is_detached() => {
                        (Some(handles[pos].handle.clone()), None)
                    }
                    Some(pos) => (None, Some(handles.swap_remove(pos))),
                    None => (None, None),
                }
            };
            // Dropped outside the borrow: its destructor calls back into the writer.
            drop(stale);

            if existing.is_some() || !register {
                return existing;
            }

            let handle = writer.register(current_thread_id())?;
            cell.borrow_mut().push(LocalHandle {
                writer_id: writer.id(),
                handle: handle.clone(),
                teardown: Teardown::ThreadExit,
            });
            Some(handle)
        })
        .ok()
        .flatten()
}

/// Remove the calling thread's entry for `writer_id`, deregistering it
///
/// Returns `Ok(false)` when the thread has no entry for that writer.
pub(crate) fn release_local_handle(writer_id: u64) -> Result<bool> {
    let removed = LOCAL_HANDLES
        .try_with(|cell| {
            let mut handles = cell.borrow_mut();
            handles
                .iter()
                .position(|h| h.writer_id == writer_id)
                .map(|pos| handles.swap_remove(pos))
        })
        .ok()
        .flatten();
    let Some(local) = removed else {
        return Ok(false);
    };

    let result = match local.handle.owner.upgrade() {
        Some(owner) => owner.deregister(&local.handle, Teardown::Explicit),
        None => Ok(()),
    };
    // Already detached, so dropping the entry deregisters nothing.
    drop(local);
    result.map(|()| true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(active: u32) -> ThreadHandle {
        ThreadHandle::new(
            9,
            SlotId::from_raw(active).unwrap(),
            None,
            Weak::new(),
        )
    }

    #[test]
    fn test_thread_ids_are_stable_and_distinct() {
        let here = current_thread_id();
        assert_eq!(here, current_thread_id());
        assert_ne!(here, 0);

        let there = std::thread::spawn(current_thread_id).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn test_claim_and_publish() {
        let handle = handle(4);
        let slot = handle.claim_active().unwrap();
        assert_eq!(slot.raw(), 4);
        assert_eq!(handle.active(), None);

        handle.publish_active(slot);
        assert_eq!(handle.active(), Some(slot));
    }

    #[test]
    fn test_swap_fails_while_claimed() {
        let handle = handle(4);
        let observed = handle.active().unwrap();
        let replacement = SlotId::from_raw(5).unwrap();

        let claimed = handle.claim_active().unwrap();
        assert!(!handle.swap_active(observed, replacement));
        assert_eq!(handle.try_claim_active(), None);
        handle.publish_active(claimed);

        assert!(handle.swap_active(observed, replacement));
        assert_eq!(handle.active(), Some(replacement));
    }

    #[test]
    fn test_pending_and_deferred() {
        let handle = handle(1);
        assert_eq!(handle.pending(), None);
        handle.set_pending(SlotId::from_raw(1));
        assert_eq!(handle.pending().map(SlotId::raw), Some(1));
        handle.set_pending(None);

        handle.set_deferred(SlotId::from_raw(2));
        assert_eq!(handle.take_deferred().map(SlotId::raw), Some(2));
        assert_eq!(handle.deferred(), None);
    }

    #[test]
    fn test_detach_once() {
        let handle = handle(1);
        assert!(handle.detach());
        assert!(!handle.detach());
        assert!(handle.is_detached());
    }

    #[test]
    fn test_claim_gives_up_on_detached_handle() {
        let handle = handle(1);
        assert!(handle.take_active().is_some());
        handle.detach();
        assert_eq!(handle.claim_active(), None);
    }
}
