//! Performance capture mode
//!
//! While a capture is active every thread owns two buffers. Events take a
//! reference on the buffer they were written into, and a buffer is only
//! persisted once its references are gone. When the active buffer overflows
//! while still referenced it becomes the thread's deferred buffer and the idle
//! deferred buffer takes its place; needing a second deferred generation is a
//! protocol violation.
//!
//! Stopping a capture does not block. Each thread retires (persists both
//! buffers and gives the deferred one back) once its references are gone, and
//! whichever thread retires the last deferred buffer closes the capture file
//! and reopens the log that was active before the capture.
//!
//! ```text
//! Disabled --start--> Active --stop--> Draining --last retire--> Finishing --> Disabled
//! ```

use crate::buffer::{SlotId, ThreadLocalBuffer};
use crate::handle::{local_handle, ThreadHandle};
use crate::writer::{EventLogWriter, WriterInner};
use evlog_core::{
    error::{EvlogError, Result},
    observe,
    record::{EventHeader, EventNameHash},
    sink::OpenMode,
};
use parking_lot::{Mutex, MutexGuard};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

/// Performance capture state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CaptureState {
    /// Normal logging
    Disabled = 0,
    /// Capturing with reference-counted buffers
    Active = 1,
    /// Stop requested, waiting for deferred buffers to drain
    Draining = 2,
    /// Last deferred buffer drained, restoring the previous log
    Finishing = 3,
}

impl CaptureState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Active,
            2 => Self::Draining,
            3 => Self::Finishing,
            _ => Self::Disabled,
        }
    }
}

pub(crate) struct CaptureControl {
    state: AtomicU8,
    /// Registered handles still holding a deferred buffer
    outstanding: AtomicUsize,
    /// Log to reopen once the capture finishes
    previous_path: Mutex<Option<PathBuf>>,
}

impl CaptureControl {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(CaptureState::Disabled as u8),
            outstanding: AtomicUsize::new(0),
            previous_path: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> CaptureState {
        CaptureState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`; false if another thread got there first
    pub(crate) fn transition(&self, from: CaptureState, to: CaptureState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn set(&self, state: CaptureState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn begin(&self, previous_path: Option<PathBuf>) {
        *self.previous_path.lock() = previous_path;
        self.reset_outstanding();
        self.set(CaptureState::Active);
    }

    fn take_previous_path(&self) -> Option<PathBuf> {
        self.previous_path.lock().take()
    }

    /// Let the capture finish without reopening the previous log
    pub(crate) fn forget_previous_path(&self) {
        if let Some(path) = self.take_previous_path() {
            tracing::debug!("Performance capture will not reopen {}", path.display());
        }
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub(crate) fn add_outstanding(&self) {
        let count = self.outstanding.fetch_add(1, Ordering::AcqRel) + 1;
        observe::set_deferred_outstanding(count);
    }

    /// Count one deferred buffer as drained; true when it was the last one
    pub(crate) fn release_outstanding(&self) -> bool {
        match self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(previous) => {
                observe::set_deferred_outstanding(previous - 1);
                previous == 1
            }
            Err(_) => false,
        }
    }

    fn reset_outstanding(&self) {
        self.outstanding.store(0, Ordering::Release);
        observe::set_deferred_outstanding(0);
    }
}

/// A record reserved in capture mode, active buffer still claimed
pub(crate) struct CaptureClaim<'w> {
    pub(crate) handle: Arc<ThreadHandle>,
    pub(crate) slot: SlotId,
    pub(crate) buffer: MutexGuard<'w, ThreadLocalBuffer>,
    pub(crate) payload: Range<usize>,
    pub(crate) generation: u32,
}

impl WriterInner {
    pub(crate) fn claim_for_capture(
        self: &Arc<Self>,
        name: EventNameHash,
        size: u16,
        flags: u16,
    ) -> Option<CaptureClaim<'_>> {
        let handle = match local_handle(self, true) {
            Some(handle) => handle,
            None => {
                self.drop_event("unregistered");
                return None;
            }
        };
        if handle.pending().is_some() {
            tracing::warn!(
                "Nested event {} on thread {} ignored, finish the open event first",
                name,
                handle.thread_id()
            );
            self.drop_event("nested");
            return None;
        }

        let header = EventHeader::new(name, size, flags);
        let (slot_id, buffer, payload, generation) = {
            let guard = handle.persist_guard.lock();
            // Retirement happens under the guard; once past this check the
            // handle cannot retire until the new reference is gone.
            let state = self.capture.state();
            if state != CaptureState::Active || handle.is_retired() {
                drop(guard);
                tracing::debug!(
                    "Dropping event {}: performance capture stopped on thread {}",
                    name,
                    handle.thread_id()
                );
                if state == CaptureState::Draining && self.try_retire(&handle, &mut None) {
                    self.finish_capture();
                }
                self.drop_event("capture_stopped");
                return None;
            }
            let mut slot_id = self.claim_or_drop(&handle)?;
            let fits = self
                .arena
                .slot(slot_id)
                .buffer
                .lock()
                .fits(header.record_size());
            if !fits {
                slot_id = self.make_room(&handle, slot_id);
            }

            let slot = self.arena.slot(slot_id);
            let mut buffer = slot.buffer.lock();
            let payload = buffer.append(header);
            let generation = slot.add_ref();
            (slot_id, buffer, payload, generation)
        };

        Some(CaptureClaim {
            handle,
            slot: slot_id,
            buffer,
            payload,
            generation,
        })
    }

    /// Free space for the next record of a full active buffer.
    ///
    /// Returns the slot to append into. Called with the handle's persist guard
    /// held and its active buffer claimed.
    fn make_room(&self, handle: &ThreadHandle, active: SlotId) -> SlotId {
        let deferred = handle.deferred();
        if let Some(deferred) = deferred {
            if self.arena.slot(deferred).ref_count() == 0 {
                let _ = self.persist_slot(deferred);
            }
        }

        if self.arena.slot(active).ref_count() == 0 {
            self.stats.record_overflow();
            observe::record_overflow();
            let _ = self.persist_slot(active);
            return active;
        }

        match deferred {
            Some(deferred) if self.arena.slot(deferred).ref_count() == 0 => {
                tracing::debug!(
                    "Thread {} deferring a buffer with {} open event(s)",
                    handle.thread_id(),
                    self.arena.slot(active).ref_count()
                );
                handle.set_deferred(Some(active));
                deferred
            }
            _ => {
                handle.publish_active(active);
                let err = EvlogError::ProtocolViolation(format!(
                    "thread {} overflowed again while its deferred buffer still has {} open event(s); \
                     deferred events must end within one overflow cycle",
                    handle.thread_id(),
                    deferred.map_or(0, |d| self.arena.slot(d).ref_count())
                ));
                tracing::error!("{}", err);
                panic!("{}", err);
            }
        }
    }

    /// Drop one event reference taken in capture mode
    pub(crate) fn end_capture_event(&self, handle: &ThreadHandle, slot: SlotId, generation: u32) {
        let Some(remaining) = self.arena.slot(slot).release_ref(generation) else {
            tracing::debug!("Ignoring the end of an event whose buffer was recycled");
            return;
        };
        if remaining > 0 {
            return;
        }

        match self.capture.state() {
            CaptureState::Active => {
                let _guard = handle.persist_guard.lock();
                if handle.deferred() == Some(slot) && self.arena.slot(slot).ref_count() == 0 {
                    let _ = self.persist_slot(slot);
                }
            }
            CaptureState::Draining => {
                if self.try_retire(handle, &mut None) {
                    self.finish_capture();
                }
            }
            CaptureState::Disabled | CaptureState::Finishing => {}
        }
    }

    /// Persist both buffers of an idle handle and give its deferred slot back.
    ///
    /// Returns true when this retired the last outstanding deferred buffer.
    /// The handle retires even if a write fails; the first failure is kept in
    /// `first_error`.
    pub(crate) fn try_retire(
        &self,
        handle: &ThreadHandle,
        first_error: &mut Option<EvlogError>,
    ) -> bool {
        let _guard = handle.persist_guard.lock();
        if handle.is_retired() || handle.is_detached() {
            return false;
        }
        let Some(deferred) = handle.deferred() else {
            return false;
        };
        if self.arena.slot(deferred).ref_count() > 0 {
            return false;
        }
        // Fails while the owner is mid-write; its own end retries.
        let Some(active) = handle.try_claim_active() else {
            return false;
        };
        if self.arena.slot(active).ref_count() > 0 {
            handle.publish_active(active);
            return false;
        }

        for slot in [deferred, active] {
            if let Err(e) = self.persist_slot(slot) {
                first_error.get_or_insert(e);
            }
        }
        handle.publish_active(active);
        if let Some(deferred) = handle.take_deferred() {
            self.arena.release(deferred);
        }
        handle.set_retired();
        tracing::debug!("Thread {} drained its deferred buffer", handle.thread_id());
        self.capture.release_outstanding()
    }

    pub(crate) fn retire_current_thread(self: &Arc<Self>) {
        if let Some(handle) = local_handle(self, false) {
            if handle.pending().is_none() && self.try_retire(&handle, &mut None) {
                self.finish_capture();
            }
        }
    }

    /// Close the capture file and reopen the log it replaced
    pub(crate) fn finish_capture(&self) {
        // Serializes with `stop`, which may cancel the restore below.
        let _registry = self.registry.lock();
        if !self
            .capture
            .transition(CaptureState::Draining, CaptureState::Finishing)
        {
            return;
        }

        if let Err(e) = self.close_sink() {
            tracing::error!("Failed to close performance capture: {}", e);
        }

        let mut restored = false;
        match self.capture.take_previous_path() {
            Some(path) => match self.open_sink(&path, OpenMode::Append) {
                Ok(sink) => {
                    *self.sink.lock() = Some(sink);
                    restored = true;
                    tracing::info!(
                        "Stopped performance capture, resumed event log {}",
                        path.display()
                    );
                }
                Err(e) => tracing::error!(
                    "Failed to reopen event log {} after performance capture: {}",
                    path.display(),
                    e
                ),
            },
            None => tracing::info!("Stopped performance capture"),
        }

        self.stopped.store(!restored, Ordering::Release);
        self.capture.set(CaptureState::Disabled);
    }

    /// Detach every handle, persist idle buffers and free all slots
    pub(crate) fn clear_all_thread_storage(
        &self,
        registry: &mut Vec<Arc<ThreadHandle>>,
    ) -> Result<()> {
        let mut first_error = None;
        for handle in registry.drain(..) {
            let _guard = handle.persist_guard.lock();
            handle.detach();
            for slot in [handle.take_deferred(), handle.take_active()]
                .into_iter()
                .flatten()
            {
                if self.arena.slot(slot).ref_count() == 0 {
                    if let Err(e) = self.persist_slot(slot) {
                        first_error.get_or_insert(e);
                    }
                }
                self.arena.release(slot);
            }
        }
        self.capture.reset_outstanding();
        observe::set_registered_threads(0);
        first_error.map_or(Ok(()), Err)
    }

    fn start_capture(&self, path: &Path) -> Result<()> {
        let mut registry = self.registry.lock();
        if self.capture.state() != CaptureState::Disabled {
            return Err(EvlogError::InvalidState(
                "a performance capture is already running".into(),
            ));
        }
        tracing::info!("Starting performance capture {}", path.display());

        let previous = self.sink.lock().as_ref().map(|s| s.path().to_path_buf());
        self.stopped.store(true, Ordering::Release);
        if previous.is_some() {
            if let Err(e) = self.flush_handles(&registry) {
                tracing::warn!("Flush before performance capture failed: {}", e);
            }
            if let Err(e) = self.close_sink() {
                tracing::warn!("Closing event log before performance capture failed: {}", e);
            }
        }
        if let Err(e) = self.clear_all_thread_storage(&mut registry) {
            tracing::warn!("Persisting thread buffers before performance capture failed: {}", e);
        }

        match self.open_sink(path, OpenMode::Truncate) {
            Ok(sink) => {
                *self.sink.lock() = Some(sink);
                self.capture.begin(previous);
                self.stopped.store(false, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    "Failed to start performance capture at {}: {}",
                    path.display(),
                    e
                );
                if let Some(previous) = previous {
                    match self.open_sink(&previous, OpenMode::Append) {
                        Ok(sink) => {
                            *self.sink.lock() = Some(sink);
                            self.stopped.store(false, Ordering::Release);
                        }
                        Err(reopen) => tracing::error!(
                            "Failed to reopen event log {}: {}",
                            previous.display(),
                            reopen
                        ),
                    }
                }
                Err(e)
            }
        }
    }

    /// Move an active capture to Draining and retire every idle handle.
    ///
    /// Returns true when nothing is left to drain. Caller holds the registry.
    pub(crate) fn begin_drain(
        &self,
        registry: &[Arc<ThreadHandle>],
        first_error: &mut Option<EvlogError>,
    ) -> bool {
        if !self
            .capture
            .transition(CaptureState::Active, CaptureState::Draining)
        {
            return false;
        }
        tracing::info!(
            "Stopping performance capture, {} deferred buffer(s) outstanding",
            self.capture.outstanding()
        );

        let mut finished = self.capture.outstanding() == 0;
        for handle in registry {
            if self.try_retire(handle, first_error) {
                finished = true;
            }
        }
        finished
    }

    fn stop_capture(&self) {
        let registry = self.registry.lock();
        if self.capture.state() != CaptureState::Active {
            tracing::debug!("No performance capture to stop");
            return;
        }
        let mut first_error = None;
        let finished = self.begin_drain(&registry, &mut first_error);
        drop(registry);
        if let Some(e) = first_error {
            tracing::warn!("Persisting buffers while stopping performance capture failed: {}", e);
        }

        if finished {
            self.finish_capture();
        }
    }
}

impl EventLogWriter {
    /// Switch to performance capture, writing into a fresh log at `path`
    ///
    /// The current log is flushed and closed first. If `path` cannot be
    /// opened, the previous log is reopened in append mode and the error is
    /// returned.
    pub fn start_performance_capture(&self, path: impl AsRef<Path>) -> Result<()> {
        self.inner.start_capture(path.as_ref())
    }

    /// Request the end of the capture without waiting for open events
    ///
    /// Performance mode stays enabled until every deferred buffer drained.
    pub fn stop_performance_capture(&self) {
        self.inner.stop_capture();
    }

    pub fn is_performance_mode_enabled(&self) -> bool {
        self.inner.capture.state() != CaptureState::Disabled
    }

    pub fn capture_state(&self) -> CaptureState {
        self.inner.capture.state()
    }

    /// Threads whose deferred buffer has not drained yet
    pub fn deferred_outstanding(&self) -> usize {
        self.inner.capture.outstanding()
    }

    /// Reserve a capture record that may be filled and ended later
    ///
    /// Only available while a capture is active. The returned token can move
    /// to another thread; the record reaches the log once the token and every
    /// other event in its buffer have ended.
    pub fn begin_performance_event(
        &self,
        name: impl Into<EventNameHash>,
        size: u16,
        flags: u16,
    ) -> Option<PerformanceEvent> {
        let inner = &self.inner;
        let name = name.into();
        if inner.is_stopped() {
            return None;
        }
        match inner.capture.state() {
            CaptureState::Active => {}
            CaptureState::Draining => {
                inner.retire_current_thread();
                inner.drop_event("capture_draining");
                return None;
            }
            CaptureState::Disabled | CaptureState::Finishing => {
                tracing::warn!(
                    "Performance event {} ignored, performance mode is disabled",
                    name
                );
                inner.drop_event("capture_disabled");
                return None;
            }
        }
        if !inner.check_size(name, size as usize) {
            return None;
        }

        let CaptureClaim {
            handle,
            slot,
            buffer,
            payload,
            generation,
        } = inner.claim_for_capture(name, size, flags)?;
        drop(buffer);
        handle.publish_active(slot);

        Some(PerformanceEvent {
            writer: self.clone(),
            handle,
            slot,
            generation,
            payload,
        })
    }
}

/// Capture record whose payload can be filled after its begin call
///
/// Holds one reference on the buffer it lives in; dropping the token (or
/// calling [`end`](Self::end)) releases it.
pub struct PerformanceEvent {
    writer: EventLogWriter,
    handle: Arc<ThreadHandle>,
    slot: SlotId,
    generation: u32,
    payload: Range<usize>,
}

impl PerformanceEvent {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Id of the thread whose buffer holds the record
    pub fn thread_id(&self) -> u64 {
        self.handle.thread_id()
    }

    /// Copy `bytes` into the payload at `offset`
    pub fn write_payload(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(bytes.len())
            .filter(|end| *end <= self.payload.len())
            .ok_or_else(|| {
                EvlogError::InvalidState(format!(
                    "write of {} bytes at offset {} exceeds the {} byte payload",
                    bytes.len(),
                    offset,
                    self.payload.len()
                ))
            })?;
        self.with_payload(|payload| payload[offset..end].copy_from_slice(bytes))
    }

    /// Run `f` on the payload bytes
    pub fn with_payload<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        let slot = self.writer.inner.arena.slot(self.slot);
        let mut buffer = slot.buffer.lock();
        if slot.generation() != self.generation {
            return Err(EvlogError::InvalidState(
                "event buffer was recycled before the event ended".into(),
            ));
        }
        Ok(f(buffer.payload_mut(self.payload.clone())))
    }

    /// Commit the record
    pub fn end(self) {}
}

impl Drop for PerformanceEvent {
    fn drop(&mut self) {
        let inner = &self.writer.inner;
        inner.stats.record_event();
        inner.end_capture_event(&self.handle, self.slot, self.generation);
    }
}

impl std::fmt::Debug for PerformanceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceEvent")
            .field("thread_id", &self.handle.thread_id())
            .field("len", &self.len())
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        let control = CaptureControl::new();
        assert_eq!(control.state(), CaptureState::Disabled);
        assert!(!control.transition(CaptureState::Active, CaptureState::Draining));

        control.begin(Some(PathBuf::from("before.azel")));
        assert_eq!(control.state(), CaptureState::Active);
        assert!(control.transition(CaptureState::Active, CaptureState::Draining));
        assert!(control.transition(CaptureState::Draining, CaptureState::Finishing));
        assert!(!control.transition(CaptureState::Draining, CaptureState::Finishing));
        assert_eq!(control.take_previous_path(), Some(PathBuf::from("before.azel")));
    }

    #[test]
    fn test_outstanding_counts_down_once() {
        let control = CaptureControl::new();
        control.add_outstanding();
        control.add_outstanding();
        assert!(!control.release_outstanding());
        assert!(control.release_outstanding());
        assert!(!control.release_outstanding());
        assert_eq!(control.outstanding(), 0);
    }

    #[test]
    fn test_forget_previous_path_keeps_capture_running() {
        let control = CaptureControl::new();
        control.begin(Some(PathBuf::from("before.azel")));
        control.add_outstanding();
        control.forget_previous_path();
        assert_eq!(control.state(), CaptureState::Active);
        assert_eq!(control.outstanding(), 1);
        assert_eq!(control.take_previous_path(), None);
    }
}
