//! Open event guard

use crate::buffer::{SlotId, ThreadLocalBuffer};
use crate::handle::ThreadHandle;
use crate::writer::WriterInner;
use parking_lot::MutexGuard;
use std::ops::Range;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub(crate) enum ScopeMode {
    /// Hand the buffer back to the handle on commit
    Publish,
    /// Performance capture: also drop the event's buffer reference
    Release { generation: u32 },
}

/// An event reserved by [`EventLogWriter::record_event_begin`](crate::EventLogWriter::record_event_begin)
///
/// The payload bytes start zeroed. Dropping the scope (or calling
/// [`finish`](Self::finish)) commits the record; until then no flush can see
/// it. The scope is tied to the thread that opened it.
pub struct EventScope<'w> {
    writer: &'w WriterInner,
    handle: Arc<ThreadHandle>,
    slot: SlotId,
    buffer: Option<MutexGuard<'w, ThreadLocalBuffer>>,
    payload: Range<usize>,
    mode: ScopeMode,
}

impl<'w> EventScope<'w> {
    pub(crate) fn new(
        writer: &'w WriterInner,
        handle: Arc<ThreadHandle>,
        slot: SlotId,
        buffer: MutexGuard<'w, ThreadLocalBuffer>,
        payload: Range<usize>,
        mode: ScopeMode,
    ) -> Self {
        Self {
            writer,
            handle,
            slot,
            buffer: Some(buffer),
            payload,
            mode,
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn payload(&self) -> &[u8] {
        match &self.buffer {
            Some(buffer) => buffer.payload(self.payload.clone()),
            None => &[],
        }
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        match &mut self.buffer {
            Some(buffer) => buffer.payload_mut(self.payload.clone()),
            None => &mut [],
        }
    }

    /// Copy `bytes` to the start of the payload, returning how many fit
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let payload = self.payload_mut();
        let n = bytes.len().min(payload.len());
        payload[..n].copy_from_slice(&bytes[..n]);
        n
    }

    /// Commit the record
    pub fn finish(self) {}
}

impl Drop for EventScope<'_> {
    fn drop(&mut self) {
        drop(self.buffer.take());
        self.handle.publish_active(self.slot);
        self.handle.set_pending(None);
        if let ScopeMode::Release { generation } = self.mode {
            self.writer
                .end_capture_event(&self.handle, self.slot, generation);
        }
        self.writer.stats.record_event();
        if self.handle.is_detached() {
            self.writer.reclaim_detached(&self.handle);
        }
    }
}

impl std::fmt::Debug for EventScope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventScope")
            .field("thread_id", &self.handle.thread_id())
            .field("len", &self.len())
            .field("mode", &self.mode)
            .finish()
    }
}
