//! Per-thread byte buffers and the arena that owns them
//!
//! Buffers are addressed by [`SlotId`] rather than by pointer. A thread handle
//! publishes the id of its active buffer through an atomic; whoever wins the
//! compare-and-swap on that atomic is the only party allowed to append to
//! the buffer. The mutex around each buffer is otherwise only taken by
//! performance event tokens filling in their payload.

use evlog_core::{
    error::{EvlogError, Result},
    record::{write_prolog, EventHeader, HEADER_SIZE, PROLOG_SIZE},
};
use parking_lot::Mutex;
use std::ops::Range;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Raw value stored in handle atomics when no buffer is published
pub(crate) const NO_SLOT: u32 = u32::MAX;

/// Index of a buffer slot in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SlotId(u32);

impl SlotId {
    pub(crate) fn from_raw(raw: u32) -> Option<Self> {
        (raw != NO_SLOT).then_some(Self(raw))
    }

    pub(crate) fn raw(self) -> u32 {
        self.0
    }

    pub(crate) fn raw_or_none(slot: Option<Self>) -> u32 {
        slot.map_or(NO_SLOT, Self::raw)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Fixed-capacity byte arena holding a sequence of encoded records
///
/// The first [`PROLOG_SIZE`] bytes are reserved for the chunk's Prolog, which
/// is stamped only when the buffer is persisted.
#[derive(Debug)]
pub struct ThreadLocalBuffer {
    bytes: Box<[u8]>,
    used: usize,
}

impl ThreadLocalBuffer {
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity >= PROLOG_SIZE);
        Self {
            bytes: vec![0u8; capacity].into_boxed_slice(),
            used: PROLOG_SIZE,
        }
    }

    fn unallocated() -> Self {
        Self {
            bytes: Box::default(),
            used: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Offset of the next free byte
    pub fn used_bytes(&self) -> usize {
        self.used
    }

    /// Whether anything beyond the Prolog placeholder was written
    pub fn has_events(&self) -> bool {
        self.used > PROLOG_SIZE
    }

    pub fn fits(&self, write_size: usize) -> bool {
        self.used + write_size <= self.bytes.len()
    }

    /// Append a header and reserve its zeroed payload and padding.
    ///
    /// Returns the payload's byte range. The caller must have checked
    /// [`fits`](Self::fits).
    pub fn append(&mut self, header: EventHeader) -> Range<usize> {
        let write_size = header.record_size();
        assert!(self.fits(write_size), "record does not fit the buffer");

        let start = self.used;
        let record = &mut self.bytes[start..start + write_size];
        record.fill(0);
        header.write_to(record);
        self.used += write_size;

        let payload_start = start + HEADER_SIZE;
        payload_start..payload_start + header.size as usize
    }

    pub fn payload(&self, range: Range<usize>) -> &[u8] {
        &self.bytes[range]
    }

    pub fn payload_mut(&mut self, range: Range<usize>) -> &mut [u8] {
        &mut self.bytes[range]
    }

    /// Overwrite the reserved head with a Prolog for `thread_id`
    pub fn stamp_prolog(&mut self, thread_id: u64) {
        write_prolog(&mut self.bytes[..PROLOG_SIZE], thread_id);
    }

    /// Bytes `[0, used)`, Prolog included
    pub fn chunk(&self) -> &[u8] {
        &self.bytes[..self.used]
    }

    /// Forget the persisted records, keeping room for the next Prolog
    pub fn reset(&mut self) {
        self.used = PROLOG_SIZE;
    }
}

/// One arena entry: a buffer plus the bookkeeping readable without its lock
///
/// `refs` packs the slot generation (high 32 bits) with the count of open
/// capture events (low 32 bits) so a stale release can never hit a recycled
/// slot.
#[derive(Debug)]
pub(crate) struct BufferSlot {
    thread_id: AtomicU64,
    refs: AtomicU64,
    pub(crate) buffer: Mutex<ThreadLocalBuffer>,
}

impl BufferSlot {
    fn new() -> Self {
        Self {
            thread_id: AtomicU64::new(0),
            refs: AtomicU64::new(0),
            buffer: Mutex::new(ThreadLocalBuffer::unallocated()),
        }
    }

    pub(crate) fn thread_id(&self) -> u64 {
        self.thread_id.load(Ordering::Acquire)
    }

    pub(crate) fn set_thread_id(&self, thread_id: u64) {
        self.thread_id.store(thread_id, Ordering::Release);
    }

    pub(crate) fn ref_count(&self) -> u32 {
        self.refs.load(Ordering::Acquire) as u32
    }

    pub(crate) fn generation(&self) -> u32 {
        (self.refs.load(Ordering::Acquire) >> 32) as u32
    }

    /// Count one more open event; returns the generation it belongs to
    pub(crate) fn add_ref(&self) -> u32 {
        let previous = self.refs.fetch_add(1, Ordering::AcqRel);
        debug_assert!((previous as u32) < u32::MAX, "ref count overflow");
        (previous >> 32) as u32
    }

    /// Drop one open event of `generation`.
    ///
    /// Returns the remaining count, or `None` when the slot was recycled since
    /// the event began.
    pub(crate) fn release_ref(&self, generation: u32) -> Option<u32> {
        self.refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| {
                let count = refs as u32;
                ((refs >> 32) as u32 == generation && count > 0).then(|| refs - 1)
            })
            .ok()
            .map(|previous| previous as u32 - 1)
    }

    fn bump_generation(&self) {
        let _ = self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| {
                let generation = ((refs >> 32) as u32).wrapping_add(1);
                Some((generation as u64) << 32)
            });
    }
}

/// Pre-sized pool of buffer slots
///
/// Slot memory is allocated when a slot is acquired and freed when it is
/// released, so an idle arena costs only its bookkeeping.
pub(crate) struct BufferArena {
    slots: Box<[BufferSlot]>,
    free: Mutex<Vec<u32>>,
    buffer_size: usize,
}

impl BufferArena {
    pub(crate) fn new(slot_count: usize, buffer_size: usize) -> Self {
        let slots = (0..slot_count).map(|_| BufferSlot::new()).collect();
        // Pop from the back so low ids are handed out first.
        let free = (0..slot_count as u32).rev().collect();
        Self {
            slots,
            free: Mutex::new(free),
            buffer_size,
        }
    }

    pub(crate) fn slot(&self, id: SlotId) -> &BufferSlot {
        &self.slots[id.index()]
    }

    /// Take a free slot and give it a fresh buffer owned by `thread_id`
    pub(crate) fn acquire(&self, thread_id: u64) -> Result<SlotId> {
        let raw = self.free.lock().pop().ok_or_else(|| {
            EvlogError::ResourceExhaustion(format!(
                "all {} event buffers are in use",
                self.slots.len()
            ))
        })?;
        let id = SlotId(raw);
        let slot = self.slot(id);
        *slot.buffer.lock() = ThreadLocalBuffer::new(self.buffer_size);
        slot.set_thread_id(thread_id);
        Ok(id)
    }

    /// Free a slot's memory and return it to the pool.
    ///
    /// The caller must own the slot: no handle may still publish it.
    pub(crate) fn release(&self, id: SlotId) {
        let slot = self.slot(id);
        {
            let mut buffer = slot.buffer.lock();
            *buffer = ThreadLocalBuffer::unallocated();
            slot.bump_generation();
        }
        slot.set_thread_id(0);
        self.free.lock().push(id.raw());
    }
}
