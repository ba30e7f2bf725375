//! Event log writer and flush coordination
//!
//! Producer threads append records into their own buffers through the
//! two-phase protocol in [`crate::handle`]. The writer owns the registry of
//! thread handles, the buffer arena and the sink, and moves buffered records
//! to the sink on overflow, on [`EventLogWriter::flush`] and on stop.
//!
//! Lock order: registry, then a handle's persist guard, then a buffer, then
//! the sink.

use crate::buffer::{BufferArena, SlotId, ThreadLocalBuffer};
use crate::capture::{CaptureControl, CaptureState};
use crate::handle::{self, local_handle, Teardown, ThreadHandle};
use crate::scope::{EventScope, ScopeMode};
use crate::stats::{StatsCounters, WriterStats};
use evlog_core::{
    error::{EvlogError, Result},
    observe,
    record::{record_size, EventHeader, EventNameHash, LogHeader, MAX_PAYLOAD_SIZE, PROLOG_SIZE},
    sink::{EventSink, OpenMode, SinkFactory, SinkInfo},
    WriterConfig,
};
use evlog_file_sink::{log_file_path, FileSinkFactory};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

static NEXT_WRITER_ID: AtomicU64 = AtomicU64::new(1);

/// Concurrent binary event logger
///
/// Cheap to clone; all clones share one log. Dropping the last clone stops the
/// writer, persisting everything still buffered.
///
/// # Example
///
/// ```no_run
/// use evlog::{EventLogWriter, EventNameHash, WriterConfig};
///
/// # fn main() -> evlog::Result<()> {
/// let writer = EventLogWriter::new(WriterConfig::default())?;
/// writer.start("./logs/run.azel")?;
///
/// if let Some(mut scope) = writer.record_event_begin(EventNameHash::from_name("tick"), 4, 0) {
///     scope.payload_mut().copy_from_slice(&7u32.to_le_bytes());
/// }
/// writer.record_string_event(EventNameHash::from_name("note"), "frame done", 0);
///
/// writer.stop()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct EventLogWriter {
    pub(crate) inner: Arc<WriterInner>,
}

pub(crate) struct WriterInner {
    id: u64,
    pub(crate) config: WriterConfig,
    pub(crate) arena: BufferArena,
    /// Coarse lock: registration, deregistration and flush passes
    pub(crate) registry: Mutex<Vec<Arc<ThreadHandle>>>,
    /// Fine lock: every byte written to the sink
    pub(crate) sink: Mutex<Option<Box<dyn EventSink>>>,
    pub(crate) factory: Arc<dyn SinkFactory>,
    pub(crate) stopped: AtomicBool,
    pub(crate) capture: CaptureControl,
    pub(crate) stats: StatsCounters,
}

impl EventLogWriter {
    /// Create a stopped writer backed by log files
    pub fn new(config: WriterConfig) -> Result<Self> {
        let factory = Arc::new(FileSinkFactory::new(config.write_buffer_size));
        Self::with_sink_factory(config, factory)
    }

    /// Create a stopped writer backed by a custom sink
    pub fn with_sink_factory(config: WriterConfig, factory: Arc<dyn SinkFactory>) -> Result<Self> {
        config.validate()?;
        let arena = BufferArena::new(config.arena_slots(), config.buffer_size);
        Ok(Self {
            inner: Arc::new(WriterInner {
                id: NEXT_WRITER_ID.fetch_add(1, Ordering::Relaxed),
                config,
                arena,
                registry: Mutex::new(Vec::new()),
                sink: Mutex::new(None),
                factory,
                stopped: AtomicBool::new(true),
                capture: CaptureControl::new(),
                stats: StatsCounters::default(),
            }),
        })
    }

    pub fn config(&self) -> &WriterConfig {
        &self.inner.config
    }

    /// Open `path` (truncating it), write the log header and accept events
    pub fn start(&self, path: impl AsRef<Path>) -> Result<()> {
        self.inner.start(path.as_ref())
    }

    /// Start logging into `<dir>/<hint>.<ext>`, returning the chosen path
    ///
    /// With `timestamp_log_files` set, the local time is appended to the hint.
    pub fn start_in(&self, dir: impl AsRef<Path>, hint: &str) -> Result<PathBuf> {
        let config = &self.inner.config;
        let path = log_file_path(
            dir.as_ref(),
            hint,
            config.timestamp_log_files,
            &config.file_extension,
        );
        self.inner.start(&path)?;
        Ok(path)
    }

    /// Refuse new events, persist every buffered record and close the sink
    ///
    /// During a performance capture the sink stays open until the last open
    /// event ends; the previous log is not reopened.
    pub fn stop(&self) -> Result<()> {
        self.inner.stop()
    }

    /// Persist every record committed before this call
    ///
    /// Events begun while the flush runs may or may not be included.
    pub fn flush(&self) -> Result<()> {
        let registry = self.inner.registry.lock();
        if self.inner.sink.lock().is_none() {
            return Ok(());
        }
        self.inner.flush_handles(&registry)
    }

    /// Reserve a record of `size` payload bytes for the calling thread
    ///
    /// The record is committed when the returned scope is dropped. Returns
    /// `None` while stopped, for records that can never fit a buffer, or when
    /// the thread already has a scope open.
    pub fn record_event_begin(
        &self,
        name: impl Into<EventNameHash>,
        size: u16,
        flags: u16,
    ) -> Option<EventScope<'_>> {
        self.inner.begin_event(name.into(), size, flags)
    }

    /// Record `payload` as one event; false if it was dropped
    pub fn record_event(&self, name: impl Into<EventNameHash>, payload: &[u8], flags: u16) -> bool {
        let name = name.into();
        let Ok(size) = u16::try_from(payload.len()) else {
            tracing::warn!(
                "Dropping event {}: {} byte payload exceeds the {} byte limit",
                name,
                payload.len(),
                MAX_PAYLOAD_SIZE
            );
            self.inner.drop_event("payload_too_large");
            return false;
        };
        match self.inner.begin_event(name, size, flags) {
            Some(mut scope) => {
                scope.payload_mut().copy_from_slice(payload);
                true
            }
            None => false,
        }
    }

    /// Record `text` as a string event (UTF-8, no terminator)
    pub fn record_string_event(&self, name: impl Into<EventNameHash>, text: &str, flags: u16) -> bool {
        self.record_event(name, text.as_bytes(), flags)
    }

    /// Deregister the calling thread, persisting its buffered records
    ///
    /// Returns `Ok(false)` if the thread was not registered or still has a
    /// scope open. A failed write still releases the thread and is returned
    /// as the error. The next event from this thread registers it again.
    pub fn release_current_thread(&self) -> Result<bool> {
        if let Some(handle) = local_handle(&self.inner, false) {
            if handle.pending().is_some() {
                tracing::warn!(
                    "Cannot release thread {} while it has an event open",
                    handle.thread_id()
                );
                return Ok(false);
            }
        }
        handle::release_local_handle(self.inner.id)
    }

    pub fn is_running(&self) -> bool {
        !self.inner.stopped.load(Ordering::Acquire)
    }

    /// Path of the open sink
    pub fn current_path(&self) -> Option<PathBuf> {
        self.inner.sink.lock().as_ref().map(|s| s.path().to_path_buf())
    }

    pub fn sink_info(&self) -> Option<SinkInfo> {
        self.inner.sink.lock().as_deref().map(SinkInfo::of)
    }

    pub fn registered_threads(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Bytes used in the calling thread's active buffer, Prolog space included
    pub fn thread_buffer_used_bytes(&self) -> Option<usize> {
        let handle = local_handle(&self.inner, false)?;
        let slot = handle.active()?;
        Some(self.inner.arena.slot(slot).buffer.lock().used_bytes())
    }

    pub fn stats(&self) -> WriterStats {
        let registered = self.registered_threads();
        self.inner.stats.snapshot(registered)
    }
}

impl std::fmt::Debug for EventLogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLogWriter")
            .field("id", &self.inner.id)
            .field("running", &self.is_running())
            .field("capture", &self.inner.capture.state())
            .finish()
    }
}

impl WriterInner {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Add a handle for `thread_id` to the registry
    pub(crate) fn register(self: &Arc<Self>, thread_id: u64) -> Option<Arc<ThreadHandle>> {
        let mut registry = self.registry.lock();
        let capture = self.capture.state();
        if matches!(capture, CaptureState::Draining | CaptureState::Finishing) {
            tracing::debug!(
                "Not registering thread {} while a performance capture drains",
                thread_id
            );
            return None;
        }
        if registry.len() >= self.config.max_threads {
            tracing::warn!(
                "Thread limit of {} reached, events from thread {} are dropped",
                self.config.max_threads,
                thread_id
            );
            return None;
        }

        let active = match self.arena.acquire(thread_id) {
            Ok(slot) => slot,
            Err(e) => {
                tracing::warn!("Failed to register thread {}: {}", thread_id, e);
                return None;
            }
        };
        let deferred = if capture == CaptureState::Active {
            match self.arena.acquire(thread_id) {
                Ok(slot) => Some(slot),
                Err(e) => {
                    self.arena.release(active);
                    tracing::warn!("Failed to register thread {}: {}", thread_id, e);
                    return None;
                }
            }
        } else {
            None
        };

        let handle = Arc::new(ThreadHandle::new(
            thread_id,
            active,
            deferred,
            Arc::downgrade(self),
        ));
        if deferred.is_some() {
            self.capture.add_outstanding();
        }
        registry.push(handle.clone());
        observe::set_registered_threads(registry.len());
        tracing::debug!("Registered thread {} with event log {}", thread_id, self.id);
        Some(handle)
    }

    /// Remove `handle` from the registry and persist what it still buffers
    ///
    /// The handle is gone even when a write fails; the first failure is
    /// returned.
    pub(crate) fn deregister(&self, handle: &Arc<ThreadHandle>, teardown: Teardown) -> Result<()> {
        let mut breach = None;
        let mut first_error = None;
        let mut finish = false;
        {
            let mut registry = self.registry.lock();
            let _guard = handle.persist_guard.lock();
            if !handle.detach() {
                return Ok(());
            }
            registry.retain(|h| !Arc::ptr_eq(h, handle));
            observe::set_registered_threads(registry.len());

            let holds_deferred = handle.deferred().is_some() && !handle.is_retired();
            for slot in [handle.take_deferred(), handle.take_active()]
                .into_iter()
                .flatten()
            {
                let refs = self.arena.slot(slot).ref_count();
                if refs == 0 {
                    if let Err(e) = self.persist_slot(slot) {
                        first_error.get_or_insert(e);
                    }
                } else {
                    breach = Some(EvlogError::InvariantBreach(format!(
                        "thread {} exited with {} event(s) still open",
                        handle.thread_id(),
                        refs
                    )));
                }
                self.arena.release(slot);
            }
            if holds_deferred {
                finish = self.capture.release_outstanding()
                    && self.capture.state() == CaptureState::Draining;
            }
        }
        tracing::debug!(
            "Deregistered thread {} from event log {}",
            handle.thread_id(),
            self.id
        );

        if finish {
            self.finish_capture();
        }
        if let Some(err) = breach {
            if teardown == Teardown::Explicit && !std::thread::panicking() {
                panic!("{}", err);
            }
            tracing::error!("{}", err);
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Give back the active buffer of a handle detached while it was writing
    pub(crate) fn reclaim_detached(&self, handle: &ThreadHandle) {
        if let Some(slot) = handle.take_active() {
            if self.arena.slot(slot).ref_count() == 0 {
                let _ = self.persist_slot(slot);
            }
            self.arena.release(slot);
        }
    }

    /// Refuse a record that can never be stored
    pub(crate) fn check_size(&self, name: EventNameHash, size: usize) -> bool {
        if size > MAX_PAYLOAD_SIZE {
            tracing::warn!(
                "Dropping event {}: {} byte payload exceeds the {} byte limit",
                name,
                size,
                MAX_PAYLOAD_SIZE
            );
            self.drop_event("payload_too_large");
            return false;
        }
        if record_size(size) + PROLOG_SIZE > self.config.buffer_size {
            tracing::warn!(
                "Dropping event {}: {} byte payload cannot fit a {} byte buffer",
                name,
                size,
                self.config.buffer_size
            );
            self.drop_event("exceeds_buffer");
            return false;
        }
        true
    }

    pub(crate) fn drop_event(&self, reason: &'static str) {
        self.stats.record_drop();
        observe::record_event_dropped(reason);
    }

    /// Claim the active buffer, counting the event as dropped if the handle
    /// was detached in the meantime
    pub(crate) fn claim_or_drop(&self, handle: &ThreadHandle) -> Option<SlotId> {
        let slot = handle.claim_active();
        if slot.is_none() {
            tracing::debug!(
                "Dropping event: thread {} was detached from event log {}",
                handle.thread_id(),
                self.id
            );
            self.drop_event("detached");
        }
        slot
    }

    pub(crate) fn begin_event(self: &Arc<Self>, name: EventNameHash, size: u16, flags: u16) -> Option<EventScope<'_>> {
        if self.is_stopped() || !self.check_size(name, size as usize) {
            return None;
        }
        match self.capture.state() {
            CaptureState::Disabled => self.begin_normal(name, size, flags),
            CaptureState::Active => {
                let claim = self.claim_for_capture(name, size, flags)?;
                claim.handle.set_pending(Some(claim.slot));
                Some(EventScope::new(
                    self,
                    claim.handle,
                    claim.slot,
                    claim.buffer,
                    claim.payload,
                    ScopeMode::Release {
                        generation: claim.generation,
                    },
                ))
            }
            CaptureState::Draining => {
                self.retire_current_thread();
                tracing::debug!("Dropping event {} while a performance capture drains", name);
                self.drop_event("capture_draining");
                None
            }
            CaptureState::Finishing => {
                self.drop_event("capture_finishing");
                None
            }
        }
    }

    fn begin_normal(self: &Arc<Self>, name: EventNameHash, size: u16, flags: u16) -> Option<EventScope<'_>> {
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

        let slot_id = self.claim_or_drop(&handle)?;
        let slot = self.arena.slot(slot_id);
        let header = EventHeader::new(name, size, flags);
        let mut buffer = slot.buffer.lock();
        if !buffer.fits(header.record_size()) {
            self.stats.record_overflow();
            observe::record_overflow();
            // A flush may still be persisting this thread's previous buffer.
            drop(buffer);
            let _guard = handle.persist_guard.lock();
            buffer = slot.buffer.lock();
            let _ = self.persist_buffer(&mut buffer, slot.thread_id());
        }
        let payload = buffer.append(header);
        handle.set_pending(Some(slot_id));

        Some(EventScope::new(
            self,
            handle,
            slot_id,
            buffer,
            payload,
            ScopeMode::Publish,
        ))
    }

    /// Stamp the Prolog, write `[0, used)` to the sink and reset the buffer
    ///
    /// The buffer is reset even when the write fails so the thread keeps
    /// logging.
    pub(crate) fn persist_buffer(&self, buffer: &mut ThreadLocalBuffer, thread_id: u64) -> Result<()> {
        if !buffer.has_events() {
            return Ok(());
        }
        buffer.stamp_prolog(thread_id);
        let bytes = buffer.used_bytes();
        let result = match self.sink.lock().as_mut() {
            Some(sink) => sink.write_all(buffer.chunk()),
            None => Err(EvlogError::InvalidState("event log is not started".into())),
        };
        buffer.reset();

        match result {
            Ok(()) => {
                self.stats.record_chunk(bytes);
                observe::record_chunk_written(bytes);
                Ok(())
            }
            Err(e) => {
                self.stats.record_write_error();
                tracing::error!(
                    "Failed to persist {} bytes of events from thread {}: {}",
                    bytes,
                    thread_id,
                    e
                );
                Err(e)
            }
        }
    }

    pub(crate) fn persist_slot(&self, slot: SlotId) -> Result<()> {
        let slot = self.arena.slot(slot);
        let mut buffer = slot.buffer.lock();
        self.persist_buffer(&mut buffer, slot.thread_id())
    }

    /// One flush call over the locked registry
    pub(crate) fn flush_handles(&self, registry: &[Arc<ThreadHandle>]) -> Result<()> {
        let started = Instant::now();
        let mut first_error = None;
        let mut passes = 0;

        if self.capture.state() == CaptureState::Disabled {
            let mut replacement = self.arena.acquire(0)?;
            let mut flushed = vec![false; registry.len()];
            loop {
                passes += 1;
                let mut all_flushed = true;
                for (i, handle) in registry.iter().enumerate() {
                    if flushed[i] {
                        continue;
                    }
                    let _guard = handle.persist_guard.lock();
                    // NO_SLOT: the owner is mid-write, retry on a later pass.
                    let Some(observed) = handle.active() else {
                        all_flushed = false;
                        continue;
                    };
                    self.arena
                        .slot(replacement)
                        .set_thread_id(handle.thread_id());
                    if !handle.swap_active(observed, replacement) {
                        all_flushed = false;
                        continue;
                    }

                    if let Err(e) = self.persist_slot(observed) {
                        first_error.get_or_insert(e);
                    }
                    replacement = observed;
                    flushed[i] = true;
                }
                if all_flushed {
                    break;
                }
                std::thread::yield_now();
            }
            self.arena.release(replacement);
        } else {
            passes = 1;
            for handle in registry {
                let _guard = handle.persist_guard.lock();
                if let Some(deferred) = handle.deferred() {
                    if self.arena.slot(deferred).ref_count() == 0 {
                        if let Err(e) = self.persist_slot(deferred) {
                            first_error.get_or_insert(e);
                        }
                    }
                }
            }
        }

        if let Some(sink) = self.sink.lock().as_mut() {
            let synced = if self.config.sync_on_flush {
                sink.sync()
            } else {
                sink.flush()
            };
            if let Err(e) = synced {
                tracing::error!("Failed to flush event log {}: {}", sink.path().display(), e);
                first_error.get_or_insert(e);
            }
        }

        self.stats.record_flush();
        observe::record_flush(started.elapsed(), passes);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Open a sink, writing the log header into empty files
    pub(crate) fn open_sink(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn EventSink>> {
        let mut sink = self.factory.open(path, mode)?;
        if sink.is_empty() {
            sink.write_all(&LogHeader::default().encode())?;
        }
        Ok(sink)
    }

    /// Flush and drop the sink, if any
    pub(crate) fn close_sink(&self) -> Result<()> {
        let Some(mut sink) = self.sink.lock().take() else {
            return Ok(());
        };
        let result = if self.config.sync_on_flush {
            sink.sync()
        } else {
            sink.flush()
        };
        tracing::debug!(
            "Closed event log {} ({} bytes)",
            sink.path().display(),
            sink.len()
        );
        result
    }

    fn start(&self, path: &Path) -> Result<()> {
        let _registry = self.registry.lock();
        if self.capture.state() != CaptureState::Disabled {
            return Err(EvlogError::InvalidState(
                "a performance capture is running".into(),
            ));
        }
        let mut sink = self.sink.lock();
        if let Some(open) = sink.as_ref() {
            return Err(EvlogError::InvalidState(format!(
                "event log already writing to {}",
                open.path().display()
            )));
        }

        *sink = Some(self.open_sink(path, OpenMode::Truncate)?);
        self.stopped.store(false, Ordering::Release);
        tracing::debug!("Started event log {}", path.display());
        Ok(())
    }

    pub(crate) fn stop(&self) -> Result<()> {
        let registry = self.registry.lock();
        self.stopped.store(true, Ordering::Release);

        let state = self.capture.state();
        if state != CaptureState::Disabled {
            // The capture closes once its last open event ends.
            tracing::info!("Event log stopped during a performance capture, draining it");
            self.capture.forget_previous_path();
            let mut first_error = None;
            let finished = match state {
                CaptureState::Active => self.begin_drain(&registry, &mut first_error),
                _ => registry
                    .iter()
                    .fold(false, |done, h| self.try_retire(h, &mut first_error) || done),
            };
            drop(registry);
            if finished {
                self.finish_capture();
            }
            return first_error.map_or(Ok(()), Err);
        }

        let flushed = if self.sink.lock().is_some() {
            self.flush_handles(&registry)
        } else {
            Ok(())
        };

        let closed = self.close_sink();
        flushed.and(closed)
    }
}

impl Drop for WriterInner {
    fn drop(&mut self) {
        if self.sink.get_mut().is_some() {
            if let Err(e) = self.stop() {
                tracing::warn!("Failed to stop event log on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evlog_core::record::LOG_HEADER_SIZE;
    use tempfile::TempDir;

    fn small_writer() -> (TempDir, EventLogWriter) {
        let temp_dir = TempDir::new().unwrap();
        let config = WriterConfig::default()
            .with_buffer_size(128)
            .with_max_threads(4);
        let writer = EventLogWriter::new(config).unwrap();
        (temp_dir, writer)
    }

    #[test]
    fn test_stopped_writer_refuses_events() {
        let (_temp, writer) = small_writer();
        assert!(!writer.is_running());
        assert!(writer.record_event_begin(EventNameHash(1), 4, 0).is_none());
        assert!(!writer.record_string_event(EventNameHash(1), "x", 0));
        assert_eq!(writer.registered_threads(), 0);
    }

    #[test]
    fn test_start_writes_log_header() {
        let (temp, writer) = small_writer();
        let path = temp.path().join("run.azel");
        writer.start(&path).unwrap();
        assert!(writer.is_running());
        assert_eq!(writer.current_path().as_deref(), Some(path.as_path()));
        writer.stop().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), LOG_HEADER_SIZE);
        assert_eq!(LogHeader::decode(&bytes).unwrap(), LogHeader::default());
        assert!(writer.current_path().is_none());
    }

    #[test]
    fn test_start_twice_fails() {
        let (temp, writer) = small_writer();
        writer.start(temp.path().join("a.azel")).unwrap();
        let err = writer.start(temp.path().join("b.azel")).unwrap_err();
        assert!(matches!(err, EvlogError::InvalidState(_)));
        writer.stop().unwrap();
    }

    #[test]
    fn test_start_in_builds_name() {
        let (temp, writer) = small_writer();
        let path = writer.start_in(temp.path().join("logs"), "session").unwrap();
        assert_eq!(path, temp.path().join("logs").join("session.azel"));
        writer.stop().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_oversized_record_dropped() {
        let (temp, writer) = small_writer();
        writer.start(temp.path().join("run.azel")).unwrap();

        // 128 byte buffer: Prolog plus a record of at most 112 bytes
        assert!(writer.record_event_begin(EventNameHash(1), 104, 0).is_some());
        assert!(writer.record_event_begin(EventNameHash(1), 105, 0).is_none());
        assert!(!writer.record_event(EventNameHash(1), &vec![0u8; MAX_PAYLOAD_SIZE + 1], 0));
        assert_eq!(writer.stats().events_dropped, 2);
        writer.stop().unwrap();
    }

    #[test]
    fn test_nested_begin_refused() {
        let (temp, writer) = small_writer();
        writer.start(temp.path().join("run.azel")).unwrap();

        let outer = writer.record_event_begin(EventNameHash(1), 0, 0).unwrap();
        assert!(writer.record_event_begin(EventNameHash(2), 0, 0).is_none());
        assert!(!writer.release_current_thread().unwrap());
        outer.finish();

        assert!(writer.record_event_begin(EventNameHash(2), 0, 0).is_some());
        writer.stop().unwrap();
    }

    #[test]
    fn test_release_current_thread_persists() {
        let (temp, writer) = small_writer();
        let path = temp.path().join("run.azel");
        writer.start(&path).unwrap();

        assert!(writer.record_string_event(EventNameHash(3), "abc", 0));
        assert_eq!(writer.registered_threads(), 1);
        assert!(writer.release_current_thread().unwrap());
        assert_eq!(writer.registered_threads(), 0);
        assert!(!writer.release_current_thread().unwrap());

        // Prolog (16) + record (16) written at release time
        assert_eq!(writer.stats().bytes_written, 32);
        writer.stop().unwrap();
    }

    #[test]
    fn test_thread_limit() {
        let temp = TempDir::new().unwrap();
        let writer =
            EventLogWriter::new(WriterConfig::default().with_buffer_size(64).with_max_threads(1))
                .unwrap();
        writer.start(temp.path().join("run.azel")).unwrap();
        assert!(writer.record_event(EventNameHash(1), b"", 0));

        let other = writer.clone();
        let recorded = std::thread::spawn(move || other.record_event(EventNameHash(1), b"", 0))
            .join()
            .unwrap();
        assert!(!recorded);
        writer.stop().unwrap();
    }

    #[test]
    fn test_drop_stops_writer() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run.azel");
        {
            let writer = EventLogWriter::new(WriterConfig::default().with_buffer_size(64)).unwrap();
            writer.start(&path).unwrap();
            writer.record_event(EventNameHash(9), b"tail", 0);
        }
        let len = std::fs::metadata(&path).unwrap().len() as usize;
        assert_eq!(len, LOG_HEADER_SIZE + PROLOG_SIZE + 16);
    }

    #[test]
    fn test_claim_on_detached_handle_counts_drop() {
        let (temp, writer) = small_writer();
        writer.start(temp.path().join("run.azel")).unwrap();

        let handle = writer.inner.register(7).unwrap();
        writer.inner.registry.lock().retain(|h| !Arc::ptr_eq(h, &handle));
        assert!(handle.detach());
        let slot = handle.take_active().unwrap();
        writer.inner.arena.release(slot);

        assert_eq!(writer.inner.claim_or_drop(&handle), None);
        assert_eq!(writer.stats().events_dropped, 1);
        writer.stop().unwrap();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = EventLogWriter::new(WriterConfig::default().with_buffer_size(8));
        assert!(matches!(result, Err(EvlogError::Config(_))));
    }
}
