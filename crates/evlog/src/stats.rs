//! Writer counters
//!
//! Always-on atomics mirroring the optional `observe` metrics, readable through
//! [`EventLogWriter::stats`](crate::EventLogWriter::stats).

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live writer counters
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    events_recorded: AtomicU64,
    events_dropped: AtomicU64,
    chunks_written: AtomicU64,
    bytes_written: AtomicU64,
    overflow_writes: AtomicU64,
    flushes: AtomicU64,
    write_errors: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_event(&self) {
        self.events_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_drop(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_chunk(&self, bytes: usize) {
        self.chunks_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_overflow(&self) {
        self.overflow_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, registered_threads: usize) -> WriterStats {
        WriterStats {
            events_recorded: self.events_recorded.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            chunks_written: self.chunks_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            overflow_writes: self.overflow_writes.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            registered_threads,
        }
    }
}

/// Snapshot of writer activity since construction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    /// Events whose scope or token completed
    pub events_recorded: u64,

    /// Events refused before any byte was written
    pub events_dropped: u64,

    /// Chunks (Prolog plus records) persisted to the sink
    pub chunks_written: u64,

    /// Chunk bytes persisted, log headers excluded
    pub bytes_written: u64,

    /// Buffers persisted inline by their producer because they were full
    pub overflow_writes: u64,

    pub flushes: u64,

    pub write_errors: u64,

    /// Producer threads currently registered
    pub registered_threads: usize,
}

impl WriterStats {
    /// Average chunk size in bytes
    pub fn average_chunk_size(&self) -> f64 {
        if self.chunks_written == 0 {
            0.0
        } else {
            self.bytes_written as f64 / self.chunks_written as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let counters = StatsCounters::default();
        counters.record_event();
        counters.record_event();
        counters.record_drop();
        counters.record_chunk(48);
        counters.record_chunk(16);
        counters.record_overflow();

        let stats = counters.snapshot(3);
        assert_eq!(stats.events_recorded, 2);
        assert_eq!(stats.events_dropped, 1);
        assert_eq!(stats.chunks_written, 2);
        assert_eq!(stats.bytes_written, 64);
        assert_eq!(stats.overflow_writes, 1);
        assert_eq!(stats.registered_threads, 3);
        assert_eq!(stats.average_chunk_size(), 32.0);
    }

    #[test]
    fn test_empty_average() {
        assert_eq!(WriterStats::default().average_chunk_size(), 0.0);
    }
}
