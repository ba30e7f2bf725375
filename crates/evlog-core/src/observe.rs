//! Optional metrics instrumentation for evlog.
//!
//! When the `observe` feature is enabled, the writer emits counters,
//! histograms, and gauges via the [`metrics`] crate. A downstream
//! application must install a metrics recorder (e.g. `metrics-exporter-prometheus`)
//! to collect the data.
//!
//! When the feature is **not** enabled every function in this module is a
//! zero-cost no-op.

/// Record a chunk persisted to the sink.
///
/// - `evlog.sink.chunks_total` – counter
/// - `evlog.sink.bytes_total` – counter
#[inline]
pub fn record_chunk_written(bytes: usize) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("evlog.sink.chunks_total").increment(1);
        metrics::counter!("evlog.sink.bytes_total").increment(bytes as u64);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = bytes;
    }
}

/// Record an event dropped before any bytes were written.
///
/// - `evlog.events.dropped_total` – counter with `reason` label
#[inline]
pub fn record_event_dropped(reason: &'static str) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("evlog.events.dropped_total", "reason" => reason).increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = reason;
    }
}

/// Record a buffer written inline by its producer because it was full.
///
/// - `evlog.buffer.overflow_writes_total` – counter
#[inline]
pub fn record_overflow() {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("evlog.buffer.overflow_writes_total").increment(1);
    }
}

/// Record a flush call (counter + duration + passes needed).
///
/// - `evlog.flush.total` – counter
/// - `evlog.flush.duration_seconds` – histogram
/// - `evlog.flush.passes` – histogram
#[inline]
pub fn record_flush(duration: std::time::Duration, passes: usize) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("evlog.flush.total").increment(1);
        metrics::histogram!("evlog.flush.duration_seconds").record(duration.as_secs_f64());
        metrics::histogram!("evlog.flush.passes").record(passes as f64);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (duration, passes);
    }
}

/// Set the registered producer thread gauge.
///
/// - `evlog.threads.registered` – gauge
#[inline]
pub fn set_registered_threads(count: usize) {
    #[cfg(feature = "observe")]
    {
        metrics::gauge!("evlog.threads.registered").set(count as f64);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = count;
    }
}

/// Set the deferred buffers still outstanding during a capture drain.
///
/// - `evlog.capture.deferred_outstanding` – gauge
#[inline]
pub fn set_deferred_outstanding(count: usize) {
    #[cfg(feature = "observe")]
    {
        metrics::gauge!("evlog.capture.deferred_outstanding").set(count as f64);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = count;
    }
}
