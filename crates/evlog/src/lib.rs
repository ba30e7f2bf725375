//! evlog: a concurrent, low-overhead binary event logger
//!
//! evlog provides:
//! - **Per-thread buffers**: producers append records without locks, using a
//!   two-phase claim/publish protocol on their own buffer
//! - **Flush coordination**: one coordinator swaps buffers out from under
//!   running producers and persists them to an append-only log
//! - **Performance capture**: a mode that defers persistence with per-buffer
//!   reference counts so events can stay open across buffer overflows
//! - **Reader**: a sequential cursor that attributes records to threads
//!
//! # Quick Start
//!
//! ```no_run
//! use evlog::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let writer = EventLogWriter::new(WriterConfig::default())?;
//! writer.start("./logs/run.azel")?;
//!
//! if let Some(mut scope) = writer.record_event_begin(EventNameHash(0x1111), 4, 0) {
//!     scope.payload_mut().copy_from_slice(b"ABCD");
//! }
//! writer.stop()?;
//!
//! for record in EventLogReader::read_log("./logs/run.azel")?.data_records() {
//!     let record = record?;
//!     println!("{} {:?}", record.name, record.payload);
//! }
//! # Ok(())
//! # }
//! ```

mod buffer;
pub mod capture;
mod handle;
pub mod prelude;
pub mod reader;
pub mod scope;
pub mod stats;
pub mod writer;

// Re-export core types
pub use evlog_core::{
    config::WriterConfig,
    error::{EvlogError, Result},
    record::{
        EventHeader, EventNameHash, LogHeader, EVENT_BOUNDARY, HEADER_SIZE, MAX_PAYLOAD_SIZE,
        PROLOG_EVENT_HASH, PROLOG_SIZE,
    },
    sink::{EventSink, OpenMode, SinkFactory, SinkInfo},
};

// Re-export the file sink
pub use evlog_file_sink::{log_file_path, FileSink, FileSinkFactory};

// Re-export main types from this crate
pub use buffer::ThreadLocalBuffer;
pub use capture::{CaptureState, PerformanceEvent};
pub use handle::current_thread_id;
pub use reader::{EventLogReader, LogRecord, LogSummary, LogValue, Records, ThreadSummary};
pub use scope::EventScope;
pub use stats::WriterStats;
pub use writer::EventLogWriter;
