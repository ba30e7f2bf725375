//! evlog core: types and traits for the evlog binary event logger
//!
//! This crate defines the pieces shared by the writer, the sinks and the
//! tooling:
//! - Record codec: header layout, alignment, Prolog and log header
//! - Configuration: writer tuning loaded from code or JSON
//! - Sink traits: append-only byte sinks and their factories
//! - Errors and optional metrics instrumentation

pub mod config;
pub mod error;
pub mod observe;
pub mod record;
pub mod sink;

pub use config::WriterConfig;
pub use error::{EvlogError, Result};
pub use record::{
    align_up, decode_record, encode_record, record_size, write_prolog, EventHeader,
    EventNameHash, LogHeader, RecordView, EVENT_BOUNDARY, HEADER_SIZE, LOG_HEADER_SIZE,
    MAX_PAYLOAD_SIZE, PROLOG_EVENT_HASH, PROLOG_SIZE,
};
pub use sink::{EventSink, OpenMode, SinkFactory, SinkInfo};
