//! evlog Prelude
//!
//! Import this to get all commonly used types and traits:
//!
//! ```
//! use evlog::prelude::*;
//! ```

// Core types
pub use crate::{EventHeader, EventNameHash, EvlogError, Result};

// Writer
pub use crate::{EventLogWriter, EventScope, PerformanceEvent, WriterConfig, WriterStats};

// Reader
pub use crate::{EventLogReader, LogRecord, LogValue};

// Sinks
pub use crate::{EventSink, FileSinkFactory, OpenMode, SinkFactory};
