//! File-based sink for the evlog writer
//!
//! Provides the append-only file the writer persists its chunks into, plus the
//! naming scheme for generated log files.
//!
//! Features:
//! - Buffered sequential writes
//! - Parent directories created on open
//! - Truncate or append open modes
//! - Optional timestamped file names

mod naming;
mod sink;

pub use naming::log_file_path;
pub use sink::{FileSink, FileSinkFactory};
