//! Sink traits
//!
//! Defines the interface for the append-only byte sinks the writer persists
//! chunks into (file-based, in-memory, etc.)

use crate::error::Result;
use std::path::{Path, PathBuf};

/// How an existing file at the sink path is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create the file, discarding any previous content
    Truncate,

    /// Create the file if missing, keep and extend existing content
    Append,
}

/// Append-only byte sink
///
/// The writer serializes all calls behind one lock, so implementations do not
/// need internal synchronization.
pub trait EventSink: Send {
    /// Append bytes at the end of the sink
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    /// Push buffered bytes to the OS
    fn flush(&mut self) -> Result<()>;

    /// Flush and make the bytes durable
    fn sync(&mut self) -> Result<()>;

    /// Bytes in the sink, including buffered ones
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Location of the sink, used to reopen it later
    fn path(&self) -> &Path;
}

/// Opens sinks by path
pub trait SinkFactory: Send + Sync {
    fn open(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn EventSink>>;
}

/// Statistics about one sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkInfo {
    pub path: PathBuf,
    pub len: u64,
}

impl SinkInfo {
    pub fn of(sink: &dyn EventSink) -> Self {
        Self {
            path: sink.path().to_path_buf(),
            len: sink.len(),
        }
    }
}
