use crate::error::{EvlogError, Result};
use crate::record::{record_size, PROLOG_SIZE};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for the event log writer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WriterConfig {
    /// Capacity of each per-thread buffer in bytes (default: 1MB)
    ///
    /// A buffer is written to the sink when the next record does not fit.
    /// The first 16 bytes are reserved for the chunk's Prolog.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Maximum number of producer threads registered at once (default: 512)
    ///
    /// The buffer arena is sized from this: one active and one deferred buffer
    /// per thread plus one spare for flushing.
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,

    /// Append a local timestamp to generated log file names (default: false)
    ///
    /// Only affects `EventLogWriter::start_in`; explicit paths are used as is.
    #[serde(default)]
    pub timestamp_log_files: bool,

    /// Extension for generated log file names (default: "azel")
    #[serde(default = "default_file_extension")]
    pub file_extension: String,

    /// Size of the sink's write buffer in bytes (default: 64KB)
    #[serde(default = "default_write_buffer_size")]
    pub write_buffer_size: usize,

    /// Call `fsync` on the sink after every flush (default: false)
    #[serde(default)]
    pub sync_on_flush: bool,
}

fn default_buffer_size() -> usize {
    1024 * 1024
}

fn default_max_threads() -> usize {
    512
}

fn default_file_extension() -> String {
    "azel".to_string()
}

fn default_write_buffer_size() -> usize {
    64 * 1024
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            max_threads: default_max_threads(),
            timestamp_log_files: false,
            file_extension: default_file_extension(),
            write_buffer_size: default_write_buffer_size(),
            sync_on_flush: false,
        }
    }
}

impl WriterConfig {
    /// Smallest usable buffer: a Prolog plus one empty record
    pub const MIN_BUFFER_SIZE: usize = PROLOG_SIZE + record_size(0);

    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&data)?;
        tracing::debug!("Loaded writer config from {}", path.display());
        Ok(config)
    }

    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json_str(data: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(data)
            .map_err(|e| EvlogError::Config(format!("Failed to parse writer config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_size < Self::MIN_BUFFER_SIZE {
            return Err(EvlogError::Config(format!(
                "buffer_size {} is below the minimum of {}",
                self.buffer_size,
                Self::MIN_BUFFER_SIZE
            )));
        }
        if self.buffer_size > u32::MAX as usize {
            return Err(EvlogError::Config(format!(
                "buffer_size {} exceeds u32 range",
                self.buffer_size
            )));
        }
        if self.max_threads == 0 {
            return Err(EvlogError::Config("max_threads must be positive".into()));
        }
        // Slot ids are u32 with u32::MAX reserved for "no buffer".
        if self.max_threads > (u32::MAX as usize - 2) / 2 {
            return Err(EvlogError::Config(format!(
                "max_threads {} is too large",
                self.max_threads
            )));
        }
        if self.file_extension.is_empty() || self.file_extension.contains('.') {
            return Err(EvlogError::Config(format!(
                "invalid file extension {:?}",
                self.file_extension
            )));
        }
        Ok(())
    }

    /// Number of buffer slots the writer's arena needs
    pub fn arena_slots(&self) -> usize {
        self.max_threads * 2 + 1
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    pub fn with_timestamp_log_files(mut self, enabled: bool) -> Self {
        self.timestamp_log_files = enabled;
        self
    }

    pub fn with_file_extension(mut self, extension: impl Into<String>) -> Self {
        self.file_extension = extension.into();
        self
    }

    pub fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    pub fn with_sync_on_flush(mut self, enabled: bool) -> Self {
        self.sync_on_flush = enabled;
        self
    }
}
