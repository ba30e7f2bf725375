use evlog_core::{
    error::Result,
    sink::{EventSink, OpenMode, SinkFactory},
};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Append-only log file
pub struct FileSink {
    path: PathBuf,
    writer: BufWriter<File>,
    len: u64,
}

impl FileSink {
    /// Open or create the file at `path`, creating parent directories
    pub fn open(path: impl AsRef<Path>, mode: OpenMode, write_buffer_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut options = OpenOptions::new();
        options.create(true);
        match mode {
            OpenMode::Truncate => options.write(true).truncate(true),
            OpenMode::Append => options.append(true),
        };
        let file = options.open(&path)?;
        let len = file.metadata()?.len();

        tracing::debug!("Opened event log sink {} ({:?}, {} bytes)", path.display(), mode, len);

        Ok(Self {
            path,
            writer: BufWriter::with_capacity(write_buffer_size, file),
            len,
        })
    }
}

impl EventSink for FileSink {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        self.len += bytes.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// Ensure buffered bytes reach the file on drop
impl Drop for FileSink {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            tracing::warn!(
                "Failed to flush event log sink {} on drop: {}",
                self.path.display(),
                e
            );
        }
    }
}

/// Opens [`FileSink`]s for the writer
#[derive(Debug, Clone)]
pub struct FileSinkFactory {
    write_buffer_size: usize,
}

impl FileSinkFactory {
    pub fn new(write_buffer_size: usize) -> Self {
        Self { write_buffer_size }
    }
}

impl Default for FileSinkFactory {
    fn default() -> Self {
        Self::new(64 * 1024)
    }
}

impl SinkFactory for FileSinkFactory {
    fn open(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn EventSink>> {
        Ok(Box::new(FileSink::open(path, mode, self.write_buffer_size)?))
    }
}
