//! Sequential reader for persisted event logs
//!
//! A log is a [`LogHeader`] followed by records in file order. Records carry
//! no thread id of their own: the reader attributes each record to the thread
//! named by the most recent Prolog.

use evlog_core::{
    error::{EvlogError, Result},
    record::{decode_record, EventNameHash, LogHeader, RecordView, LOG_HEADER_SIZE},
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Fixed-size little-endian scalar stored as an event payload
pub trait LogValue: Sized {
    const SIZE: usize;

    fn from_le_slice(bytes: &[u8]) -> Self;
}

macro_rules! impl_log_value {
    ($($ty:ty),*) => {
        $(
            impl LogValue for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn from_le_slice(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..Self::SIZE]);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_log_value!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

/// One decoded record with its thread attribution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogRecord<'a> {
    /// Byte offset of the record in the log
    pub offset: usize,
    pub name: EventNameHash,
    pub size: u16,
    pub flags: u16,
    /// Thread of the enclosing chunk; 0 before the first Prolog
    pub thread_id: u64,
    pub payload: &'a [u8],
}

impl<'a> LogRecord<'a> {
    pub fn is_prolog(&self) -> bool {
        self.name.is_prolog()
    }

    pub fn as_str(&self) -> Result<&'a str> {
        std::str::from_utf8(self.payload)
            .map_err(|e| EvlogError::Decode(format!("record {} is not UTF-8: {}", self.name, e)))
    }

    pub fn value<T: LogValue>(&self) -> Option<T> {
        (self.payload.len() >= T::SIZE).then(|| T::from_le_slice(self.payload))
    }
}

/// Cursor over an event log held in memory
///
/// ```no_run
/// use evlog::EventLogReader;
///
/// # fn main() -> evlog::Result<()> {
/// let mut reader = EventLogReader::read_log("./logs/run.azel")?;
/// while reader.has_record() {
///     if !reader.is_prolog() {
///         println!("{} from thread {}", reader.event_name(), reader.thread_id());
///     }
///     if !reader.advance() {
///         break;
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct EventLogReader {
    buffer: Vec<u8>,
    log_header: LogHeader,
    /// Offset of the current record
    position: usize,
    /// Span of the current record, `None` before the first one loads
    current: Option<usize>,
    thread_id: u64,
    last_error: Option<EvlogError>,
}

impl EventLogReader {
    /// Load and validate the log at `path`
    pub fn read_log(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EvlogError::NotFound(format!(
                "event log {}",
                path.display()
            )));
        }
        let buffer = std::fs::read(path)?;
        tracing::debug!("Read event log {} ({} bytes)", path.display(), buffer.len());
        Self::from_bytes(buffer)
    }

    /// Wrap an in-memory log
    pub fn from_bytes(buffer: Vec<u8>) -> Result<Self> {
        if buffer.is_empty() {
            return Err(EvlogError::Decode("event log is empty".into()));
        }
        let log_header = LogHeader::decode(&buffer)?;
        let mut reader = Self {
            buffer,
            log_header,
            position: LOG_HEADER_SIZE,
            current: None,
            thread_id: 0,
            last_error: None,
        };
        reader.load(LOG_HEADER_SIZE);
        Ok(reader)
    }

    pub fn log_header(&self) -> &LogHeader {
        &self.log_header
    }

    /// Total log size in bytes
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.len() <= LOG_HEADER_SIZE
    }

    /// Whether the cursor sits on a record
    pub fn has_record(&self) -> bool {
        self.current.is_some()
    }

    /// Error that stopped the cursor, if any
    pub fn error(&self) -> Option<&EvlogError> {
        self.last_error.as_ref()
    }

    fn view(&self) -> Option<RecordView<'_>> {
        self.current
            .and_then(|_| decode_record(&self.buffer[self.position..]).ok())
    }

    /// Position the cursor on the record at `offset`
    fn load(&mut self, offset: usize) -> bool {
        if offset >= self.buffer.len() {
            return false;
        }
        match decode_record(&self.buffer[offset..]) {
            Ok(view) => {
                if let Some(thread_id) = view.prolog_thread_id() {
                    self.thread_id = thread_id;
                }
                self.position = offset;
                self.current = Some(view.span);
                true
            }
            Err(e) => {
                tracing::warn!("Malformed record at offset {}: {}", offset, e);
                self.last_error = Some(e);
                false
            }
        }
    }

    /// Move to the next record; false at the end of the log or on a malformed
    /// record, leaving the cursor on the last good record
    pub fn advance(&mut self) -> bool {
        match self.current {
            Some(span) => self.load(self.position + span),
            None => false,
        }
    }

    /// Name hash of the current record (zero without one)
    pub fn event_name(&self) -> EventNameHash {
        self.view().map_or(EventNameHash(0), |v| v.header.name)
    }

    pub fn event_size(&self) -> u16 {
        self.view().map_or(0, |v| v.header.size)
    }

    pub fn event_flags(&self) -> u16 {
        self.view().map_or(0, |v| v.header.flags)
    }

    /// Thread of the current record, taken from the last Prolog seen
    pub fn thread_id(&self) -> u64 {
        self.thread_id
    }

    pub fn payload(&self) -> &[u8] {
        self.view().map_or(&[][..], |v| v.payload)
    }

    pub fn is_prolog(&self) -> bool {
        self.event_name().is_prolog()
    }

    /// Payload of the current record as a string
    pub fn as_str(&self) -> Result<&str> {
        std::str::from_utf8(self.payload())
            .map_err(|e| EvlogError::Decode(format!("record is not UTF-8: {}", e)))
    }

    /// Payload of the current record as a scalar
    pub fn value<T: LogValue>(&self) -> Option<T> {
        let payload = self.payload();
        (payload.len() >= T::SIZE).then(|| T::from_le_slice(payload))
    }

    /// Every record from the start of the log, independent of the cursor
    pub fn records(&self) -> Records<'_> {
        Records {
            bytes: &self.buffer,
            offset: LOG_HEADER_SIZE,
            thread_id: 0,
            failed: false,
        }
    }

    /// Records other than Prologs
    pub fn data_records(&self) -> impl Iterator<Item = Result<LogRecord<'_>>> + '_ {
        self.records()
            .filter(|record| !matches!(record, Ok(r) if r.is_prolog()))
    }

    /// Count records per thread, failing on the first malformed record
    pub fn summary(&self) -> Result<LogSummary> {
        let mut summary = LogSummary {
            bytes: self.buffer.len() as u64,
            ..LogSummary::default()
        };
        for record in self.records() {
            let record = record?;
            summary.records += 1;
            let thread = summary.threads.entry(record.thread_id).or_default();
            if record.is_prolog() {
                summary.prologs += 1;
                thread.chunks += 1;
            } else {
                summary.data_records += 1;
                thread.events += 1;
                thread.payload_bytes += record.size as u64;
            }
        }
        Ok(summary)
    }
}

/// Iterator over the records of a log
pub struct Records<'a> {
    bytes: &'a [u8],
    offset: usize,
    thread_id: u64,
    failed: bool,
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<LogRecord<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.bytes.len() {
            return None;
        }
        let offset = self.offset;
        let view = match decode_record(&self.bytes[offset..]) {
            Ok(view) => view,
            Err(e) => {
                self.failed = true;
                return Some(Err(EvlogError::Decode(format!("at offset {}: {}", offset, e))));
            }
        };
        if let Some(thread_id) = view.prolog_thread_id() {
            self.thread_id = thread_id;
        }
        self.offset += view.span;

        Some(Ok(LogRecord {
            offset,
            name: view.header.name,
            size: view.header.size,
            flags: view.header.flags,
            thread_id: self.thread_id,
            payload: view.payload,
        }))
    }
}

/// Per-thread totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ThreadSummary {
    /// Prologs seen, one per persisted chunk
    pub chunks: u64,
    pub events: u64,
    pub payload_bytes: u64,
}

/// Totals over a whole log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogSummary {
    pub records: u64,
    pub prologs: u64,
    pub data_records: u64,
    /// File size, log header included
    pub bytes: u64,
    pub threads: BTreeMap<u64, ThreadSummary>,
}
