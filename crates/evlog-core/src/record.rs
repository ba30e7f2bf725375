//! Binary event record codec
//!
//! Every event is stored as a fixed 8-byte header followed by its payload,
//! padded so that the record occupies a multiple of [`EVENT_BOUNDARY`] bytes:
//!
//! ```text
//! [name: u32][size: u16][flags: u16][payload: size bytes][padding]
//! ```
//!
//! All integers are little-endian. A persisted chunk always starts with a
//! Prolog record whose payload is the `u64` id of the thread that produced the
//! chunk. A log file starts with a [`LogHeader`].

use crate::error::{EvlogError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use xxhash_rust::const_xxh32::xxh32 as const_xxh32;
use xxhash_rust::xxh32::xxh32;

/// Size of the fixed record header in bytes
pub const HEADER_SIZE: usize = 8;

/// Alignment of every record on disk and in memory
pub const EVENT_BOUNDARY: usize = 8;

/// Largest payload a record can describe
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Size of the thread id carried by a Prolog record
pub const PROLOG_PAYLOAD_SIZE: usize = std::mem::size_of::<u64>();

/// Total size of a Prolog record
pub const PROLOG_SIZE: usize = align_up(HEADER_SIZE + PROLOG_PAYLOAD_SIZE, EVENT_BOUNDARY);

/// Reserved name hash marking a Prolog record
pub const PROLOG_EVENT_HASH: EventNameHash = EventNameHash(const_xxh32(b"Prolog", 0));

/// Magic number at the start of every log file
pub const LOG_MAGIC: u32 = const_xxh32(b"EventLogger", 0);

/// Current log format version
pub const LOG_VERSION: u32 = 1;

/// Size of the [`LogHeader`] in bytes
pub const LOG_HEADER_SIZE: usize = 8;

/// Round `value` up to the next multiple of `boundary` (a power of two)
pub const fn align_up(value: usize, boundary: usize) -> usize {
    (value + boundary - 1) & !(boundary - 1)
}

/// On-disk size of a record carrying `payload_len` bytes
pub const fn record_size(payload_len: usize) -> usize {
    align_up(HEADER_SIZE + payload_len, EVENT_BOUNDARY)
}

/// Hashed event name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventNameHash(pub u32);

impl EventNameHash {
    /// Hash an event name
    pub fn from_name(name: &str) -> Self {
        Self(xxh32(name.as_bytes(), 0))
    }

    pub fn is_prolog(self) -> bool {
        self == PROLOG_EVENT_HASH
    }
}

impl From<u32> for EventNameHash {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for EventNameHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Fixed header preceding every payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    pub name: EventNameHash,
    pub size: u16,
    pub flags: u16,
}

impl EventHeader {
    pub fn new(name: EventNameHash, size: u16, flags: u16) -> Self {
        Self { name, size, flags }
    }

    /// Write the header into the first [`HEADER_SIZE`] bytes of `dst`
    pub fn write_to(&self, dst: &mut [u8]) {
        dst[0..4].copy_from_slice(&self.name.0.to_le_bytes());
        dst[4..6].copy_from_slice(&self.size.to_le_bytes());
        dst[6..8].copy_from_slice(&self.flags.to_le_bytes());
    }

    /// Read a header from the start of `src`
    pub fn read_from(src: &[u8]) -> Result<Self> {
        if src.len() < HEADER_SIZE {
            return Err(EvlogError::Decode(format!(
                "need {} bytes for an event header, {} available",
                HEADER_SIZE,
                src.len()
            )));
        }
        Ok(Self {
            name: EventNameHash(u32::from_le_bytes([src[0], src[1], src[2], src[3]])),
            size: u16::from_le_bytes([src[4], src[5]]),
            flags: u16::from_le_bytes([src[6], src[7]]),
        })
    }

    /// Total span of the record this header starts, padding included
    pub fn record_size(&self) -> usize {
        record_size(self.size as usize)
    }
}

/// Zero-copy view of one decoded record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordView<'a> {
    pub header: EventHeader,
    pub payload: &'a [u8],
    /// Bytes to skip to reach the next record
    pub span: usize,
}

impl<'a> RecordView<'a> {
    /// Thread id carried by a Prolog record
    pub fn prolog_thread_id(&self) -> Option<u64> {
        if !self.header.name.is_prolog() || self.payload.len() < PROLOG_PAYLOAD_SIZE {
            return None;
        }
        let mut id = [0u8; PROLOG_PAYLOAD_SIZE];
        id.copy_from_slice(&self.payload[..PROLOG_PAYLOAD_SIZE]);
        Some(u64::from_le_bytes(id))
    }
}

/// Encode one record, header + payload + padding.
///
/// The payload must not exceed [`MAX_PAYLOAD_SIZE`].
pub fn encode_record(name: EventNameHash, flags: u16, payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= MAX_PAYLOAD_SIZE);
    let mut out = vec![0u8; record_size(payload.len())];
    EventHeader::new(name, payload.len() as u16, flags).write_to(&mut out);
    out[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);
    out
}

/// Decode the record at the start of `bytes`.
///
/// The final record of a file may omit its trailing padding; everything up to
/// the end of the payload must be present.
pub fn decode_record(bytes: &[u8]) -> Result<RecordView<'_>> {
    let header = EventHeader::read_from(bytes)?;
    let payload_end = HEADER_SIZE + header.size as usize;
    if bytes.len() < payload_end {
        return Err(EvlogError::Decode(format!(
            "record {} declares {} payload bytes but only {} remain",
            header.name,
            header.size,
            bytes.len() - HEADER_SIZE
        )));
    }
    Ok(RecordView {
        header,
        payload: &bytes[HEADER_SIZE..payload_end],
        span: header.record_size().min(bytes.len()),
    })
}

/// Write a Prolog for `thread_id` into the first [`PROLOG_SIZE`] bytes of `dst`
pub fn write_prolog(dst: &mut [u8], thread_id: u64) {
    EventHeader::new(PROLOG_EVENT_HASH, PROLOG_PAYLOAD_SIZE as u16, 0).write_to(dst);
    dst[HEADER_SIZE..HEADER_SIZE + PROLOG_PAYLOAD_SIZE].copy_from_slice(&thread_id.to_le_bytes());
}

/// Fixed header at the start of every log file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogHeader {
    pub magic: u32,
    pub version: u32,
}

impl Default for LogHeader {
    fn default() -> Self {
        Self {
            magic: LOG_MAGIC,
            version: LOG_VERSION,
        }
    }
}

impl LogHeader {
    pub fn encode(&self) -> [u8; LOG_HEADER_SIZE] {
        let mut out = [0u8; LOG_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..8].copy_from_slice(&self.version.to_le_bytes());
        out
    }

    /// Decode and validate a log header
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < LOG_HEADER_SIZE {
            return Err(EvlogError::Decode(format!(
                "log is {} bytes, shorter than its {} byte header",
                bytes.len(),
                LOG_HEADER_SIZE
            )));
        }
        let header = Self {
            magic: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            version: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        };
        if header.magic != LOG_MAGIC {
            return Err(EvlogError::Decode(format!(
                "bad log magic {:#010x}, expected {:#010x}",
                header.magic, LOG_MAGIC
            )));
        }
        if header.version != LOG_VERSION {
            return Err(EvlogError::Decode(format!(
                "unsupported log version {}",
                header.version
            )));
        }
        Ok(header)
    }
}
