//! Dump command implementation

use anyhow::{Context, Result};
use evlog::LogRecord;
use std::path::PathBuf;

pub struct DumpOptions {
    pub limit: Option<usize>,
    pub strings: bool,
    pub prologs: bool,
}

pub fn execute(file: PathBuf, options: DumpOptions) -> Result<()> {
    let reader = super::open_log(&file)?;
    tracing::debug!("Dumping {} ({} bytes)", file.display(), reader.len());

    let records = reader
        .records()
        .filter(|record| options.prologs || !matches!(record, Ok(r) if r.is_prolog()))
        .take(options.limit.unwrap_or(usize::MAX));

    for record in records {
        let record = record.context("Log is malformed")?;
        println!("{}", format_record(&record, options.strings));
    }

    Ok(())
}

fn format_record(record: &LogRecord<'_>, strings: bool) -> String {
    if record.is_prolog() {
        return format!("{:>10}  --- thread {} ---", record.offset, record.thread_id);
    }
    let payload = if strings {
        match record.as_str() {
            Ok(text) => format!("{:?}", text),
            Err(_) => hex(record.payload),
        }
    } else {
        hex(record.payload)
    };
    format!(
        "{:>10}  {}  flags={:#06x}  size={:<5}  thread={}  {}",
        record.offset, record.name, record.flags, record.size, record.thread_id, payload
    )
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use evlog::EventNameHash;

    fn record(payload: &[u8]) -> LogRecord<'_> {
        LogRecord {
            offset: 24,
            name: EventNameHash(0x1111),
            size: payload.len() as u16,
            flags: 2,
            thread_id: 5,
            payload,
        }
    }

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[0x00, 0xab, 0x10]), "00ab10");
        assert_eq!(hex(&[]), "");
    }

    #[test]
    fn test_format_string_payload() {
        let line = format_record(&record(b"ABCD"), true);
        assert!(line.contains("0x00001111"));
        assert!(line.contains("\"ABCD\""));
        assert!(line.contains("thread=5"));

        let line = format_record(&record(b"ABCD"), false);
        assert!(line.ends_with("41424344"));
    }
}
