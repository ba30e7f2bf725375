//! Full buffers are persisted inline by their producer

use evlog::prelude::*;
use evlog::{current_thread_id, PROLOG_SIZE};
use tempfile::TempDir;

// Prolog (16) plus room for three 16-byte records
const BUFFER_SIZE: usize = 64;

fn small_writer() -> (TempDir, std::path::PathBuf, EventLogWriter) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("overflow.azel");
    let writer = EventLogWriter::new(WriterConfig::default().with_buffer_size(BUFFER_SIZE)).unwrap();
    writer.start(&path).unwrap();
    (temp_dir, path, writer)
}

#[test]
fn test_buffer_fills_exactly() {
    let (_temp, _path, writer) = small_writer();

    for i in 0..3u64 {
        assert!(writer.record_event(EventNameHash(1), &i.to_le_bytes(), 0));
    }
    assert_eq!(writer.thread_buffer_used_bytes(), Some(BUFFER_SIZE));
    assert_eq!(writer.stats().overflow_writes, 0);
    assert_eq!(writer.stats().chunks_written, 0);
    writer.stop().unwrap();
}

#[test]
fn test_overflow_resets_to_prolog() {
    let (_temp, path, writer) = small_writer();

    for i in 0..3u64 {
        writer.record_event(EventNameHash(1), &i.to_le_bytes(), 0);
    }

    // The fourth record does not fit: the full buffer goes to the sink first
    {
        let scope = writer.record_event_begin(EventNameHash(2), 8, 0).unwrap();
        drop(scope);
    }
    assert_eq!(writer.thread_buffer_used_bytes(), Some(PROLOG_SIZE + 16));

    let stats = writer.stats();
    assert_eq!(stats.overflow_writes, 1);
    assert_eq!(stats.chunks_written, 1);
    assert_eq!(stats.bytes_written, BUFFER_SIZE as u64);

    writer.stop().unwrap();
    assert_eq!(writer.stats().chunks_written, 2);

    // Both chunks start with a Prolog for this thread
    let reader = EventLogReader::read_log(&path).unwrap();
    let records: Vec<_> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(records.len(), 6);
    assert!(records[0].is_prolog());
    assert!(records[4].is_prolog());
    assert!(records.iter().all(|r| r.thread_id == current_thread_id()));
    assert_eq!(records[5].name, EventNameHash(2));
}

#[test]
fn test_largest_record_overflows_every_time() {
    let (_temp, path, writer) = small_writer();

    // 48 bytes of record space: an 8 byte header and 40 bytes of payload
    for i in 0..5u8 {
        assert!(writer.record_event(EventNameHash(3), &[i; 40], 0));
    }
    assert!(!writer.record_event(EventNameHash(3), &[0; 41], 0));
    writer.stop().unwrap();

    let stats = writer.stats();
    assert_eq!(stats.overflow_writes, 4);
    assert_eq!(stats.chunks_written, 5);
    assert_eq!(stats.events_dropped, 1);

    let summary = EventLogReader::read_log(&path).unwrap().summary().unwrap();
    assert_eq!(summary.prologs, 5);
    assert_eq!(summary.data_records, 5);
}

#[test]
fn test_flush_after_overflow() {
    let (_temp, path, writer) = small_writer();

    for i in 0..10u64 {
        writer.record_event(EventNameHash(4), &i.to_le_bytes(), 0);
        if i % 4 == 0 {
            writer.flush().unwrap();
            assert_eq!(writer.thread_buffer_used_bytes(), Some(PROLOG_SIZE));
        }
    }
    writer.stop().unwrap();

    let reader = EventLogReader::read_log(&path).unwrap();
    let values: Vec<u64> = reader
        .data_records()
        .map(|r| r.unwrap().value::<u64>().unwrap())
        .collect();
    assert_eq!(values, (0..10).collect::<Vec<_>>());
}
