//! Write events on one thread and read them back

use evlog::prelude::*;
use evlog::{current_thread_id, PROLOG_SIZE};
use tempfile::TempDir;

fn start_writer(buffer_size: usize) -> (TempDir, std::path::PathBuf, EventLogWriter) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("run.azel");
    let writer = EventLogWriter::new(WriterConfig::default().with_buffer_size(buffer_size)).unwrap();
    writer.start(&path).unwrap();
    (temp_dir, path, writer)
}

#[test]
fn test_two_events_round_trip() {
    let (_temp, path, writer) = start_writer(1024);

    {
        let mut scope = writer
            .record_event_begin(EventNameHash(0x1111), 4, 0)
            .unwrap();
        assert_eq!(scope.payload(), &[0u8; 4]);
        scope.payload_mut().copy_from_slice(b"ABCD");
    }
    writer
        .record_event_begin(EventNameHash(0x2222), 0, 0)
        .unwrap()
        .finish();
    writer.stop().unwrap();

    // Header (8) + Prolog (16) + ABCD record (16) + empty record (8)
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len(), 8 + 16 + 16 + 8);

    let mut reader = EventLogReader::read_log(&path).unwrap();
    assert!(reader.has_record());
    assert!(reader.is_prolog());
    assert_eq!(reader.thread_id(), current_thread_id());

    assert!(reader.advance());
    assert_eq!(reader.event_name(), EventNameHash(0x1111));
    assert_eq!(reader.event_size(), 4);
    assert_eq!(reader.payload(), b"ABCD");
    assert_eq!(reader.thread_id(), current_thread_id());

    assert!(reader.advance());
    assert_eq!(reader.event_name(), EventNameHash(0x2222));
    assert_eq!(reader.event_size(), 0);
    assert!(reader.payload().is_empty());

    assert!(!reader.advance());
    assert!(reader.error().is_none());
}

#[test]
fn test_events_keep_their_order() {
    // Small buffers force many overflow writes along the way
    let (_temp, path, writer) = start_writer(256);

    for i in 0..1000u32 {
        let len = (i % 37) as usize;
        let payload: Vec<u8> = (0..len).map(|b| (b as u32 + i) as u8).collect();
        assert!(writer.record_event(EventNameHash(i), &payload, (i % 3) as u16));
    }
    writer.stop().unwrap();

    let reader = EventLogReader::read_log(&path).unwrap();
    let records: Vec<_> = reader.data_records().map(|r| r.unwrap()).collect();
    assert_eq!(records.len(), 1000);
    for (i, record) in records.iter().enumerate() {
        let i = i as u32;
        let len = (i % 37) as usize;
        assert_eq!(record.name, EventNameHash(i));
        assert_eq!(record.flags, (i % 3) as u16);
        assert_eq!(record.size as usize, len);
        let expected: Vec<u8> = (0..len).map(|b| (b as u32 + i) as u8).collect();
        assert_eq!(record.payload, expected.as_slice());
        assert_eq!(record.thread_id, current_thread_id());
    }

    let stats = writer.stats();
    assert_eq!(stats.events_recorded, 1000);
    assert!(stats.overflow_writes > 0);
    assert_eq!(stats.events_dropped, 0);
}

#[test]
fn test_string_events() {
    let (_temp, path, writer) = start_writer(1024);

    let name = EventNameHash::from_name("note");
    assert!(writer.record_string_event(name, "frame done", 0));
    assert!(writer.record_string_event(name, "", 0));
    assert!(writer.record_string_event(name, "héllo", 0));
    writer.stop().unwrap();

    let reader = EventLogReader::read_log(&path).unwrap();
    let texts: Vec<String> = reader
        .data_records()
        .map(|r| r.unwrap().as_str().unwrap().to_string())
        .collect();
    assert_eq!(texts, vec!["frame done", "", "héllo"]);
}

#[test]
fn test_scope_write_truncates() {
    let (_temp, path, writer) = start_writer(1024);

    {
        let mut scope = writer.record_event_begin(EventNameHash(5), 3, 0).unwrap();
        assert_eq!(scope.len(), 3);
        assert_eq!(scope.write(b"wxyz"), 3);
    }
    writer.stop().unwrap();

    let reader = EventLogReader::read_log(&path).unwrap();
    let record = reader.data_records().next().unwrap().unwrap();
    assert_eq!(record.payload, b"wxy");
}

#[test]
fn test_restart_truncates() {
    let (_temp, path, writer) = start_writer(1024);
    writer.record_string_event(EventNameHash(1), "first run", 0);
    writer.stop().unwrap();

    writer.start(&path).unwrap();
    writer.record_string_event(EventNameHash(2), "second run", 0);
    writer.stop().unwrap();

    let reader = EventLogReader::read_log(&path).unwrap();
    let records: Vec<_> = reader.data_records().map(|r| r.unwrap()).collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].as_str().unwrap(), "second run");
}

#[test]
fn test_flush_makes_events_visible() {
    let (_temp, path, writer) = start_writer(1024);
    writer.record_string_event(EventNameHash(1), "visible", 0);
    writer.flush().unwrap();

    // Still running; the flushed chunk is already on disk
    let reader = EventLogReader::read_log(&path).unwrap();
    assert_eq!(reader.data_records().count(), 1);
    assert_eq!(writer.thread_buffer_used_bytes(), Some(PROLOG_SIZE));

    writer.record_string_event(EventNameHash(1), "later", 0);
    writer.stop().unwrap();
    let reader = EventLogReader::read_log(&path).unwrap();
    assert_eq!(reader.data_records().count(), 2);
}
