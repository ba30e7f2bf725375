//! Concurrent producers racing flushes

use evlog::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

const EVENT: EventNameHash = EventNameHash(0xC0FFEE);

/// Payload: producer index, then sequence number, then filler up to `len`
fn payload(producer: u64, seq: u64, len: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(len);
    bytes.extend_from_slice(&producer.to_le_bytes());
    bytes.extend_from_slice(&seq.to_le_bytes());
    bytes.resize(len, (seq % 251) as u8);
    bytes
}

fn event_len(seq: u64) -> usize {
    16 + (seq % 24) as usize
}

#[test]
fn test_producers_and_flushes_lose_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("concurrent.azel");
    let writer = EventLogWriter::new(
        WriterConfig::default()
            .with_buffer_size(512)
            .with_max_threads(16),
    )
    .unwrap();
    writer.start(&path).unwrap();

    let num_producers = 8u64;
    let events_per_producer = 2_000u64;
    let barrier = Arc::new(Barrier::new(num_producers as usize + 1));
    let done = Arc::new(AtomicBool::new(false));

    let flusher = {
        let writer = writer.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut flushes = 0u64;
            while !done.load(Ordering::Acquire) {
                writer.flush().unwrap();
                flushes += 1;
                thread::yield_now();
            }
            flushes
        })
    };

    let mut producers = vec![];
    for producer in 0..num_producers {
        let writer = writer.clone();
        let barrier = barrier.clone();
        producers.push(thread::spawn(move || {
            barrier.wait();
            for seq in 0..events_per_producer {
                let bytes = payload(producer, seq, event_len(seq));
                assert!(writer.record_event(EVENT, &bytes, 0));
            }
        }));
    }

    barrier.wait();
    for handle in producers {
        handle.join().unwrap();
    }
    done.store(true, Ordering::Release);
    let flushes = flusher.join().unwrap();
    assert!(flushes > 0);
    writer.stop().unwrap();

    let reader = EventLogReader::read_log(&path).unwrap();
    let mut next_seq: HashMap<u64, u64> = HashMap::new();
    let mut producer_threads: HashMap<u64, u64> = HashMap::new();
    let mut total = 0u64;
    for record in reader.data_records() {
        let record = record.unwrap();
        total += 1;
        let producer = u64::from_le_bytes(record.payload[0..8].try_into().unwrap());
        let seq = u64::from_le_bytes(record.payload[8..16].try_into().unwrap());
        assert_eq!(record.payload, payload(producer, seq, event_len(seq)).as_slice());

        // Every record of a producer carries the same thread id
        let thread_id = *producer_threads.entry(producer).or_insert(record.thread_id);
        assert_eq!(record.thread_id, thread_id);

        // Chunks of one thread reach the log in the order they were written
        let expected = next_seq.entry(producer).or_insert(0);
        assert_eq!(seq, *expected, "producer {} out of order", producer);
        *expected += 1;
    }

    assert_eq!(total, num_producers * events_per_producer);
    assert_eq!(next_seq.len(), num_producers as usize);
    assert!(next_seq.values().all(|n| *n == events_per_producer));
    assert_eq!(writer.stats().events_recorded, total);
}

#[test]
fn test_stop_persists_live_threads() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("live.azel");
    let writer = EventLogWriter::new(WriterConfig::default().with_max_threads(8)).unwrap();
    writer.start(&path).unwrap();

    let num_threads = 4;
    let recorded = Arc::new(Barrier::new(num_threads + 1));
    let stopped = Arc::new(Barrier::new(num_threads + 1));

    let mut handles = vec![];
    for i in 0..num_threads {
        let writer = writer.clone();
        let recorded = recorded.clone();
        let stopped = stopped.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..10 {
                assert!(writer.record_event(EVENT, &(i as u32).to_le_bytes(), 0));
            }
            recorded.wait();
            // Keep the thread (and its buffer) alive across stop
            stopped.wait();
            assert!(!writer.record_event(EVENT, b"late", 0));
        }));
    }

    recorded.wait();
    assert_eq!(writer.registered_threads(), num_threads);
    writer.stop().unwrap();
    stopped.wait();
    for handle in handles {
        handle.join().unwrap();
    }

    let summary = EventLogReader::read_log(&path).unwrap().summary().unwrap();
    assert_eq!(summary.data_records, (num_threads * 10) as u64);
    assert_eq!(summary.threads.len(), num_threads);
    assert!(summary.threads.values().all(|t| t.events == 10));
}

#[test]
fn test_exiting_threads_deregister() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("exit.azel");
    let writer = EventLogWriter::new(WriterConfig::default().with_max_threads(2)).unwrap();
    writer.start(&path).unwrap();

    // More threads than the limit, one after another
    for round in 0..6u32 {
        let thread_writer = writer.clone();
        thread::spawn(move || {
            assert!(thread_writer.record_event(EVENT, &round.to_le_bytes(), 0));
        })
        .join()
        .unwrap();
        assert_eq!(writer.registered_threads(), 0);
    }
    writer.stop().unwrap();

    let reader = EventLogReader::read_log(&path).unwrap();
    let rounds: Vec<u32> = reader
        .data_records()
        .map(|r| r.unwrap().value::<u32>().unwrap())
        .collect();
    assert_eq!(rounds, vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn test_writers_are_independent() {
    let temp_dir = TempDir::new().unwrap();
    let first = EventLogWriter::new(WriterConfig::default()).unwrap();
    let second = EventLogWriter::new(WriterConfig::default()).unwrap();
    first.start(temp_dir.path().join("first.azel")).unwrap();
    second.start(temp_dir.path().join("second.azel")).unwrap();

    let mut handles = vec![];
    for i in 0..4u32 {
        let first = first.clone();
        let second = second.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..100 {
                first.record_event(EVENT, &i.to_le_bytes(), 0);
                second.record_event(EVENT, &i.to_le_bytes(), 1);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    first.stop().unwrap();
    second.stop().unwrap();

    for (name, flags) in [("first.azel", 0), ("second.azel", 1)] {
        let reader = EventLogReader::read_log(temp_dir.path().join(name)).unwrap();
        let records: Vec<_> = reader.data_records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 400);
        assert!(records.iter().all(|r| r.flags == flags));
    }
}
