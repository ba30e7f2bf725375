//! Basic evlog Usage Example
//!
//! This example demonstrates:
//! - Starting a writer on a log file
//! - Recording scoped, copied and string events from several threads
//! - Flushing while producers run
//! - Reading the log back with thread attribution
//!
//! Run with: cargo run --example basic_usage

use evlog::prelude::*;
use std::thread;

const TICK: EventNameHash = EventNameHash(0x1111);
const NOTE: EventNameHash = EventNameHash(0x2222);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("evlog=info")
        .init();

    let temp_dir = tempfile::tempdir()?;
    let writer = EventLogWriter::new(WriterConfig::default().with_buffer_size(4096))?;

    // 1. Start logging
    let path = writer.start_in(temp_dir.path(), "basic")?;
    println!("Logging to {}", path.display());

    // 2. Record from a few producer threads
    let producers: Vec<_> = (0..4u32)
        .map(|worker| {
            let writer = writer.clone();
            thread::spawn(move || {
                for frame in 0..250u32 {
                    if let Some(mut scope) = writer.record_event_begin(TICK, 8, 0) {
                        let payload = scope.payload_mut();
                        payload[..4].copy_from_slice(&worker.to_le_bytes());
                        payload[4..].copy_from_slice(&frame.to_le_bytes());
                    }
                }
                writer.record_string_event(NOTE, &format!("worker {} done", worker), 0);
            })
        })
        .collect();

    // 3. Flush while they run
    for _ in 0..10 {
        writer.flush()?;
        thread::yield_now();
    }
    for producer in producers {
        producer.join().expect("producer panicked");
    }

    writer.stop()?;
    let stats = writer.stats();
    println!(
        "Recorded {} events in {} chunks ({:.0} bytes per chunk)",
        stats.events_recorded,
        stats.chunks_written,
        stats.average_chunk_size()
    );

    // 4. Read it back
    let reader = EventLogReader::read_log(&path)?;
    for record in reader.data_records() {
        let record = record?;
        if record.name == NOTE {
            println!("thread {:>3}: {}", record.thread_id, record.as_str()?);
        }
    }

    let summary = reader.summary()?;
    println!("\n{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
