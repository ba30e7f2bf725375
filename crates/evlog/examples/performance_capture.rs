//! Performance Capture Example
//!
//! Switches a running log into performance capture, records events whose
//! payload is only known after later work, hands one of them to another
//! thread, then returns to the previous log.
//!
//! Run with: cargo run --example performance_capture

use evlog::prelude::*;
use std::thread;
use std::time::Instant;

const FRAME: EventNameHash = EventNameHash(0xF00D);
const UPLOAD: EventNameHash = EventNameHash(0xBEEF);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("evlog=info")
        .init();

    let temp_dir = tempfile::tempdir()?;
    let normal = temp_dir.path().join("session.azel");
    let capture = temp_dir.path().join("capture.azel");

    let writer = EventLogWriter::new(WriterConfig::default())?;
    writer.start(&normal)?;
    writer.record_string_event(EventNameHash::from_name("session"), "started", 0);

    writer.start_performance_capture(&capture)?;
    println!("Capturing to {}", capture.display());

    // Frame durations are written once the frame is over
    for frame in 0..100u32 {
        let started = Instant::now();
        let Some(event) = writer.begin_performance_event(FRAME, 12, 0) else {
            continue;
        };
        event.write_payload(0, &frame.to_le_bytes())?;
        let nanos = started.elapsed().as_nanos() as u64;
        event.write_payload(4, &nanos.to_le_bytes())?;
    }

    // An event finished by a worker thread
    if let Some(upload) = writer.begin_performance_event(UPLOAD, 8, 0) {
        thread::spawn(move || {
            let _ = upload.write_payload(0, &4096u64.to_le_bytes());
        })
        .join()
        .expect("worker panicked");
    }

    writer.stop_performance_capture();
    println!(
        "Capture stopped, performance mode enabled: {}",
        writer.is_performance_mode_enabled()
    );

    writer.record_string_event(EventNameHash::from_name("session"), "resumed", 0);
    writer.stop()?;

    let summary = EventLogReader::read_log(&capture)?.summary()?;
    println!(
        "Capture holds {} events in {} chunks",
        summary.data_records, summary.prologs
    );
    let session = EventLogReader::read_log(&normal)?;
    for record in session.data_records() {
        println!("session: {}", record?.as_str()?);
    }

    Ok(())
}
