//! Stats command implementation

use anyhow::{Context, Result};
use std::path::PathBuf;

pub fn execute(file: PathBuf, json: bool) -> Result<()> {
    let reader = super::open_log(&file)?;
    let summary = reader.summary().context("Log is malformed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("\nEvent Log Statistics");
    println!("{}", "=".repeat(60));
    println!("Path: {}", file.display());
    println!("Size: {} bytes", summary.bytes);
    println!("Format version: {}", reader.log_header().version);
    println!("\nRecords: {}", summary.records);
    println!("  Prologs (chunks): {}", summary.prologs);
    println!("  Events: {}", summary.data_records);

    println!("\nThreads: {}", summary.threads.len());
    for (thread_id, thread) in &summary.threads {
        println!(
            "  {:>8}: {} event(s) in {} chunk(s), {} payload bytes",
            thread_id, thread.events, thread.chunks, thread.payload_bytes
        );
    }

    Ok(())
}
