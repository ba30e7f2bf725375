pub mod dump;
pub mod stats;
pub mod verify;

use anyhow::{Context, Result};
use evlog::EventLogReader;
use std::path::Path;

fn open_log(path: &Path) -> Result<EventLogReader> {
    EventLogReader::read_log(path)
        .with_context(|| format!("Failed to read event log {}", path.display()))
}
