//! Verify command implementation

use anyhow::{bail, Result};
use std::path::PathBuf;

pub fn execute(file: PathBuf) -> Result<()> {
    let reader = super::open_log(&file)?;

    let mut records = 0u64;
    let mut seen_prolog = false;
    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(e) => bail!("{} is malformed after {} record(s): {}", file.display(), records, e),
        };
        if record.is_prolog() {
            seen_prolog = true;
        } else if !seen_prolog {
            bail!(
                "{}: record at offset {} precedes the first Prolog",
                file.display(),
                record.offset
            );
        }
        records += 1;
    }

    println!("✓ {} is valid: {} record(s)", file.display(), records);
    Ok(())
}
