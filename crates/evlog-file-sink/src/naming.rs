use chrono::Local;
use std::path::{Path, PathBuf};

/// Build the path of a generated log file.
///
/// Produces `<dir>/<hint>.<extension>`, or `<dir>/<hint>_YYYYmmdd_HHMM.<extension>`
/// when `include_timestamp` is set. The timestamp uses local time.
pub fn log_file_path(
    output_dir: impl AsRef<Path>,
    file_name_hint: &str,
    include_timestamp: bool,
    extension: &str,
) -> PathBuf {
    let file_name = if include_timestamp {
        format!("{}_{}", file_name_hint, Local::now().format("%Y%m%d_%H%M"))
    } else {
        file_name_hint.to_string()
    };

    let mut path = output_dir.as_ref().join(file_name);
    path.set_extension(extension);
    path
}
