use humansize::{DECIMAL, format_size};
use std::path::Path;

pub fn format_file_size(bytes: u64) -> String {
    format_size(bytes, DECIMAL)
}

/// Size of a file on disk, human readable
pub fn file_size_string(path: &Path) -> String {
    std::fs::metadata(path)
        .map(|m| format_file_size(m.len()))
        .unwrap_or_else(|_| "unknown size".to_string())
}
