//! Test utilities for mkr-lib.
//!
//! Helpers for laying out build trees on disk and steering timestamps.

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Write `content` to `path`, creating parent directories.
pub fn write_file(path: &Path, content: &str) {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).unwrap();
  }
  fs::write(path, content).unwrap();
}

/// Shift the modification time of `path` by `seconds` relative to now.
pub fn set_mtime_offset(path: &Path, seconds: i64) {
  let now = SystemTime::now();
  let delta = Duration::from_secs(seconds.unsigned_abs());
  let when = if seconds < 0 { now - delta } else { now + delta };
  let file = fs::File::options().write(true).open(path).unwrap();
  file.set_modified(when).unwrap();
}
