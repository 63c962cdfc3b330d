//! Helpers for testing the memoizing cache.
//!
//! Call [`setup`] at the start of every test to see its logs, and keep the [`TempDir`] returned
//! by [`tempdir`] alive for as long as the cache directory is in use.

use std::path::Path;
use std::time::{Duration, SystemTime};

use filetime::FileTime;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `memocache` crate and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("memocache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped. Use it as a guard to
/// automatically clean up after tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// Rewinds the modification time of the file at `path` by `age`.
///
/// Files are judged by their `mtime`, so this makes a cache entry look like it was written
/// `age` ago.
///
/// # Panics
///
/// Panics if the file does not exist.
pub fn age_file(path: impl AsRef<Path>, age: Duration) {
    let mtime = FileTime::from_system_time(SystemTime::now() - age);
    filetime::set_file_mtime(path, mtime).unwrap();
}

/// Returns the file names in `dir`, sorted.
///
/// # Panics
///
/// Panics if the directory can not be read.
pub fn list_files(dir: impl AsRef<Path>) -> Vec<String> {
    let mut names: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
