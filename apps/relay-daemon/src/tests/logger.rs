// Unit tests for logger initialization

use crate::logger::{LOG_FILE_NAME, initialize, open_log_file};

use std::path::PathBuf;

use log::LevelFilter;
use serial_test::serial;
use tempfile::TempDir;

/// **VALUE**: Calling initialize() twice is harmless.
///
/// **BUG THIS CATCHES**: Would catch the Once/AtomicBool guards being removed,
/// making fern fail when a second global logger is installed.
#[test]
#[serial]
fn given_logger_initialized_when_called_again_then_returns_ok() {
    // GIVEN: A writable log directory
    let dir = TempDir::new().expect("temp dir");

    // WHEN: Initializing twice
    let first = initialize(dir.path(), LevelFilter::Debug);
    let second = initialize(dir.path(), LevelFilter::Debug);

    // THEN: Both succeed
    assert!(first.is_ok(), "first initialization should succeed");
    assert!(second.is_ok(), "second initialization should be a no-op");
}

/// **VALUE**: An unusable log directory is an error, not a panic.
#[test]
fn given_invalid_log_dir_when_opening_file_then_error() {
    let invalid_dir = PathBuf::from("/dev/null/invalid-path");

    let err = open_log_file(&invalid_dir).expect_err("cannot create file under /dev/null");

    assert!(err.to_string().contains(LOG_FILE_NAME));
}

#[test]
fn given_writable_dir_when_opening_file_then_created() {
    let dir = TempDir::new().expect("temp dir");

    open_log_file(dir.path()).expect("log file");

    assert!(dir.path().join(LOG_FILE_NAME).exists());
}
