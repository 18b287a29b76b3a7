//! Logging for the relay daemon.
//!
//! Dual output: colored stdout plus a plain `rpc-relay.log` in the log
//! directory. Initialization is guarded so repeated calls are harmless.

use crate::error::RelayDaemonError;

use std::fs::File;
use std::io::stdout;
use std::path::Path;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use fern::Dispatch;
use fern::colors::Color::{Blue, Green, Magenta, Red, Yellow};
use fern::colors::ColoredLevelConfig;
use humantime::format_rfc3339;
use log::{LevelFilter, info, warn};

static INIT_LOGGER_ONCE: Once = Once::new();

static LOGGER_ALREADY_CALLED: AtomicBool = AtomicBool::new(false);

pub const LOG_FILE_NAME: &str = "rpc-relay.log";

const LOGGER_ALREADY_INITIALIZED_MESSAGE: &str = "Logger already initialized";

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Debug;

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Info;

/// Initialize the logger with dual output (stdout + file).
///
/// Safe to call more than once: later calls log a warning and return Ok.
///
/// # Errors
///
/// Returns an error if the log file cannot be created or another logger
/// is already installed.
pub fn initialize(log_dir: &Path, level: LevelFilter) -> Result<(), RelayDaemonError> {
    if LOGGER_ALREADY_CALLED.swap(true, Ordering::SeqCst) {
        warn!("{LOGGER_ALREADY_INITIALIZED_MESSAGE}");
        return Ok(());
    }

    let mut result = Ok(());

    INIT_LOGGER_ONCE.call_once(|| {
        result = initialize_internal(log_dir, level);
        if result.is_ok() {
            info!("Logger initialized with level: {level:?}");
        }
    });

    result
}

/// Open (append) the log file inside `log_dir`.
#[track_caller]
pub fn open_log_file(log_dir: &Path) -> Result<File, RelayDaemonError> {
    let log_file_path = log_dir.join(LOG_FILE_NAME);
    fern::log_file(&log_file_path).map_err(|e| {
        RelayDaemonError::daemon(format!(
            "Failed to create log file {}: {e}",
            log_file_path.display()
        ))
    })
}

#[track_caller]
fn initialize_internal(log_dir: &Path, level: LevelFilter) -> Result<(), RelayDaemonError> {
    let log_file = open_log_file(log_dir)?;

    let color_configuration = ColoredLevelConfig::new()
        .debug(Blue)
        .info(Green)
        .warn(Yellow)
        .error(Red)
        .trace(Magenta);

    // Dependencies (hyper, rustls, tungstenite) stay at info
    let base_dispatch = Dispatch::new()
        .level(level.min(LevelFilter::Info))
        .level_for("relay_core", level)
        .level_for("relay_daemon", level)
        .level_for("rpc_relay", level);

    let stdout_dispatch = Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{date} - {level}] {message} [{file}:{line}]",
                date = format_rfc3339(SystemTime::now()),
                level = color_configuration.color(record.level()),
                message = message,
                file = record.file().unwrap_or("unknown"),
                line = record.line().unwrap_or(0),
            ))
        })
        .chain(stdout());

    let file_dispatch = Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{date} - {level}] {message} [{file}:{line}]",
                date = format_rfc3339(SystemTime::now()),
                level = record.level(),
                message = message,
                file = record.file().unwrap_or("unknown"),
                line = record.line().unwrap_or(0)
            ))
        })
        .chain(log_file);

    base_dispatch
        .chain(stdout_dispatch)
        .chain(file_dispatch)
        .apply()
        .map_err(|e| RelayDaemonError::daemon(format!("Failed to initialize logger: {e}")))?;

    Ok(())
}
