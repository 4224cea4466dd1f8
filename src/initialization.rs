//! Logger setup for the binary.

use log::{LevelFilter, SetLoggerError};

/// Initializes the global logger at the requested level.
///
/// Output is message-oriented (no timestamps or module targets), matching the
/// tool's console-narrative style.
///
/// # Errors
///
/// Returns an error if a logger was already installed.
pub fn init_logger(level: LevelFilter) -> Result<(), SetLoggerError> {
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .format_target(false)
        .try_init()
}
