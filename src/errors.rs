use std::path::PathBuf;

use thiserror::Error;

use crate::config::{CITY_DB_NAME, CITY_LITE_DB_NAME, LOG_EXTENSION};

/// Conditions that stop the whole run before any processing starts.
///
/// Everything below this severity is isolated to a single file, chunk, or row.
#[derive(Error, Debug)]
pub enum JobError {
    /// The input directory does not exist.
    #[error("{} does not exist", .0.display())]
    MissingLogDirectory(PathBuf),

    /// Neither city database variant was found next to the executable.
    #[error("{CITY_DB_NAME} or {CITY_LITE_DB_NAME} missing! Cannot continue")]
    MissingCityDatabase,

    /// No matching log files anywhere under the input directory.
    #[error("no files ending in .{LOG_EXTENSION} found under {}", .0.display())]
    NoLogFiles(PathBuf),
}

/// Per-file structural conditions: the file is skipped with a warning and the
/// run continues with the next file.
#[derive(Error, Debug)]
pub enum FileSkip {
    /// The file has no content at all.
    #[error("file is empty")]
    Empty,

    /// The first line does not start with `#`, so this is not a W3C extended log.
    #[error("the first line does not start with a #! Is this an IIS log?")]
    NotIisFormat,

    /// The software marker names a product whose logs we do not process.
    #[error("does not appear to be an IIS related file")]
    UnsupportedSoftware,

    /// A data row appeared before any `#Fields:` declaration.
    #[error("data row encountered before any #Fields: declaration")]
    DataBeforeFields,

    /// The file could not be read.
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),
}
