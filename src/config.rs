//! Command-line surface and the named constants of the log format and the
//! output conventions.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

// File discovery
/// Extension (without the dot) of the log files collected under the input root.
pub const LOG_EXTENSION: &str = "log";

// W3C extended log format markers
/// Prefix of every metadata comment line.
pub const COMMENT_PREFIX: char = '#';
/// Prefix of a fields declaration; the remainder is the space-separated column list.
pub const FIELDS_PREFIX: &str = "#Fields: ";
/// Software marker identifying Exchange logs, which share the W3C shape but are not IIS access logs.
pub const EXCHANGE_SOFTWARE_PREFIX: &str = "#Software: Microsoft Exchange";

// Enrichment
/// Normalized name of the client IP column (IIS writes `c-ip`).
pub const CLIENT_IP_COLUMN: &str = "c_ip";
/// Name of the appended city column.
pub const GEO_CITY_COLUMN: &str = "GeoCity";
/// Name of the appended country column.
pub const GEO_COUNTRY_COLUMN: &str = "GeoCountry";
/// Sentinel written when no city/country resolution applies.
pub const NOT_AVAILABLE: &str = "NA";
/// Output writer flush cadence, in emitted rows.
pub const FLUSH_INTERVAL_ROWS: usize = 10_000;

// Output files
/// Accumulates the raw text of every malformed row across the whole run.
pub const BAD_DATA_FILE_NAME: &str = "BadDataRows_REVIEW_ME.txt";
/// Deduplicated table of every successfully geolocated IP.
pub const UNIQUE_IPS_FILE_NAME: &str = "!UniqueIPs.csv";

// City database probing (next to the executable)
/// Premium MaxMind city database filename, preferred when present.
pub const CITY_DB_NAME: &str = "GeoIP2-City.mmdb";
/// Free/lite MaxMind city database filename, the fallback.
pub const CITY_LITE_DB_NAME: &str = "GeoLite2-City.mmdb";

/// Logging level for the application.
///
/// Controls the verbosity of log output, from most restrictive (Error) to most
/// verbose (Trace). Used with the `--log-level` CLI option.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum LogLevel {
    /// Errors only.
    Error,
    /// Warnings and errors.
    Warn,
    /// Per-file narrative (default).
    Info,
    /// Debug detail.
    Debug,
    /// Everything.
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Command-line options and configuration.
///
/// This struct is automatically generated by `clap` from the field attributes.
///
/// # Examples
///
/// ```bash
/// # Basic usage: enrich every *.log under ./logs, write results to ./out
/// iisgeolocate -d ./logs --csv-dir ./out
///
/// # Only the unique-IP summary is wanted
/// iisgeolocate -d ./logs --csv-dir ./out --nul
/// ```
#[derive(Debug, Clone, Parser)]
#[command(
    name = "iisgeolocate",
    about = "Geolocates IP addresses in IIS W3C access logs and extracts unique IPs."
)]
pub struct Config {
    /// The directory that contains IIS logs. This will be recursively searched for *.log files
    #[arg(short = 'd', long = "log-dir", value_parser)]
    pub log_dir: PathBuf,

    /// The directory to write results to
    #[arg(long = "csv-dir", value_parser)]
    pub csv_dir: PathBuf,

    /// When set, do NOT show bad lines on the console (they are still written to the bad-data file)
    #[arg(long = "sbl")]
    pub suppress_bad_lines: bool,

    /// When set, do NOT create enriched CSV files (the unique-IP summary is still written)
    #[arg(long = "nul")]
    pub no_updated_logs: bool,

    /// Explicit MaxMind city database path (.mmdb); overrides probing next to the executable
    #[arg(long)]
    pub geoip: Option<PathBuf>,

    /// Log level: error|warn|info|debug|trace
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,
}
