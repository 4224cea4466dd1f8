//! iisgeolocate library: geolocation enrichment for IIS W3C access logs.
//!
//! The pipeline splits each raw log file into homogeneous schema chunks
//! (IIS re-emits its header block on rotation and restart), parses every
//! chunk as space-delimited records, appends `GeoCity`/`GeoCountry` columns
//! resolved through a MaxMind city database, and tracks a deduplicated
//! registry of every successfully geolocated address.
//!
//! # Example
//!
//! ```no_run
//! use iisgeolocate::{run_job, Config};
//! use clap::Parser;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = Config::parse_from(["iisgeolocate", "-d", "./logs", "--csv-dir", "./out"]);
//! let report = run_job(config)?;
//! println!("{} unique IPs", report.unique_ips);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod chunker;
pub mod config;
mod errors;
mod geo;
pub mod initialization;
mod pipeline;
mod processor;
mod unique_ips;

pub use config::{Config, LogLevel};
pub use errors::{FileSkip, JobError};
pub use pipeline::{run_job, RunReport};
