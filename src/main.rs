//! Command-line entry point.
//!
//! A thin wrapper around the `iisgeolocate` library: argument parsing, logger
//! initialization, and the final console summary live here.

use std::process;

use anyhow::{Context, Result};
use clap::Parser;

use iisgeolocate::initialization::init_logger;
use iisgeolocate::{run_job, Config};

fn main() -> Result<()> {
    let config = Config::parse();
    init_logger(config.log_level.into()).context("Failed to initialize logger")?;

    match run_job(config) {
        Ok(report) => {
            println!(
                "Processed {} of {} log file{} ({} skipped): {} enriched rows, {} bad rows, {} unique IPs",
                report.files_processed,
                report.files_found,
                if report.files_found == 1 { "" } else { "s" },
                report.files_skipped,
                report.rows_emitted,
                report.bad_rows,
                report.unique_ips
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("iisgeolocate error: {:#}", e);
            process::exit(1);
        }
    }
}
