//! Run orchestration: startup validation, per-file chunking and enrichment,
//! and the end-of-run unique-IP dump.
//!
//! Execution is strictly sequential: one file is fully consumed before the
//! next begins, and within a file chunking completes before any chunk's
//! records are processed. A failure never crosses file boundaries.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use log::{info, warn};

use crate::chunker::chunk_file;
use crate::config::{
    Config, BAD_DATA_FILE_NAME, CITY_DB_NAME, CITY_LITE_DB_NAME, LOG_EXTENSION,
    UNIQUE_IPS_FILE_NAME,
};
use crate::errors::JobError;
use crate::geo::{CityDatabase, GeoResolver, MaxMindCityDb};
use crate::processor::{process_chunk, BadDataSink, ChunkStats};
use crate::unique_ips::UniqueIpRegistry;

/// End-of-run accounting returned to the binary.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Log files discovered under the input root.
    pub files_found: usize,
    /// Files that produced at least one chunk.
    pub files_processed: usize,
    /// Files skipped for structural reasons.
    pub files_skipped: usize,
    /// Well-formed rows enriched across all chunks.
    pub rows_emitted: usize,
    /// Malformed rows written to the bad-data file.
    pub bad_rows: usize,
    /// Distinct successfully geolocated IPs.
    pub unique_ips: usize,
}

/// Runs the whole job: locates the city database, scans for log files, and
/// enriches every file found.
///
/// # Errors
///
/// Returns an error for the fatal startup conditions (missing input
/// directory, missing city database, zero matching log files) and for output
/// I/O failures outside any single file's processing.
pub fn run_job(config: Config) -> Result<RunReport> {
    if !config.log_dir.is_dir() {
        return Err(JobError::MissingLogDirectory(config.log_dir).into());
    }

    let db_path = locate_city_database(config.geoip.as_deref())?;
    let database = MaxMindCityDb::open(&db_path)
        .with_context(|| format!("Failed to open city database {}", db_path.display()))?;

    run_with_database(config, database)
}

/// Locates the MaxMind city database. An explicit override path wins;
/// otherwise the two well-known filenames are probed next to the executable,
/// premium preferred over lite.
fn locate_city_database(override_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = override_path {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(JobError::MissingCityDatabase)
                .with_context(|| format!("{} does not exist", path.display()))
        };
    }

    let exe = std::env::current_exe().context("Failed to locate the executable")?;
    let base = exe.parent().unwrap_or_else(|| Path::new("."));
    let premium = base.join(CITY_DB_NAME);
    let lite = base.join(CITY_LITE_DB_NAME);

    if premium.is_file() {
        info!("Found {CITY_DB_NAME}, so using that vs lite...");
        Ok(premium)
    } else if lite.is_file() {
        Ok(lite)
    } else {
        Err(JobError::MissingCityDatabase.into())
    }
}

/// Runs the pipeline against an already-open city database.
///
/// Split out from [`run_job`] so the whole pipeline can be exercised with an
/// in-memory database in tests.
pub(crate) fn run_with_database<D: CityDatabase>(config: Config, database: D) -> Result<RunReport> {
    let log_files = collect_log_files(&config.log_dir)?;
    if log_files.is_empty() {
        // Nothing is created in the output directory in this case.
        return Err(JobError::NoLogFiles(config.log_dir).into());
    }
    info!("Found {} log files", log_files.len());

    fs::create_dir_all(&config.csv_dir).with_context(|| {
        format!("Failed to create output directory {}", config.csv_dir.display())
    })?;

    info!(
        "NOTE: multicast, private, or reserved addresses will be SKIPPED (including IPv6 that starts with fe80)"
    );
    let bad_path = config.csv_dir.join(BAD_DATA_FILE_NAME);
    let bad_file = File::create(&bad_path)
        .with_context(|| format!("Failed to create {}", bad_path.display()))?;
    let mut bad_sink = BadDataSink::new(BufWriter::new(bad_file));
    info!(
        "All malformed data rows will be IGNORED but written to {}. REVIEW THIS!",
        bad_path.display()
    );

    let mut resolver = GeoResolver::new(database);
    let mut registry = UniqueIpRegistry::new();
    let run_stamp = Utc::now().format("%Y%m%d%H%M%S").to_string();

    let mut report = RunReport {
        files_found: log_files.len(),
        ..Default::default()
    };

    for file in &log_files {
        info!("Opening {}", file.display());
        match process_file(
            file,
            &config,
            &run_stamp,
            &mut resolver,
            &mut registry,
            &mut bad_sink,
        ) {
            Ok(Some(totals)) => {
                report.files_processed += 1;
                report.rows_emitted += totals.emitted;
                report.bad_rows += totals.bad;
            }
            Ok(None) => report.files_skipped += 1,
            Err(e) => {
                warn!("Failed to process {}: {:#}. Skipping...", file.display(), e);
                report.files_skipped += 1;
            }
        }
        bad_sink.flush().context("Failed to flush the bad-data file")?;
    }

    report.unique_ips = registry.len();
    if registry.is_empty() {
        info!("No unique, geolocated IPs found!");
    } else {
        let summary_path = config.csv_dir.join(UNIQUE_IPS_FILE_NAME);
        info!("Saving unique IPs to {}", summary_path.display());
        let summary_file = File::create(&summary_path)
            .with_context(|| format!("Failed to create {}", summary_path.display()))?;
        registry
            .write_summary(BufWriter::new(summary_file))
            .context("Failed to write the unique-IP summary")?;
    }

    Ok(report)
}

/// Chunks and enriches one log file. `Ok(None)` means the file was skipped
/// for a structural reason (already logged); errors are output I/O faults.
fn process_file<D: CityDatabase>(
    file: &Path,
    config: &Config,
    run_stamp: &str,
    resolver: &mut GeoResolver<D>,
    registry: &mut UniqueIpRegistry,
    bad_sink: &mut BadDataSink<BufWriter<File>>,
) -> Result<Option<ChunkStats>> {
    let reader = match File::open(file) {
        Ok(f) => BufReader::new(f),
        Err(e) => {
            warn!("\tFailed to open {}: {}. Skipping...", file.display(), e);
            return Ok(None);
        }
    };

    let chunks = match chunk_file(reader) {
        Ok(chunks) => chunks,
        Err(skip) => {
            warn!("\t{}: {}. Skipping...", file.display(), skip);
            return Ok(None);
        }
    };

    info!(
        "\tLog chunks found in {}: {}. Processing chunks...",
        file.display(),
        chunks.len()
    );

    let base_name = file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(LOG_EXTENSION);
    let mut totals = ChunkStats::default();

    for (counter, chunk) in chunks.values().enumerate() {
        let counter = counter + 1;
        info!("\tFound {} rows in chunk {}", chunk.data_rows().len(), counter);

        let mut writer = if config.no_updated_logs {
            None
        } else {
            let out_path = config
                .csv_dir
                .join(format!("{run_stamp}_{base_name}_Chunk{counter}.csv"));
            let out_file = File::create(&out_path)
                .with_context(|| format!("Failed to create {}", out_path.display()))?;
            Some(csv::Writer::from_writer(BufWriter::new(out_file)))
        };

        let stats = process_chunk(
            chunk,
            resolver,
            registry,
            writer.as_mut(),
            bad_sink,
            config.suppress_bad_lines,
        )
        .with_context(|| format!("Failed while writing chunk {counter} of {}", file.display()))?;
        totals.emitted += stats.emitted;
        totals.bad += stats.bad;
    }

    Ok(Some(totals))
}

/// Recursively collects every `*.log` file under `root`, sorted for a stable
/// processing order. The extension match is case-insensitive.
fn collect_log_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = fs::read_dir(&dir)
            .with_context(|| format!("Failed to read directory {}", dir.display()))?;
        for entry in entries {
            let path = entry
                .with_context(|| format!("Failed to read an entry of {}", dir.display()))?
                .path();
            if path.is_dir() {
                stack.push(path);
            } else if path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(LOG_EXTENSION))
            {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}
