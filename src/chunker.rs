//! Header-aware re-chunking of a raw IIS log file.
//!
//! IIS re-emits its comment header block on rotation and on certain restart
//! events, so a single physical file can carry several differently-shaped
//! column schemas concatenated together. This module splits such a file into
//! homogeneous chunks, each holding every data row written under one schema.

use std::io::BufRead;

use indexmap::IndexMap;

use crate::config::{
    COMMENT_PREFIX, EXCHANGE_SOFTWARE_PREFIX, FIELDS_PREFIX, GEO_CITY_COLUMN, GEO_COUNTRY_COLUMN,
};
use crate::errors::FileSkip;

/// A contiguous-schema slice of one log file: the normalized column names and
/// every raw line that belongs to them.
///
/// The first line is always a synthetic header (normalized columns plus the
/// two derived column names), so the chunk is a self-describing record stream.
#[derive(Debug)]
pub struct Chunk {
    /// Normalized column names, in declaration order.
    pub columns: Vec<String>,
    /// Synthetic header followed by the raw data rows.
    pub lines: Vec<String>,
}

impl Chunk {
    fn new(schema: &str) -> Self {
        Chunk {
            columns: schema.split_whitespace().map(str::to_string).collect(),
            lines: vec![format!("{schema} {GEO_CITY_COLUMN} {GEO_COUNTRY_COLUMN}")],
        }
    }

    /// The raw data rows, without the synthetic header.
    pub fn data_rows(&self) -> &[String] {
        &self.lines[1..]
    }
}

/// Classification of a single raw log line.
#[derive(Debug, PartialEq, Eq)]
enum LineKind<'a> {
    /// A `#`-prefixed metadata line that is not a fields declaration.
    CommentMeta,
    /// A `#Fields:` line; carries the raw column list.
    FieldsDeclaration(&'a str),
    /// Anything else with content.
    DataRow,
    /// Empty or whitespace-only.
    Blank,
}

fn classify(line: &str) -> LineKind<'_> {
    if line.trim().is_empty() {
        LineKind::Blank
    } else if let Some(fields) = line.strip_prefix(FIELDS_PREFIX) {
        LineKind::FieldsDeclaration(fields)
    } else if line.starts_with(COMMENT_PREFIX) {
        LineKind::CommentMeta
    } else {
        LineKind::DataRow
    }
}

/// Normalizes a fields declaration so every column name is usable as a bare
/// record-field identifier: IIS names like `c-ip` become `c_ip`.
///
/// Two declarations denote the same schema iff their normalized text is
/// byte-identical.
pub fn normalize_schema(fields: &str) -> String {
    fields.trim().replace('-', "_")
}

/// Splits a raw log file into chunks keyed by normalized schema text.
///
/// Iteration order of the returned map equals first-seen order of each
/// distinct schema, which downstream output naming depends on. An identical
/// consecutive redeclaration continues the current chunk; a redeclaration
/// matching an earlier schema re-activates that chunk and appends to it.
///
/// # Errors
///
/// Returns a [`FileSkip`] when the file is empty, is not a W3C extended log,
/// belongs to an unsupported product, carries data before any `#Fields:`
/// declaration, or cannot be read.
pub fn chunk_file<R: BufRead>(reader: R) -> Result<IndexMap<String, Chunk>, FileSkip> {
    let mut lines = reader.lines();

    let first = match lines.next() {
        None => return Err(FileSkip::Empty),
        Some(line) => line?,
    };
    if !first.starts_with(COMMENT_PREFIX) {
        return Err(FileSkip::NotIisFormat);
    }
    if first.starts_with(EXCHANGE_SOFTWARE_PREFIX) {
        return Err(FileSkip::UnsupportedSoftware);
    }

    let mut chunks: IndexMap<String, Chunk> = IndexMap::new();
    let mut active: Option<String> = None;

    // The first line is re-examined here: it may itself be a #Fields: line.
    let mut pending = Some(Ok(first));
    loop {
        let line = match pending.take().or_else(|| lines.next()) {
            None => break,
            Some(result) => result?,
        };
        match classify(&line) {
            LineKind::Blank | LineKind::CommentMeta => {}
            LineKind::FieldsDeclaration(fields) => {
                let schema = normalize_schema(fields);
                if active.as_deref() == Some(schema.as_str()) {
                    // IIS re-emitted the same header; keep appending to the
                    // current chunk without a second header row.
                    continue;
                }
                chunks
                    .entry(schema.clone())
                    .or_insert_with(|| Chunk::new(&schema));
                active = Some(schema);
            }
            LineKind::DataRow => {
                let Some(schema) = active.as_deref() else {
                    return Err(FileSkip::DataBeforeFields);
                };
                if let Some(chunk) = chunks.get_mut(schema) {
                    chunk.lines.push(line);
                }
            }
        }
    }

    Ok(chunks)
}
