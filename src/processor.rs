//! Per-chunk record processing: parse, classify, enrich, emit.
//!
//! One chunk is processed fully before the next begins. Malformed rows are
//! diverted to the bad-data sink and never abort the chunk.

use std::io::{self, Write};

use csv::{ReaderBuilder, StringRecord, Writer};
use log::warn;

use crate::chunker::Chunk;
use crate::config::{
    CLIENT_IP_COLUMN, FLUSH_INTERVAL_ROWS, GEO_CITY_COLUMN, GEO_COUNTRY_COLUMN,
};
use crate::geo::{CityDatabase, GeoLookup, GeoResolver};
use crate::unique_ips::UniqueIpRegistry;

/// Append-only destination for raw lines that failed shape validation.
pub struct BadDataSink<W: Write> {
    out: W,
}

impl<W: Write> BadDataSink<W> {
    /// Wraps `out` as the run-wide bad-data sink.
    pub fn new(out: W) -> Self {
        BadDataSink { out }
    }

    /// Appends one raw line verbatim.
    pub fn record(&mut self, raw: &str) -> io::Result<()> {
        writeln!(self.out, "{raw}")
    }

    /// Flushes buffered lines to the underlying writer.
    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Row accounting for one processed chunk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChunkStats {
    /// Well-formed rows enriched (and emitted, unless output is disabled).
    pub emitted: usize,
    /// Malformed rows diverted to the bad-data sink.
    pub bad: usize,
}

/// Processes one chunk: every data row is parsed against the chunk's schema,
/// enriched with `GeoCity`/`GeoCountry`, and written to `out` when present.
///
/// Rows whose token count does not match the schema go to `bad` verbatim and
/// are echoed as console warnings unless `suppress_bad_lines` is set. The
/// output writer is flushed every [`FLUSH_INTERVAL_ROWS`] emitted rows.
///
/// # Errors
///
/// Returns an error only for output/sink write failures; row-level
/// malformance never fails the chunk.
pub fn process_chunk<D, W, B>(
    chunk: &Chunk,
    resolver: &mut GeoResolver<D>,
    registry: &mut UniqueIpRegistry,
    mut out: Option<&mut Writer<W>>,
    bad: &mut BadDataSink<B>,
    suppress_bad_lines: bool,
) -> io::Result<ChunkStats>
where
    D: CityDatabase,
    W: Write,
    B: Write,
{
    let ip_index = chunk
        .columns
        .iter()
        .position(|column| column == CLIENT_IP_COLUMN);
    if ip_index.is_none() {
        warn!(
            "No {} column in schema '{}'; geolocation columns will be NA",
            CLIENT_IP_COLUMN,
            chunk.columns.join(" ")
        );
    }

    if let Some(writer) = out.as_mut() {
        writer.write_record(
            chunk
                .columns
                .iter()
                .map(String::as_str)
                .chain([GEO_CITY_COLUMN, GEO_COUNTRY_COLUMN]),
        )?;
    }

    let expected = chunk.columns.len();
    let mut stats = ChunkStats::default();

    for raw in chunk.data_rows() {
        let record = match parse_row(raw) {
            Some(record) if record.len() == expected => record,
            _ => {
                stats.bad += 1;
                bad.record(raw)?;
                if !suppress_bad_lines {
                    warn!("Bad data found! Ignoring!!! Row: '{}'", raw.trim());
                }
                continue;
            }
        };

        let geo = match ip_index.and_then(|i| record.get(i)) {
            Some(ip) if is_local_address(ip) => GeoLookup::not_available(),
            Some(ip) => resolver.resolve(ip, registry),
            None => GeoLookup::not_available(),
        };

        stats.emitted += 1;
        if let Some(writer) = out.as_mut() {
            writer.write_record(
                record
                    .iter()
                    .chain([geo.city.as_str(), geo.country.as_str()]),
            )?;
            if stats.emitted % FLUSH_INTERVAL_ROWS == 0 {
                writer.flush()?;
            }
        }
    }

    if let Some(writer) = out {
        writer.flush()?;
    }
    Ok(stats)
}

/// Splits one raw line into single-space-delimited tokens with `"` quoting.
/// Returns `None` when the line cannot be tokenized at all.
fn parse_row(raw: &str) -> Option<StringRecord> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .flexible(true)
        .from_reader(raw.as_bytes());
    let mut record = StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(true) => Some(record),
        _ => None,
    }
}

/// Addresses exempted from geo lookup: loopback, `10.`/`192.168` private
/// prefixes, and link-local IPv6. Deliberately narrower than full RFC1918;
/// 172.16/12 and multicast ranges are still looked up.
fn is_local_address(ip: &str) -> bool {
    ip == "127.0.0.1"
        || ip == "::1"
        || ip.starts_with("10.")
        || ip.starts_with("192.168")
        || ip.get(..4).is_some_and(|p| p.eq_ignore_ascii_case("fe80"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::chunk_file;
    use crate::geo::testing::FakeCityDb;
    use std::io::Cursor;

    fn single_chunk(content: &str) -> Chunk {
        let mut chunks = chunk_file(Cursor::new(content.to_string())).unwrap();
        assert_eq!(chunks.len(), 1);
        chunks.swap_remove_index(0).unwrap().1
    }

    fn run_chunk(
        chunk: &Chunk,
        db: &FakeCityDb,
        registry: &mut UniqueIpRegistry,
    ) -> (ChunkStats, String, String) {
        let mut resolver = GeoResolver::new(db);
        let mut out = Writer::from_writer(Vec::new());
        let mut bad = BadDataSink::new(Vec::new());
        let stats =
            process_chunk(chunk, &mut resolver, registry, Some(&mut out), &mut bad, true).unwrap();
        let out_text = String::from_utf8(out.into_inner().unwrap()).unwrap();
        let bad_text = String::from_utf8(bad.out).unwrap();
        (stats, out_text, bad_text)
    }

    #[test]
    fn test_enriches_remote_rows_and_diverts_bad_rows() {
        let chunk = single_chunk(
            "\
#Fields: date time c-ip
2024-01-01 00:00:01 203.0.113.5
bad row only one token
2024-01-01 00:00:03 203.0.113.5
",
        );
        let db = FakeCityDb::new().with("203.0.113.5", Some("New York"), Some("United States"));
        let mut registry = UniqueIpRegistry::new();
        let (stats, out, bad) = run_chunk(&chunk, &db, &mut registry);

        assert_eq!(stats, ChunkStats { emitted: 2, bad: 1 });
        assert_eq!(
            out,
            "date,time,c_ip,GeoCity,GeoCountry\n\
             2024-01-01,00:00:01,203.0.113.5,New_York,United_States\n\
             2024-01-01,00:00:03,203.0.113.5,New_York,United_States\n"
        );
        assert_eq!(bad, "bad row only one token\n");
        // Two rows, one external lookup.
        assert_eq!(db.lookup_count("203.0.113.5"), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_local_addresses_bypass_resolver() {
        let chunk = single_chunk(
            "\
#Fields: date c-ip
2024-01-01 127.0.0.1
2024-01-01 ::1
2024-01-01 10.0.0.8
2024-01-01 192.168.1.20
2024-01-01 fe80::1c2b:3f4d
2024-01-01 FE80::aaaa
",
        );
        let db = FakeCityDb::new();
        let mut registry = UniqueIpRegistry::new();
        let (stats, out, _) = run_chunk(&chunk, &db, &mut registry);

        assert_eq!(stats.emitted, 6);
        assert_eq!(db.total_lookups(), 0, "local addresses must not reach the database");
        assert!(registry.is_empty());
        for line in out.lines().skip(1) {
            assert!(line.ends_with(",NA,NA"), "expected NA/NA in: {line}");
        }
    }

    #[test]
    fn test_unresolvable_remote_address_gets_sentinel_and_no_summary_entry() {
        let chunk = single_chunk("#Fields: date c-ip\n2024-01-01 198.51.100.9\n");
        let db = FakeCityDb::new();
        let mut registry = UniqueIpRegistry::new();
        let (stats, out, _) = run_chunk(&chunk, &db, &mut registry);

        assert_eq!(stats.emitted, 1);
        assert!(out.contains("198.51.100.9,NA,NA"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_header_only_chunk_produces_header_only_output() {
        let chunk = single_chunk("#Fields: date time c-ip\n");
        let db = FakeCityDb::new();
        let mut registry = UniqueIpRegistry::new();
        let (stats, out, bad) = run_chunk(&chunk, &db, &mut registry);

        assert_eq!(stats, ChunkStats::default());
        assert_eq!(out, "date,time,c_ip,GeoCity,GeoCountry\n");
        assert!(bad.is_empty());
    }

    #[test]
    fn test_schema_without_client_ip_column_yields_sentinels() {
        let chunk = single_chunk("#Fields: date time cs-uri-stem\n2024-01-01 00:00:01 /index.html\n");
        let db = FakeCityDb::new().with("203.0.113.5", Some("Bend"), Some("United States"));
        let mut registry = UniqueIpRegistry::new();
        let (stats, out, _) = run_chunk(&chunk, &db, &mut registry);

        assert_eq!(stats.emitted, 1);
        assert!(out.contains("/index.html,NA,NA"));
        assert_eq!(db.total_lookups(), 0);
    }

    #[test]
    fn test_quoted_field_containing_delimiter_counts_as_one_token() {
        let chunk = single_chunk(
            "#Fields: date cs-uri-stem c-ip\n2024-01-01 \"/some path/page\" 203.0.113.5\n",
        );
        let db = FakeCityDb::new().with("203.0.113.5", Some("Bend"), Some("United States"));
        let mut registry = UniqueIpRegistry::new();
        let (stats, _, bad) = run_chunk(&chunk, &db, &mut registry);

        assert_eq!(stats, ChunkStats { emitted: 1, bad: 0 });
        assert!(bad.is_empty());
        assert_eq!(db.lookup_count("203.0.113.5"), 1);
    }

    #[test]
    fn test_output_disabled_still_counts_and_registers() {
        let chunk = single_chunk("#Fields: date c-ip\n2024-01-01 203.0.113.5\n");
        let db = FakeCityDb::new().with("203.0.113.5", Some("Bend"), Some("United States"));
        let mut resolver = GeoResolver::new(&db);
        let mut registry = UniqueIpRegistry::new();
        let mut bad = BadDataSink::new(Vec::new());

        let stats = process_chunk::<_, Vec<u8>, _>(
            &chunk,
            &mut resolver,
            &mut registry,
            None,
            &mut bad,
            true,
        )
        .unwrap();

        assert_eq!(stats.emitted, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_is_local_address_rule_is_narrow() {
        for local in ["127.0.0.1", "::1", "10.1.2.3", "192.168.0.1", "fe80::1", "FE80::2"] {
            assert!(is_local_address(local), "{local} should be local");
        }
        // 172.16/12 and multicast are deliberately still remote.
        for remote in ["172.16.0.1", "224.0.0.1", "8.8.8.8", "192.169.0.1", "100.0.0.1"] {
            assert!(!is_local_address(remote), "{remote} should be remote");
        }
    }
}
