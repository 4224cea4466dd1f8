//! Geo resolution: the narrow seam over the city database plus the per-run
//! memoization cache.
//!
//! The database is consumed through the [`CityDatabase`] trait so the
//! resolver, processor, and pipeline can be exercised in tests without a
//! binary `.mmdb` fixture.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;

use maxminddb::{geoip2, Mmap, Reader};
use thiserror::Error;

use crate::config::NOT_AVAILABLE;
use crate::unique_ips::UniqueIpRegistry;

/// Faults surfaced by a city-database lookup.
///
/// A valid address that is simply absent from the database is *not* an error;
/// that outcome is `Ok(None)` on [`CityDatabase::find_city`].
#[derive(Error, Debug)]
pub enum GeoError {
    /// The query text is not an IP address.
    #[error("invalid IP address: {0}")]
    InvalidAddress(#[from] std::net::AddrParseError),

    /// The backing database failed to open, read, or decode.
    #[error("database error: {0}")]
    Database(#[from] maxminddb::MaxMindDbError),
}

/// City and country names for a resolvable address, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CityRecord {
    /// English city name, when the database carries one.
    pub city: Option<String>,
    /// English country name, when the database carries one.
    pub country: Option<String>,
}

/// The geo-lookup collaborator, as consumed by the pipeline: one query,
/// three outcomes (found, not found, error).
pub trait CityDatabase {
    /// Looks up `ip`. `Ok(None)` means the address is syntactically valid but
    /// not present in the database.
    fn find_city(&self, ip: &str) -> Result<Option<CityRecord>, GeoError>;
}

/// A MaxMind city database (GeoIP2-City or GeoLite2-City), memory-mapped.
pub struct MaxMindCityDb {
    reader: Reader<Mmap>,
}

impl MaxMindCityDb {
    /// Opens the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be mapped or is not a valid MMDB.
    pub fn open(path: &Path) -> Result<Self, GeoError> {
        let reader = unsafe { Reader::open_mmap(path) }?;
        Ok(MaxMindCityDb { reader })
    }
}

impl CityDatabase for MaxMindCityDb {
    fn find_city(&self, ip: &str) -> Result<Option<CityRecord>, GeoError> {
        let addr: IpAddr = ip.parse()?;
        let lookup = self.reader.lookup(addr)?;
        if !lookup.has_data() {
            return Ok(None);
        }
        let Some(city) = lookup.decode::<geoip2::City>()? else {
            return Ok(None);
        };
        Ok(Some(CityRecord {
            city: city.city.names.english.map(|s| s.to_string()),
            country: city.country.names.english.map(|s| s.to_string()),
        }))
    }
}

/// Geolocation for one record, already sanitized for delimited output:
/// multi-word place names are underscore-joined, unresolved fields are `NA`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoLookup {
    /// Sanitized city name or `NA`.
    pub city: String,
    /// Sanitized country name or `NA`.
    pub country: String,
}

impl GeoLookup {
    /// The `NA`/`NA` sentinel.
    pub fn not_available() -> Self {
        GeoLookup {
            city: NOT_AVAILABLE.to_string(),
            country: NOT_AVAILABLE.to_string(),
        }
    }
}

/// Memoizing wrapper around a [`CityDatabase`].
///
/// The first resolution of a given IP consults the database and stores the
/// outcome; every later resolution of the same IP within the run returns the
/// cached outcome, success or not. Successful first-time resolutions also
/// register the address in the unique-IP registry with the *unsanitized*
/// city/country text.
pub struct GeoResolver<D> {
    db: D,
    cache: HashMap<String, GeoLookup>,
}

impl<D: CityDatabase> GeoResolver<D> {
    /// Creates a resolver over `db` with an empty cache.
    pub fn new(db: D) -> Self {
        GeoResolver {
            db,
            cache: HashMap::new(),
        }
    }

    /// Resolves `ip`, consulting the database at most once per distinct
    /// address per run.
    ///
    /// A database miss is an expected, frequent outcome and stays silent;
    /// any other fault is logged with the offending IP. Both return the
    /// `NA`/`NA` sentinel.
    pub fn resolve(&mut self, ip: &str, registry: &mut UniqueIpRegistry) -> GeoLookup {
        if let Some(hit) = self.cache.get(ip) {
            return hit.clone();
        }
        let result = match self.db.find_city(ip) {
            Ok(Some(record)) => {
                registry.register_if_absent(
                    ip,
                    record.city.as_deref().unwrap_or(NOT_AVAILABLE),
                    record.country.as_deref().unwrap_or(NOT_AVAILABLE),
                );
                GeoLookup {
                    city: sanitize(record.city.as_deref()),
                    country: sanitize(record.country.as_deref()),
                }
            }
            Ok(None) => GeoLookup::not_available(),
            Err(e) => {
                log::error!("Error {} for ip: {}", e, ip);
                GeoLookup::not_available()
            }
        };
        self.cache.insert(ip.to_string(), result.clone());
        result
    }
}

/// Underscore-joins a place name so it stays a single token under whitespace
/// delimiting; `None` becomes the `NA` sentinel.
fn sanitize(name: Option<&str>) -> String {
    match name {
        Some(n) => n.replace(' ', "_"),
        None => NOT_AVAILABLE.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashSet;

    /// In-memory city database for tests: maps IP text to a record and counts
    /// how often each address is looked up.
    pub(crate) struct FakeCityDb {
        records: HashMap<String, CityRecord>,
        failing: HashSet<String>,
        lookups: RefCell<HashMap<String, usize>>,
    }

    impl FakeCityDb {
        pub(crate) fn new() -> Self {
            FakeCityDb {
                records: HashMap::new(),
                failing: HashSet::new(),
                lookups: RefCell::new(HashMap::new()),
            }
        }

        pub(crate) fn with(mut self, ip: &str, city: Option<&str>, country: Option<&str>) -> Self {
            self.records.insert(
                ip.to_string(),
                CityRecord {
                    city: city.map(str::to_string),
                    country: country.map(str::to_string),
                },
            );
            self
        }

        pub(crate) fn with_failure(mut self, ip: &str) -> Self {
            self.failing.insert(ip.to_string());
            self
        }

        pub(crate) fn lookup_count(&self, ip: &str) -> usize {
            self.lookups.borrow().get(ip).copied().unwrap_or(0)
        }

        pub(crate) fn total_lookups(&self) -> usize {
            self.lookups.borrow().values().sum()
        }
    }

    impl CityDatabase for FakeCityDb {
        fn find_city(&self, ip: &str) -> Result<Option<CityRecord>, GeoError> {
            *self.lookups.borrow_mut().entry(ip.to_string()).or_insert(0) += 1;
            if self.failing.contains(ip) {
                let parse_err = "not an ip".parse::<IpAddr>().unwrap_err();
                return Err(GeoError::InvalidAddress(parse_err));
            }
            Ok(self.records.get(ip).cloned())
        }
    }

    impl CityDatabase for &FakeCityDb {
        fn find_city(&self, ip: &str) -> Result<Option<CityRecord>, GeoError> {
            (**self).find_city(ip)
        }
    }
}
