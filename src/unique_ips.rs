//! Process-lifetime registry of every distinct, successfully geolocated IP.

use std::io::Write;

use indexmap::IndexMap;
use serde::Serialize;

/// One distinct remote address and its resolved location, with the names
/// exactly as the database returned them (no underscore sanitization).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UniqueIpEntry {
    /// The address text exactly as it appeared in the log.
    pub ip_address: String,
    /// Resolved city name.
    pub city: String,
    /// Resolved country name.
    pub country: String,
}

/// Deduplicated, insertion-ordered set of geolocated IPs.
///
/// First-write-wins: a later resolution of an already-registered address
/// never overwrites the stored entry. There is no removal operation.
#[derive(Debug, Default)]
pub struct UniqueIpRegistry {
    entries: IndexMap<String, UniqueIpEntry>,
}

impl UniqueIpRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `ip` with its resolved location unless already present.
    pub fn register_if_absent(&mut self, ip: &str, city: &str, country: &str) {
        if !self.entries.contains_key(ip) {
            self.entries.insert(
                ip.to_string(),
                UniqueIpEntry {
                    ip_address: ip.to_string(),
                    city: city.to_string(),
                    country: country.to_string(),
                },
            );
        }
    }

    /// True when no IP has been registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct registered IPs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// All entries, in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = &UniqueIpEntry> {
        self.entries.values()
    }

    /// Serializes every entry to `out` as comma-delimited rows under an
    /// `IpAddress,City,Country` header, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn write_summary<W: Write>(&self, out: W) -> csv::Result<()> {
        let mut writer = csv::Writer::from_writer(out);
        for entry in self.entries.values() {
            writer.serialize(entry)?;
        }
        writer.flush()?;
        Ok(())
    }
}
