//! Jail registry management
//!
//! Reads and appends jail definition blocks in the host registry file
//! (`/etc/jail.conf` by default), and leases addresses out of the jail
//! subnet by scanning the addresses already registered there.
//!
//! Provides:
//! - Address leasing from the `10.80.0.0/24` jail subnet
//! - Appending formatted jail definition blocks
//! - Listing and duplicate detection for registered jails

use crate::error::{Error, Result};
use crate::store::ConfigStore;
use ipnet::Ipv4Net;
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// Subnet jail addresses are leased from
pub const JAIL_SUBNET: Ipv4Net = Ipv4Net::new_assert(Ipv4Addr::new(10, 80, 0, 0), 24);

/// A jail definition destined for the registry file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JailRecord {
    /// Jail name
    pub name: String,
    /// Fully qualified hostname
    pub hostname: String,
    /// Leased jail address
    pub ip: Ipv4Addr,
    /// Jail root directory
    pub path: PathBuf,
    /// Bridge interface the jail attaches to
    pub interface: String,
}

impl JailRecord {
    /// Render the record as a registry block
    ///
    /// The block is framed by blank lines so consecutive appends stay
    /// separated, and indented with four spaces like hand-written entries.
    pub fn format_block(&self) -> String {
        format!(
            "\n{} {{\n    host.hostname = \"{}\";\n    ip4.addr = \"{}\";\n    path = \"{}\";\n    interface = \"{}\";\n}}\n",
            self.name,
            self.hostname,
            self.ip,
            self.path.display(),
            self.interface
        )
    }
}

/// A jail parsed back out of the registry file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    /// Jail name
    pub name: String,
    /// Hostname, if the block declares one
    pub hostname: Option<String>,
    /// Address, if the block declares a parseable one
    pub ip: Option<Ipv4Addr>,
}

/// Collect every address currently registered
///
/// Scans for `ip4.addr` lines and parses the third whitespace field with
/// quotes and semicolons stripped. Lines that do not parse are skipped so
/// a hand-edited registry cannot wedge allocation.
pub fn used_ips(path: &Path) -> Result<HashSet<Ipv4Addr>> {
    let store = ConfigStore::load(path)?;
    let mut used = HashSet::new();

    for line in store.lines() {
        if !line.contains("ip4.addr") {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 {
            continue;
        }

        let value = parts[2].trim_matches(|c| c == '"' || c == ';');
        if let Ok(ip) = value.parse::<Ipv4Addr>() {
            used.insert(ip);
        }
    }

    Ok(used)
}

/// Lease the lowest free address in the jail subnet
///
/// The first host address is reserved for the bridge gateway, so leases
/// start at `.2`. Fails when all 253 leasable addresses are taken.
pub fn allocate_ip(path: &Path) -> Result<Ipv4Addr> {
    let used = used_ips(path)?;

    for candidate in JAIL_SUBNET.hosts().skip(1) {
        if !used.contains(&candidate) {
            return Ok(candidate);
        }
    }

    Err(Error::ExhaustedResource(format!(
        "no free address in {}",
        JAIL_SUBNET
    )))
}

/// List every jail defined in the registry
pub fn entries(path: &Path) -> Result<Vec<RegistryEntry>> {
    let store = ConfigStore::load(path)?;
    let mut entries = Vec::new();
    let mut current: Option<RegistryEntry> = None;

    for line in store.lines() {
        let trimmed = line.trim();

        if current.is_none() {
            if trimmed.ends_with('{') && !trimmed.starts_with('#') {
                let name = trimmed.trim_end_matches('{').trim();
                if !name.is_empty() {
                    current = Some(RegistryEntry {
                        name: name.to_string(),
                        hostname: None,
                        ip: None,
                    });
                }
            }
            continue;
        }

        if trimmed == "}" {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            continue;
        }

        if let Some(entry) = current.as_mut() {
            if let Some(value) = directive_value(trimmed, "host.hostname") {
                entry.hostname = Some(value.to_string());
            } else if let Some(value) = directive_value(trimmed, "ip4.addr") {
                entry.ip = value.parse().ok();
            }
        }
    }

    Ok(entries)
}

/// Check whether a jail name is already registered
pub fn contains(path: &Path, name: &str) -> Result<bool> {
    Ok(entries(path)?.iter().any(|entry| entry.name == name))
}

/// Append a jail record to the registry file
///
/// The registry must already exist; a host without one has not been set
/// up for jails and gets an error instead of a fresh file.
pub fn register_jail(path: &Path, record: &JailRecord) -> Result<()> {
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| Error::StoreUnwritable {
            path: path.to_path_buf(),
            source: e,
        })?;

    file.write_all(record.format_block().as_bytes())
        .map_err(|e| Error::StoreUnwritable {
            path: path.to_path_buf(),
            source: e,
        })?;

    Ok(())
}

fn directive_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(key)?.trim_start();
    let rest = rest.strip_prefix('=')?.trim();
    Some(rest.trim_matches(|c| c == '"' || c == ';'))
}
