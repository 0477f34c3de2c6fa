//! rc.conf loopback alias management
//!
//! Each jail address is mirrored onto the host loopback interface via
//! the `ipv4_addrs_<if>` directive in rc.conf. This module appends new
//! aliases to that space-separated list in place, leaving the rest of
//! the file untouched.

use crate::error::{Error, Result};
use crate::store::ConfigStore;
use ipnet::Ipv4Net;
use std::path::Path;

/// Append an alias to the loopback address list
///
/// Rewrites only the `ipv4_addrs_<interface>="..."` line, keeping any
/// trailing comment after the closing quote. The directive must already
/// exist; Shipwright does not take over loopback setup on hosts that
/// never configured one.
pub fn add_loopback_alias(path: &Path, interface: &str, alias: Ipv4Net) -> Result<()> {
    let mut store = ConfigStore::load(path)?;
    let key = format!("ipv4_addrs_{}=\"", interface);

    let position = store
        .lines()
        .iter()
        .position(|line| line.starts_with(&key))
        .ok_or_else(|| Error::DirectiveNotFound {
            directive: format!("ipv4_addrs_{}", interface),
            path: path.to_path_buf(),
        })?;

    let line = &store.lines()[position];
    let rest = &line[key.len()..];
    let (value, tail) = match rest.find('"') {
        Some(quote) => (&rest[..quote], &rest[quote + 1..]),
        None => (rest, ""),
    };

    let mut addrs: Vec<String> = value.split_whitespace().map(str::to_string).collect();
    addrs.push(alias.to_string());

    let rebuilt = format!("{}{}\"{}", key, addrs.join(" "), tail);
    store.replace_line(position, rebuilt);
    store.save()
}

/// Check whether rc.conf carries the loopback address directive
pub fn has_directive(path: &Path, interface: &str) -> Result<bool> {
    let store = ConfigStore::load(path)?;
    let key = format!("ipv4_addrs_{}=\"", interface);
    Ok(store.lines().iter().any(|line| line.starts_with(&key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::net::Ipv4Addr;
    use std::path::PathBuf;

    fn fixture(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn alias(d: u8) -> Ipv4Net {
        Ipv4Net::new_assert(Ipv4Addr::new(10, 80, 0, d), 24)
    }

    #[test]
    fn test_append_to_existing_list() {
        let path = fixture(
            "shipwright_test_rcconf_append.conf",
            "hostname=\"host\"\nipv4_addrs_lo1=\"10.80.0.2/24\"\nsshd_enable=\"YES\"\n",
        );

        add_loopback_alias(&path, "lo1", alias(3)).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "hostname=\"host\"\nipv4_addrs_lo1=\"10.80.0.2/24 10.80.0.3/24\"\nsshd_enable=\"YES\"\n"
        );

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_append_twice_accumulates() {
        let path = fixture(
            "shipwright_test_rcconf_twice.conf",
            "ipv4_addrs_lo1=\"10.80.0.2/24\"\n",
        );

        add_loopback_alias(&path, "lo1", alias(3)).unwrap();
        add_loopback_alias(&path, "lo1", alias(4)).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "ipv4_addrs_lo1=\"10.80.0.2/24 10.80.0.3/24 10.80.0.4/24\"\n");

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_append_to_empty_list() {
        let path = fixture("shipwright_test_rcconf_empty.conf", "ipv4_addrs_lo1=\"\"\n");

        add_loopback_alias(&path, "lo1", alias(2)).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "ipv4_addrs_lo1=\"10.80.0.2/24\"\n");

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_trailing_comment_preserved() {
        let path = fixture(
            "shipwright_test_rcconf_comment.conf",
            "ipv4_addrs_lo1=\"10.80.0.2/24\" # jail aliases\n",
        );

        add_loopback_alias(&path, "lo1", alias(3)).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "ipv4_addrs_lo1=\"10.80.0.2/24 10.80.0.3/24\" # jail aliases\n");

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_missing_directive() {
        let path = fixture(
            "shipwright_test_rcconf_missing.conf",
            "hostname=\"host\"\nsshd_enable=\"YES\"\n",
        );

        let result = add_loopback_alias(&path, "lo1", alias(2));
        assert!(matches!(result, Err(Error::DirectiveNotFound { .. })));

        // Refused edit must not touch the file
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "hostname=\"host\"\nsshd_enable=\"YES\"\n");

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_interface_must_match() {
        let path = fixture(
            "shipwright_test_rcconf_iface.conf",
            "ipv4_addrs_lo0=\"127.0.0.2/8\"\n",
        );

        let result = add_loopback_alias(&path, "lo1", alias(2));
        assert!(matches!(result, Err(Error::DirectiveNotFound { .. })));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_has_directive() {
        let path = fixture(
            "shipwright_test_rcconf_has.conf",
            "ipv4_addrs_lo1=\"10.80.0.2/24\"\n",
        );

        assert!(has_directive(&path, "lo1").unwrap());
        assert!(!has_directive(&path, "lo0").unwrap());

        let _ = fs::remove_file(&path);
    }
}
