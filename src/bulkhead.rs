//! PF port forwarding management
//!
//! Reserves external SSH ports by scanning `pf.conf` for existing rdr
//! rules, renders new rules, and splices them in above the bridge pass
//! rule so redirects always precede it.
//!
//! Provides:
//! - Port reservation from a fixed window above the configured base
//! - rdr rule rendering and parsing
//! - Rule insertion anchored to the bridge pass rule

use crate::error::{Error, Result};
use crate::store::ConfigStore;
use nom::{
    bytes::complete::{tag, take_while1},
    character::complete::digit1,
    combinator::map_res,
    Parser,
};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::Path;

/// Rule every redirect must be inserted above
pub const ANCHOR_RULE: &str = "pass on $bridge_if all";

/// Number of external ports scanned above the base port
pub const PORT_WINDOW: u16 = 100;

/// A TCP redirect from a host port to a jail address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortForward {
    /// Port exposed on the host
    pub external_port: u16,
    /// Jail address traffic is redirected to
    pub jail_ip: Ipv4Addr,
    /// Port inside the jail
    pub internal_port: u16,
    /// Jail name, kept as a rule comment
    pub jail_name: String,
}

impl PortForward {
    /// Create a new port forward
    pub fn new(external_port: u16, jail_ip: Ipv4Addr, internal_port: u16, jail_name: &str) -> Self {
        Self {
            external_port,
            jail_ip,
            internal_port,
            jail_name: jail_name.to_string(),
        }
    }

    /// Render the forward as a pf.conf rdr rule
    pub fn to_pf_rule(&self) -> String {
        format!(
            "rdr pass on $ext_if proto tcp from any to $ext_if port {} -> {} port {} #{}",
            self.external_port, self.jail_ip, self.internal_port, self.jail_name
        )
    }
}

fn port_number(input: &str) -> nom::IResult<&str, u16> {
    map_res(digit1, str::parse::<u16>).parse(input)
}

fn ipv4_address(input: &str) -> nom::IResult<&str, Ipv4Addr> {
    map_res(
        take_while1(|c: char| c.is_ascii_digit() || c == '.'),
        str::parse::<Ipv4Addr>,
    )
    .parse(input)
}

/// Parse the external port out of an rdr rule line
///
/// Matches the exact shape produced by [`PortForward::to_pf_rule`].
/// Trailing text after the comment is tolerated, anything else fails.
fn rdr_external_port(input: &str) -> nom::IResult<&str, u16> {
    let (input, _) = tag("rdr pass on $ext_if proto tcp from any to $ext_if port ").parse(input)?;
    let (input, external) = port_number(input)?;
    let (input, _) = tag(" -> ").parse(input)?;
    let (input, _) = ipv4_address(input)?;
    let (input, _) = tag(" port ").parse(input)?;
    let (input, _) = port_number(input)?;
    let (input, _) = tag(" #").parse(input)?;
    let (input, _) = take_while1(|c: char| c.is_alphanumeric() || c == '_').parse(input)?;
    Ok((input, external))
}

/// Collect every external port already redirected
pub fn used_ports(path: &Path) -> Result<HashSet<u16>> {
    let store = ConfigStore::load(path)?;
    let mut used = HashSet::new();

    for line in store.lines() {
        if let Ok((_, port)) = rdr_external_port(line.trim()) {
            used.insert(port);
        }
    }

    Ok(used)
}

/// Reserve the lowest free external port in the window
pub fn allocate_port(path: &Path, base_port: u16) -> Result<u16> {
    let used = used_ports(path)?;
    let end = base_port.saturating_add(PORT_WINDOW - 1);

    for candidate in base_port..=end {
        if !used.contains(&candidate) {
            return Ok(candidate);
        }
    }

    Err(Error::ExhaustedResource(format!(
        "no free port between {} and {}",
        base_port, end
    )))
}

/// Insert a redirect rule directly above the bridge pass rule
///
/// A pf.conf without the pass rule is refused outright; appending the
/// redirect anywhere else would leave it unreachable behind the pass.
pub fn insert_forward_rule(path: &Path, forward: &PortForward) -> Result<()> {
    let mut store = ConfigStore::load(path)?;

    let position = store
        .lines()
        .iter()
        .position(|line| line.contains(ANCHOR_RULE))
        .ok_or_else(|| Error::AnchorNotFound {
            anchor: ANCHOR_RULE.to_string(),
            path: path.to_path_buf(),
        })?;

    store.insert_line(position, forward.to_pf_rule());
    store.save()
}

/// Check whether the pf.conf carries the bridge pass rule
pub fn has_anchor(path: &Path) -> Result<bool> {
    let store = ConfigStore::load(path)?;
    Ok(store.lines().iter().any(|line| line.contains(ANCHOR_RULE)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn fixture(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_to_pf_rule() {
        let forward = PortForward::new(2225, Ipv4Addr::new(10, 80, 0, 2), 2225, "web1");
        assert_eq!(
            forward.to_pf_rule(),
            "rdr pass on $ext_if proto tcp from any to $ext_if port 2225 -> 10.80.0.2 port 2225 #web1"
        );
    }

    #[test]
    fn test_parse_external_port() {
        let line = "rdr pass on $ext_if proto tcp from any to $ext_if port 2226 -> 10.80.0.3 port 2226 #db1";
        let (_, port) = rdr_external_port(line).unwrap();
        assert_eq!(port, 2226);
    }

    #[test]
    fn test_parse_rejects_other_rules() {
        assert!(rdr_external_port("pass on $bridge_if all").is_err());
        assert!(rdr_external_port("rdr pass on $ext_if proto udp from any to $ext_if port 53 -> 10.80.0.2 port 53 #dns").is_err());
        assert!(rdr_external_port("# rdr pass on $ext_if proto tcp from any to $ext_if port 2225 -> 10.80.0.2 port 2225 #web1").is_err());
    }

    #[test]
    fn test_parse_roundtrip() {
        let forward = PortForward::new(2299, Ipv4Addr::new(10, 80, 0, 40), 2299, "buildbox");
        let (_, port) = rdr_external_port(&forward.to_pf_rule()).unwrap();
        assert_eq!(port, 2299);
    }

    #[test]
    fn test_used_ports() {
        let path = fixture(
            "shipwright_test_bulkhead_used.conf",
            "ext_if=\"em0\"\nrdr pass on $ext_if proto tcp from any to $ext_if port 2225 -> 10.80.0.2 port 2225 #web1\nrdr pass on $ext_if proto tcp from any to $ext_if port 2227 -> 10.80.0.4 port 2227 #db1\npass on $bridge_if all\n",
        );

        let used = used_ports(&path).unwrap();
        assert_eq!(used.len(), 2);
        assert!(used.contains(&2225));
        assert!(used.contains(&2227));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_allocate_port_base_free() {
        let path = fixture("shipwright_test_bulkhead_base.conf", "pass on $bridge_if all\n");
        assert_eq!(allocate_port(&path, 2225).unwrap(), 2225);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_allocate_port_skips_used() {
        let path = fixture(
            "shipwright_test_bulkhead_skip.conf",
            "rdr pass on $ext_if proto tcp from any to $ext_if port 2225 -> 10.80.0.2 port 2225 #a\nrdr pass on $ext_if proto tcp from any to $ext_if port 2226 -> 10.80.0.3 port 2226 #b\npass on $bridge_if all\n",
        );

        assert_eq!(allocate_port(&path, 2225).unwrap(), 2227);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_allocate_port_exhausted() {
        let mut content = String::new();
        for port in 2225..2225 + PORT_WINDOW {
            content.push_str(&format!(
                "rdr pass on $ext_if proto tcp from any to $ext_if port {} -> 10.80.0.2 port {} #j{}\n",
                port, port, port
            ));
        }
        content.push_str("pass on $bridge_if all\n");
        let path = fixture("shipwright_test_bulkhead_full.conf", &content);

        let result = allocate_port(&path, 2225);
        assert!(matches!(result, Err(Error::ExhaustedResource(_))));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_insert_forward_rule_above_anchor() {
        let path = fixture(
            "shipwright_test_bulkhead_insert.conf",
            "ext_if=\"em0\"\nscrub in all\npass on $bridge_if all\nblock in log all\n",
        );

        let forward = PortForward::new(2225, Ipv4Addr::new(10, 80, 0, 2), 2225, "web1");
        insert_forward_rule(&path, &forward).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.split('\n').collect();
        assert_eq!(lines[0], "ext_if=\"em0\"");
        assert_eq!(lines[1], "scrub in all");
        assert_eq!(lines[2], forward.to_pf_rule());
        assert_eq!(lines[3], "pass on $bridge_if all");
        assert_eq!(lines[4], "block in log all");

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_insert_forward_rule_missing_anchor() {
        let path = fixture(
            "shipwright_test_bulkhead_noanchor.conf",
            "ext_if=\"em0\"\nblock in log all\n",
        );

        let forward = PortForward::new(2225, Ipv4Addr::new(10, 80, 0, 2), 2225, "web1");
        let result = insert_forward_rule(&path, &forward);
        assert!(matches!(result, Err(Error::AnchorNotFound { .. })));

        // Refused insert must not touch the file
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "ext_if=\"em0\"\nblock in log all\n");

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_has_anchor() {
        let with = fixture("shipwright_test_bulkhead_hasanchor.conf", "pass on $bridge_if all\n");
        let without = fixture("shipwright_test_bulkhead_lacksanchor.conf", "block in all\n");

        assert!(has_anchor(&with).unwrap());
        assert!(!has_anchor(&without).unwrap());

        let _ = fs::remove_file(&with);
        let _ = fs::remove_file(&without);
    }
}
