//! Configuration file parsing for Shipwright
//!
//! Parses `shipwright.toml` configuration files using serde. Every field
//! has a default matching a stock FreeBSD host, so the tool also runs
//! without a config file at all.

use crate::bulkhead::PORT_WINDOW;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Load configuration from a file
pub fn load(path: &Path) -> Result<Manifest> {
    let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let manifest: Manifest = toml::from_str(&content)?;
    manifest.validate()?;

    Ok(manifest)
}

/// Load configuration if the file exists, defaults otherwise
///
/// A present-but-broken file is still an error; only absence falls back.
pub fn load_or_default(path: &Path) -> Result<Manifest> {
    if path.exists() {
        load(path)
    } else {
        Ok(Manifest::default())
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    /// Host file locations
    #[serde(default)]
    pub host: HostPaths,

    /// Network allocation settings
    #[serde(default)]
    pub network: NetworkSettings,

    /// Per-stage command deadlines
    #[serde(default)]
    pub timeouts: Timeouts,
}

impl Manifest {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.network.interface.is_empty() {
            return Err(Error::ConfigValidation("interface must not be empty".into()));
        }

        if self.network.loopback.is_empty() {
            return Err(Error::ConfigValidation("loopback must not be empty".into()));
        }

        // The port scan walks a fixed window above the base
        if self.network.base_port.checked_add(PORT_WINDOW - 1).is_none() {
            return Err(Error::ConfigValidation(format!(
                "base_port {} leaves no room for a {}-port window",
                self.network.base_port, PORT_WINDOW
            )));
        }

        Ok(())
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            host: HostPaths::default(),
            network: NetworkSettings::default(),
            timeouts: Timeouts::default(),
        }
    }
}

/// Host file locations
#[derive(Debug, Clone, Deserialize)]
pub struct HostPaths {
    /// Jail registry file
    #[serde(default = "default_registry")]
    pub registry: PathBuf,

    /// PF rule file
    #[serde(default = "default_pf_conf")]
    pub pf_conf: PathBuf,

    /// Host rc.conf carrying the loopback alias list
    #[serde(default = "default_rc_conf")]
    pub rc_conf: PathBuf,

    /// Directory new jail roots are created under
    #[serde(default = "default_jail_root")]
    pub jail_root: PathBuf,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            registry: default_registry(),
            pf_conf: default_pf_conf(),
            rc_conf: default_rc_conf(),
            jail_root: default_jail_root(),
        }
    }
}

fn default_registry() -> PathBuf {
    PathBuf::from("/etc/jail.conf")
}

fn default_pf_conf() -> PathBuf {
    PathBuf::from("/etc/pf.conf")
}

fn default_rc_conf() -> PathBuf {
    PathBuf::from("/etc/rc.conf")
}

fn default_jail_root() -> PathBuf {
    PathBuf::from("/usr/jail")
}

/// Network allocation settings
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkSettings {
    /// First external port considered for forwarding
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// Bridge interface jails attach to
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Loopback interface carrying the jail aliases
    #[serde(default = "default_loopback")]
    pub loopback: String,

    /// Domain suffix for jail hostnames
    #[serde(default = "default_domain")]
    pub domain: String,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            base_port: default_base_port(),
            interface: default_interface(),
            loopback: default_loopback(),
            domain: default_domain(),
        }
    }
}

fn default_base_port() -> u16 {
    2225
}

fn default_interface() -> String {
    "bridge0".into()
}

fn default_loopback() -> String {
    "lo1".into()
}

fn default_domain() -> String {
    "com".into()
}

/// Per-stage command deadlines in seconds
#[derive(Debug, Clone, Deserialize)]
pub struct Timeouts {
    /// bsdinstall base system install
    #[serde(default = "default_install_timeout")]
    pub install: u64,

    /// pfctl reload and service restarts
    #[serde(default = "default_service_timeout")]
    pub service: u64,

    /// pkg installs inside the jail
    #[serde(default = "default_package_timeout")]
    pub package: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            install: default_install_timeout(),
            service: default_service_timeout(),
            package: default_package_timeout(),
        }
    }
}

fn default_install_timeout() -> u64 {
    900
}

fn default_service_timeout() -> u64 {
    120
}

fn default_package_timeout() -> u64 {
    600
}
