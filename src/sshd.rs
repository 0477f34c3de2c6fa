//! Jail sshd_config port assignment
//!
//! Every jail shares the host's address space through the loopback, so
//! each jail's sshd must listen on its own forwarded port. This module
//! rewrites the commented `#Port` placeholder in the jail's sshd_config
//! to the reserved port.

use crate::error::Result;
use crate::store::ConfigStore;
use std::path::Path;

/// Point the jail's sshd at the reserved port
///
/// Replaces every line starting with `#Port` by `Port <n>`. A config
/// without the placeholder gets the directive appended instead. Lines
/// already carrying an uncommented `Port` are left alone.
pub fn set_jail_ssh_port(path: &Path, port: u16) -> Result<()> {
    let mut store = ConfigStore::load(path)?;
    let directive = format!("Port {}", port);
    let mut replaced = false;

    for index in 0..store.lines().len() {
        if store.lines()[index].starts_with("#Port") {
            store.replace_line(index, directive.clone());
            replaced = true;
        }
    }

    if !replaced {
        store.push_line(directive);
    }

    store.save()
}
